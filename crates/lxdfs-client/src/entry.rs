//! Entry descriptors returned by a single remote fetch.

use bytes::Bytes;

/// Kind of a remote entry, as reported by the `X-LXD-type` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    Directory,
    File,
    Symlink,
    /// Anything LXD reports that we do not model.
    Other,
}

impl EntryKind {
    /// Parses the LXD wire name (`directory`, `file`, `symlink`).
    pub fn from_wire(raw: &str) -> Self {
        match raw.trim() {
            "directory" => EntryKind::Directory,
            "file" => EntryKind::File,
            "symlink" => EntryKind::Symlink,
            _ => EntryKind::Other,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EntryKind::Directory => "directory",
            EntryKind::File => "file",
            EntryKind::Symlink => "symlink",
            EntryKind::Other => "other",
        }
    }
}

/// Metadata for one remote entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryDescriptor {
    pub kind: EntryKind,
    /// Owning user id inside the container.
    pub uid: u32,
    /// Owning group id inside the container.
    pub gid: u32,
    /// POSIX permission bits (`0o7777` range).
    pub mode: u32,
    /// Immediate child names in remote listing order. Empty for non-directories.
    pub children: Vec<String>,
}

impl EntryDescriptor {
    /// A directory descriptor owned by root with mode `0755`.
    pub fn directory<I, S>(children: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            kind: EntryKind::Directory,
            uid: 0,
            gid: 0,
            mode: 0o755,
            children: children.into_iter().map(Into::into).collect(),
        }
    }

    /// A file descriptor owned by root with mode `0644`.
    pub fn file() -> Self {
        Self {
            kind: EntryKind::File,
            uid: 0,
            gid: 0,
            mode: 0o644,
            children: Vec::new(),
        }
    }

    /// A descriptor of the given kind with no children.
    pub fn of_kind(kind: EntryKind) -> Self {
        Self {
            kind,
            uid: 0,
            gid: 0,
            mode: 0o777,
            children: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_owner(mut self, uid: u32, gid: u32) -> Self {
        self.uid = uid;
        self.gid = gid;
        self
    }

    #[must_use]
    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }

    pub fn is_directory(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

/// Result of one `fetch_entry` call: the descriptor plus the raw body.
///
/// For files `content` is the complete file content. For directories it is
/// empty; the child names live in the descriptor.
#[derive(Debug, Clone)]
pub struct RemoteEntry {
    pub descriptor: EntryDescriptor,
    pub content: Bytes,
}

impl RemoteEntry {
    pub fn new(descriptor: EntryDescriptor, content: impl Into<Bytes>) -> Self {
        Self {
            descriptor,
            content: content.into(),
        }
    }

    /// Content length in bytes.
    pub fn size(&self) -> u64 {
        self.content.len() as u64
    }

    /// Approximate memory footprint, used to weigh cache entries.
    pub fn weight(&self) -> u32 {
        let names: usize = self.descriptor.children.iter().map(String::len).sum();
        u32::try_from(self.content.len() + names + 64).unwrap_or(u32::MAX)
    }
}
