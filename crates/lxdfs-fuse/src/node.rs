//! Directory and file nodes built from single-entry remote fetches.
//!
//! Nodes are cheap values: a path, its inode, and the descriptor from the
//! fetch that produced them. Apart from the mount root they are derived
//! per operation and dropped afterwards. Every node operation goes back to
//! the remote, so what a node reports is never older than the call.

use crate::error::{FsError, FsResult};
use crate::inode::InodeTable;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use lxdfs_client::{EntryDescriptor, EntryKind, RemoteEntry, RemoteEntryClient, RemotePath};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Kinds of node the filesystem exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Directory,
    File,
}

/// Attributes of a node, independent of the kernel's `FileAttr`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeAttr {
    pub ino: u64,
    pub kind: NodeKind,
    pub uid: u32,
    pub gid: u32,
    /// Permission bits reported by the remote.
    pub mode: u32,
    /// Content length for files, zero for directories.
    pub size: u64,
}

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub ino: u64,
    pub name: String,
    pub kind: NodeKind,
}

/// Builds nodes from remote entries and owns what every node shares.
pub struct NodeFactory {
    client: Arc<dyn RemoteEntryClient>,
    container: String,
    inodes: InodeTable,
    concurrency_limit: usize,
}

impl NodeFactory {
    /// Creates a factory for `container` whose inode table is rooted at `root`.
    pub fn new(
        client: Arc<dyn RemoteEntryClient>,
        container: impl Into<String>,
        root: RemotePath,
        concurrency_limit: usize,
    ) -> Self {
        Self {
            client,
            container: container.into(),
            inodes: InodeTable::new(root),
            concurrency_limit: concurrency_limit.max(1),
        }
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    pub fn inodes(&self) -> &InodeTable {
        &self.inodes
    }

    pub fn concurrency_limit(&self) -> usize {
        self.concurrency_limit
    }

    /// One remote fetch, with NotFound mapped into [`FsError::NotFound`].
    pub async fn fetch(&self, path: &RemotePath) -> FsResult<RemoteEntry> {
        debug!(container = %self.container, path = %path, "remote fetch");
        Ok(self.client.fetch_entry(&self.container, path).await?)
    }

    /// Builds the node for `name` inside `parent` from its fetched entry.
    ///
    /// Returns `None` for kinds the filesystem does not expose.
    pub fn build(
        self: &Arc<Self>,
        parent: &RemotePath,
        name: &str,
        entry: RemoteEntry,
    ) -> FsResult<Option<Node>> {
        let path = parent.join(name)?;
        Ok(self.build_at(path, entry))
    }

    /// Builds the node at an already-joined path.
    ///
    /// Only exposed kinds are given an inode.
    pub fn build_at(self: &Arc<Self>, path: RemotePath, entry: RemoteEntry) -> Option<Node> {
        match entry.descriptor.kind {
            EntryKind::Directory => Some(Node::Directory(DirectoryNode {
                factory: Arc::clone(self),
                ino: self.inodes.identity(&path),
                path,
                descriptor: entry.descriptor,
            })),
            EntryKind::File => Some(Node::File(FileNode {
                factory: Arc::clone(self),
                ino: self.inodes.identity(&path),
                path,
                descriptor: entry.descriptor,
                content: entry.content,
            })),
            EntryKind::Symlink | EntryKind::Other => None,
        }
    }

    /// Fetches `path` and builds its node; hidden kinds count as missing.
    pub async fn resolve(self: &Arc<Self>, path: RemotePath) -> FsResult<Node> {
        let entry = self.fetch(&path).await?;
        let kind = entry.descriptor.kind;
        match self.build_at(path.clone(), entry) {
            Some(node) => Ok(node),
            None => {
                debug!(path = %path, kind = kind.as_str(), "hiding unsupported entry");
                Err(FsError::NotFound(format!("{}:{path}", self.container)))
            }
        }
    }

    /// Fetches the mount root, which must be a directory.
    pub async fn root(self: &Arc<Self>) -> FsResult<DirectoryNode> {
        let path = self.inodes.root_path();
        match self.resolve(path.clone()).await? {
            Node::Directory(dir) => Ok(dir),
            Node::File(_) => Err(FsError::NotADirectory(format!("{}:{path}", self.container))),
        }
    }
}

impl fmt::Debug for NodeFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeFactory")
            .field("container", &self.container)
            .field("inodes", &self.inodes.len())
            .field("concurrency_limit", &self.concurrency_limit)
            .finish_non_exhaustive()
    }
}

/// A directory or a file.
#[derive(Debug, Clone)]
pub enum Node {
    Directory(DirectoryNode),
    File(FileNode),
}

impl Node {
    pub fn attributes(&self) -> NodeAttr {
        match self {
            Node::Directory(d) => d.attributes(),
            Node::File(f) => f.attributes(),
        }
    }

    pub fn ino(&self) -> u64 {
        match self {
            Node::Directory(d) => d.ino,
            Node::File(f) => f.ino,
        }
    }

    pub fn path(&self) -> &RemotePath {
        match self {
            Node::Directory(d) => &d.path,
            Node::File(f) => &f.path,
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            Node::Directory(_) => NodeKind::Directory,
            Node::File(_) => NodeKind::File,
        }
    }

    pub fn into_directory(self) -> FsResult<DirectoryNode> {
        match self {
            Node::Directory(d) => Ok(d),
            Node::File(f) => Err(FsError::NotADirectory(f.path.to_string())),
        }
    }

    pub fn into_file(self) -> FsResult<FileNode> {
        match self {
            Node::File(f) => Ok(f),
            Node::Directory(d) => Err(FsError::IsADirectory(d.path.to_string())),
        }
    }
}

/// One remote directory.
#[derive(Clone)]
pub struct DirectoryNode {
    factory: Arc<NodeFactory>,
    path: RemotePath,
    ino: u64,
    descriptor: EntryDescriptor,
}

impl DirectoryNode {
    pub fn ino(&self) -> u64 {
        self.ino
    }

    pub fn path(&self) -> &RemotePath {
        &self.path
    }

    /// Attributes from the fetch that built this node.
    pub fn attributes(&self) -> NodeAttr {
        NodeAttr {
            ino: self.ino,
            kind: NodeKind::Directory,
            uid: self.descriptor.uid,
            gid: self.descriptor.gid,
            mode: self.descriptor.mode,
            size: 0,
        }
    }

    /// Fetches this directory's current child names.
    async fn children(&self) -> FsResult<Vec<String>> {
        let entry = self.factory.fetch(&self.path).await?;
        if !entry.descriptor.is_directory() {
            return Err(FsError::NotADirectory(self.path.to_string()));
        }
        Ok(entry.descriptor.children)
    }

    /// Resolves one child by name.
    ///
    /// The name must appear in a fresh listing of this directory; the child
    /// is then fetched to learn its kind.
    pub async fn lookup(&self, name: &str) -> FsResult<Node> {
        let child = self.path.join(name)?;
        let children = self.children().await?;
        if !children.iter().any(|c| c == name) {
            return Err(FsError::NotFound(format!(
                "{}:{child}",
                self.factory.container
            )));
        }
        self.factory.resolve(child).await
    }

    /// Lists this directory in remote order, each child tagged with its kind.
    ///
    /// Child fetches run concurrently up to the factory's limit. Children
    /// that vanished after the listing, or whose kind is hidden, are left
    /// out. Any other failure fails the whole listing.
    pub async fn read_directory(&self) -> FsResult<Vec<DirEntry>> {
        let names = self.children().await?;
        let factory = &self.factory;
        let parent = &self.path;

        let fetched: Vec<(String, FsResult<Option<Node>>)> = stream::iter(names)
            .map(|name| async move {
                let result = match parent.join(&name) {
                    Ok(path) => match factory.fetch(&path).await {
                        Ok(entry) => Ok(factory.build_at(path, entry)),
                        Err(e) => Err(e),
                    },
                    Err(e) => Err(e.into()),
                };
                (name, result)
            })
            .buffered(factory.concurrency_limit)
            .collect()
            .await;

        let mut entries = Vec::with_capacity(fetched.len());
        for (name, result) in fetched {
            match result {
                Ok(Some(node)) => entries.push(DirEntry {
                    ino: node.ino(),
                    kind: node.kind(),
                    name,
                }),
                Ok(None) => debug!(parent = %self.path, name = %name, "skipping unsupported entry"),
                Err(e) if e.is_not_found() => {
                    debug!(parent = %self.path, name = %name, "entry vanished during listing");
                }
                Err(FsError::InvalidName(e)) => {
                    warn!(parent = %self.path, name = %name, error = %e, "skipping unusable name");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(entries)
    }
}

impl fmt::Debug for DirectoryNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectoryNode")
            .field("path", &self.path)
            .field("ino", &self.ino)
            .field("children", &self.descriptor.children.len())
            .finish_non_exhaustive()
    }
}

/// One remote file.
#[derive(Clone)]
pub struct FileNode {
    factory: Arc<NodeFactory>,
    path: RemotePath,
    ino: u64,
    descriptor: EntryDescriptor,
    /// Content from the fetch that built this node; only its length is used.
    content: Bytes,
}

impl FileNode {
    pub fn ino(&self) -> u64 {
        self.ino
    }

    pub fn path(&self) -> &RemotePath {
        &self.path
    }

    /// Attributes from the fetch that built this node, size included.
    pub fn attributes(&self) -> NodeAttr {
        NodeAttr {
            ino: self.ino,
            kind: NodeKind::File,
            uid: self.descriptor.uid,
            gid: self.descriptor.gid,
            mode: self.descriptor.mode,
            size: self.content.len() as u64,
        }
    }

    /// Fetches the whole current content.
    pub async fn read_all(&self) -> FsResult<Bytes> {
        let entry = self.factory.fetch(&self.path).await?;
        match entry.descriptor.kind {
            EntryKind::File => Ok(entry.content),
            EntryKind::Directory => Err(FsError::IsADirectory(self.path.to_string())),
            EntryKind::Symlink | EntryKind::Other => Err(FsError::NotFound(format!(
                "{}:{}",
                self.factory.container, self.path
            ))),
        }
    }
}

impl fmt::Debug for FileNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileNode")
            .field("path", &self.path)
            .field("ino", &self.ino)
            .field("size", &self.content.len())
            .finish_non_exhaustive()
    }
}
