//! Normalized remote paths.
//!
//! Every path handed to the remote API, the inode table or the entry cache
//! goes through [`RemotePath`], so two spellings of the same location
//! (`/data/`, `/data//./x/..`) always compare equal.

use std::fmt;
use thiserror::Error;

/// Rejected child name in [`RemotePath::join`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    /// Empty component.
    #[error("empty file name")]
    Empty,

    /// `.` or `..`.
    #[error("reserved file name: {0}")]
    Reserved(String),

    /// Name contains `/` or NUL.
    #[error("file name contains a separator or NUL: {0:?}")]
    Separator(String),
}

/// An absolute, normalized path inside a container.
///
/// Invariants: starts with `/`, has no trailing slash (except the root
/// itself), and contains no empty, `.` or `..` segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RemotePath(String);

impl RemotePath {
    /// The container's filesystem root.
    pub fn root() -> Self {
        Self("/".to_string())
    }

    /// Normalizes `raw` into a remote path.
    ///
    /// Relative input is treated as relative to `/`. `..` is resolved
    /// lexically and never climbs above the root.
    pub fn new(raw: impl AsRef<str>) -> Self {
        let mut segments: Vec<&str> = Vec::new();
        for segment in raw.as_ref().split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    segments.pop();
                }
                name => segments.push(name),
            }
        }

        if segments.is_empty() {
            Self::root()
        } else {
            Self(format!("/{}", segments.join("/")))
        }
    }

    /// Appends a single child name.
    pub fn join(&self, name: &str) -> Result<Self, PathError> {
        validate_name(name)?;
        if self.is_root() {
            Ok(Self(format!("/{name}")))
        } else {
            Ok(Self(format!("{}/{name}", self.0)))
        }
    }

    /// Returns the parent path, or `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind('/') {
            Some(0) | None => Some(Self::root()),
            Some(pos) => Some(Self(self.0[..pos].to_string())),
        }
    }

    /// Returns the last component, or `None` for the root.
    pub fn file_name(&self) -> Option<&str> {
        if self.is_root() {
            return None;
        }
        self.0.rsplit('/').next()
    }

    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RemotePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RemotePath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Checks that `name` is usable as a single path component.
pub fn validate_name(name: &str) -> Result<(), PathError> {
    if name.is_empty() {
        return Err(PathError::Empty);
    }
    if name == "." || name == ".." {
        return Err(PathError::Reserved(name.to_string()));
    }
    if name.contains('/') || name.contains('\0') {
        return Err(PathError::Separator(name.to_string()));
    }
    Ok(())
}
