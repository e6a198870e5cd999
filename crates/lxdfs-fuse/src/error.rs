//! Error handling and mapping for the FUSE filesystem.
//!
//! Every per-operation failure is an [`FsError`]; the FUSE layer turns it
//! into an errno with [`FsError::to_errno`] and the mount keeps running.

use crate::async_bridge::BridgeError;
use lxdfs_client::{ClientError, PathError};
use std::io;
use thiserror::Error;

/// Errors that can occur during filesystem operations.
#[derive(Debug, Error)]
pub enum FsError {
    /// The path does not exist remotely or is not a directory/file.
    #[error("not found: {0}")]
    NotFound(String),

    /// Remote call failed (boxed to reduce enum size).
    #[error("remote call failed: {0}")]
    Remote(Box<ClientError>),

    /// Async bridge error (timeout, cancelled).
    #[error("async bridge error: {0}")]
    Bridge(#[from] BridgeError),

    /// Local I/O error, e.g. while starting the runtime.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid inode: {0}")]
    InvalidInode(u64),

    #[error("invalid file handle: {0}")]
    InvalidHandle(u64),

    /// A name the kernel handed us cannot be a single path component.
    #[error("invalid file name: {0}")]
    InvalidName(#[from] PathError),

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("is a directory: {0}")]
    IsADirectory(String),

    /// Any mutating operation.
    #[error("read-only filesystem")]
    ReadOnly,
}

impl FsError {
    /// Converts this error to a libc error code for FUSE.
    pub fn to_errno(&self) -> i32 {
        match self {
            FsError::NotFound(_) | FsError::InvalidInode(_) => libc::ENOENT,
            FsError::Remote(e) => client_error_to_errno(e),
            FsError::Bridge(e) => e.to_errno(),
            FsError::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
            FsError::InvalidHandle(_) => libc::EBADF,
            FsError::InvalidName(_) => libc::EINVAL,
            FsError::NotADirectory(_) => libc::ENOTDIR,
            FsError::IsADirectory(_) => libc::EISDIR,
            FsError::ReadOnly => libc::EROFS,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, FsError::NotFound(_))
    }
}

/// Converts a remote client error to a libc error code.
///
/// Statuses LXD uses for access problems map to EACCES, gateway timeouts
/// to ETIMEDOUT; everything else is an I/O error.
pub fn client_error_to_errno(e: &ClientError) -> i32 {
    match e {
        ClientError::NotFound { .. } => libc::ENOENT,
        ClientError::Status { status, .. } => match status {
            401 | 403 => libc::EACCES,
            404 => libc::ENOENT,
            408 | 504 => libc::ETIMEDOUT,
            _ => libc::EIO,
        },
        ClientError::Connection { .. }
        | ClientError::Http(_)
        | ClientError::Request(_)
        | ClientError::InvalidResponse(_)
        | ClientError::Json(_)
        | ClientError::Closed => libc::EIO,
    }
}

/// Result type for filesystem operations.
pub type FsResult<T> = Result<T, FsError>;

/// Extension trait to convert errors to errno.
pub trait ToErrno {
    /// Converts this error to a libc error code.
    fn to_errno(&self) -> i32;
}

impl ToErrno for FsError {
    fn to_errno(&self) -> i32 {
        FsError::to_errno(self)
    }
}

impl ToErrno for ClientError {
    fn to_errno(&self) -> i32 {
        client_error_to_errno(self)
    }
}

impl ToErrno for BridgeError {
    fn to_errno(&self) -> i32 {
        BridgeError::to_errno(self)
    }
}

impl From<ClientError> for FsError {
    fn from(e: ClientError) -> Self {
        match e {
            ClientError::NotFound { container, path } => {
                FsError::NotFound(format!("{container}:{path}"))
            }
            other => FsError::Remote(Box::new(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    fn status(code: u16) -> ClientError {
        ClientError::Status {
            status: code,
            message: "x".to_string(),
        }
    }

    #[test]
    fn test_client_not_found_becomes_not_found() {
        let e: FsError = ClientError::NotFound {
            container: "c1".to_string(),
            path: "/data/x".to_string(),
        }
        .into();
        assert!(e.is_not_found());
        assert_eq!(e.to_errno(), libc::ENOENT);
        assert!(e.to_string().contains("c1:/data/x"));
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(client_error_to_errno(&status(403)), libc::EACCES);
        assert_eq!(client_error_to_errno(&status(401)), libc::EACCES);
        assert_eq!(client_error_to_errno(&status(404)), libc::ENOENT);
        assert_eq!(client_error_to_errno(&status(504)), libc::ETIMEDOUT);
        assert_eq!(client_error_to_errno(&status(500)), libc::EIO);
        assert_eq!(client_error_to_errno(&status(400)), libc::EIO);
    }

    #[test]
    fn test_connection_failure_is_eio() {
        let e: FsError = ClientError::Connection {
            socket: PathBuf::from("/run/lxd.sock"),
            source: io::Error::from(io::ErrorKind::ConnectionRefused),
        }
        .into();
        assert!(!e.is_not_found());
        assert_eq!(e.to_errno(), libc::EIO);
    }

    #[test]
    fn test_fs_error_all_variants() {
        assert_eq!(FsError::InvalidInode(9).to_errno(), libc::ENOENT);
        assert_eq!(FsError::InvalidHandle(9).to_errno(), libc::EBADF);
        assert_eq!(FsError::InvalidName(PathError::Empty).to_errno(), libc::EINVAL);
        assert_eq!(FsError::NotADirectory("/f".into()).to_errno(), libc::ENOTDIR);
        assert_eq!(FsError::IsADirectory("/d".into()).to_errno(), libc::EISDIR);
        assert_eq!(FsError::ReadOnly.to_errno(), libc::EROFS);
        assert_eq!(
            FsError::Bridge(BridgeError::Timeout(Duration::from_secs(1))).to_errno(),
            libc::ETIMEDOUT
        );
        assert_eq!(FsError::Bridge(BridgeError::Cancelled).to_errno(), libc::ECANCELED);
    }

    #[test]
    fn test_io_error_passthrough() {
        let e = FsError::Io(io::Error::from_raw_os_error(libc::EMFILE));
        assert_eq!(e.to_errno(), libc::EMFILE);

        let e = FsError::Io(io::Error::other("no os code"));
        assert_eq!(e.to_errno(), libc::EIO);
    }

    #[test]
    fn test_to_errno_trait() {
        fn errno_of(e: &dyn ToErrno) -> i32 {
            e.to_errno()
        }
        assert_eq!(errno_of(&status(403)), libc::EACCES);
        assert_eq!(errno_of(&FsError::ReadOnly), libc::EROFS);
        assert_eq!(errno_of(&BridgeError::Cancelled), libc::ECANCELED);
    }
}
