//! Read-only FUSE filesystem for LXD container trees.
//!
//! Mounts one subtree of one container. The LXD file API can only return a
//! single directory listing or a single file per call, so every kernel
//! request is answered by re-deriving the node it addresses and asking the
//! daemon again.
//!
//! # Features
//!
//! - Stable inode numbers: one path, one inode, for the whole session
//! - Concurrent, bounded per-child fetches when listing a directory
//! - Per-operation timeouts that surface as ETIMEDOUT instead of hanging
//! - Optional short-lived entry cache
//!
//! # Usage
//!
//! ```ignore
//! use lxdfs_fuse::{FuseBackend, LxdFs, MountConfig};
//!
//! let fs = LxdFs::new(client, "c1", "/data", MountConfig::default())?;
//! let handle = FuseBackend::new().mount(fs, mountpoint)?;
//! ```

pub mod async_bridge;
pub mod backend;
pub mod config;
pub mod error;
pub mod filesystem;
pub mod handles;
pub mod inode;
pub mod node;

pub use async_bridge::{AsyncBridge, BridgeError, BridgeStats};
pub use backend::{FuseBackend, FuseMountHandle, mount_options};
pub use config::MountConfig;
pub use error::{FsError, FsResult, ToErrno};
pub use filesystem::{ListedEntry, LxdFs, MountState};
pub use handles::{HandleTable, OpenFile};
pub use inode::{InodeTable, ROOT_INODE};
pub use node::{DirEntry, DirectoryNode, FileNode, Node, NodeAttr, NodeFactory, NodeKind};
