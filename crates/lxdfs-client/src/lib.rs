//! Client side of the LXD instance file API.
//!
//! The LXD daemon exposes an instance's files one entry at a time: a `GET`
//! on a path returns either a directory's child names or a file's full
//! content, plus owner and mode metadata in response headers. There is no
//! stat-only call, no pagination and no recursive fetch.
//!
//! This crate models that contract as [`RemoteEntryClient`] and provides:
//!
//! - [`LxdClient`] - the real client, speaking HTTP/1.1 over the daemon's
//!   unix socket
//! - [`CachingClient`] - an optional per-session TTL cache that wraps any
//!   other client
//! - [`RemotePath`] - normalized absolute paths used as lookup and cache keys
//!
//! # Usage
//!
//! ```ignore
//! use lxdfs_client::{LxdClient, LxdClientConfig, RemoteEntryClient, RemotePath};
//!
//! let client = LxdClient::connect(LxdClientConfig::discover()).await?;
//! let entry = client.fetch_entry("c1", &RemotePath::new("/etc/hostname")).await?;
//! println!("{} bytes", entry.size());
//! ```

pub mod cache;
pub mod client;
pub mod entry;
pub mod error;
pub mod lxd;
pub mod path;

pub use cache::{CachingClient, DEFAULT_CACHE_CAPACITY};
pub use client::RemoteEntryClient;
pub use entry::{EntryDescriptor, EntryKind, RemoteEntry};
pub use error::{ClientError, ClientResult};
pub use lxd::{DEFAULT_SOCKET, LxdClient, LxdClientConfig, SNAP_SOCKET};
pub use path::{PathError, RemotePath};
