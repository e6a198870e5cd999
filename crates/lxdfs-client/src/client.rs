//! The remote entry contract.

use crate::entry::RemoteEntry;
use crate::error::ClientResult;
use crate::path::RemotePath;
use async_trait::async_trait;
use std::sync::Arc;

/// Single-entry metadata and content fetch.
///
/// This is the only primitive the filesystem has: one call returns either a
/// directory's full child listing or a file's full content, together with
/// owner and mode metadata. Implementations must be safe to call
/// concurrently from many tasks.
#[async_trait]
pub trait RemoteEntryClient: Send + Sync {
    /// Fetches the entry at `path` inside `container`.
    ///
    /// Returns [`ClientError::NotFound`](crate::ClientError::NotFound) when
    /// the path does not exist.
    async fn fetch_entry(&self, container: &str, path: &RemotePath) -> ClientResult<RemoteEntry>;
}

#[async_trait]
impl<C: RemoteEntryClient + ?Sized> RemoteEntryClient for Arc<C> {
    async fn fetch_entry(&self, container: &str, path: &RemotePath) -> ClientResult<RemoteEntry> {
        (**self).fetch_entry(container, path).await
    }
}
