//! Optional per-session entry cache.
//!
//! Wraps another [`RemoteEntryClient`] and remembers successful fetches for
//! a short TTL, keyed by container and normalized path. Failures are never
//! cached. Nothing outlives the process.

use crate::client::RemoteEntryClient;
use crate::entry::RemoteEntry;
use crate::error::ClientResult;
use crate::path::RemotePath;
use async_trait::async_trait;
use moka::sync::Cache;
use std::time::Duration;
use tracing::trace;

/// Default cache capacity in bytes (64 MiB).
pub const DEFAULT_CACHE_CAPACITY: u64 = 64 * 1024 * 1024;

type CacheKey = (String, RemotePath);

/// TTL cache in front of a remote entry client.
pub struct CachingClient<C> {
    inner: C,
    entries: Cache<CacheKey, RemoteEntry>,
    ttl: Duration,
}

impl<C: RemoteEntryClient> CachingClient<C> {
    /// Wraps `inner`, keeping entries for `ttl` and at most `capacity_bytes`
    /// of content and listings.
    pub fn new(inner: C, ttl: Duration, capacity_bytes: u64) -> Self {
        let entries = Cache::builder()
            .time_to_live(ttl)
            .max_capacity(capacity_bytes)
            .weigher(|_key: &CacheKey, entry: &RemoteEntry| entry.weight())
            .build();
        Self {
            inner,
            entries,
            ttl,
        }
    }
}

#[async_trait]
impl<C: RemoteEntryClient> RemoteEntryClient for CachingClient<C> {
    async fn fetch_entry(&self, container: &str, path: &RemotePath) -> ClientResult<RemoteEntry> {
        let key = (container.to_string(), path.clone());
        if let Some(hit) = self.entries.get(&key) {
            trace!(container, path = %path, "entry cache hit");
            return Ok(hit);
        }

        let entry = self.inner.fetch_entry(container, path).await?;
        self.entries.insert(key, entry.clone());
        Ok(entry)
    }
}

impl<C> std::fmt::Debug for CachingClient<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachingClient")
            .field("ttl", &self.ttl)
            .field("entry_count", &self.entries.entry_count())
            .finish_non_exhaustive()
    }
}
