//! Mount configuration for the FUSE filesystem.
//!
//! Every knob has a default that matches the `lxdfs` command line, so
//! `MountConfig::default()` mounts the same way the bare three-argument
//! invocation does.

use lxdfs_client::DEFAULT_CACHE_CAPACITY;
use std::time::Duration;

/// Default timeout for one remote-backed operation (30 seconds).
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(30);

/// Default attribute and entry TTL handed to the kernel (1 second).
pub const DEFAULT_ATTR_TTL: Duration = Duration::from_secs(1);

/// Default bound on concurrent remote fetches.
pub const DEFAULT_CONCURRENCY: usize = 16;

/// Configuration options for the FUSE filesystem.
#[derive(Debug, Clone)]
pub struct MountConfig {
    /// Time-to-live for attributes and entries returned to the kernel.
    pub attr_ttl: Duration,

    /// Timeout for individual remote-backed operations.
    ///
    /// Operations that exceed it fail with ETIMEDOUT and the mount stays up.
    pub io_timeout: Duration,

    /// Maximum per-child fetches in flight while listing one directory.
    pub concurrency_limit: usize,

    /// Lifetime of cached remote entries. Zero disables the entry cache.
    pub cache_ttl: Duration,

    /// Upper bound on cached content and listings, in bytes.
    pub cache_capacity: u64,

    /// Let users other than the mounting user see the tree.
    pub allow_other: bool,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            attr_ttl: DEFAULT_ATTR_TTL,
            io_timeout: DEFAULT_IO_TIMEOUT,
            concurrency_limit: DEFAULT_CONCURRENCY,
            cache_ttl: Duration::ZERO,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            allow_other: false,
        }
    }
}

impl MountConfig {
    /// Sets the kernel TTL for attributes and entries.
    #[must_use]
    pub fn attr_ttl(mut self, ttl: Duration) -> Self {
        self.attr_ttl = ttl;
        self
    }

    /// Sets the timeout for individual operations.
    #[must_use]
    pub fn io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }

    /// Sets the concurrency limit for directory listings (at least 1).
    #[must_use]
    pub fn concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit.max(1);
        self
    }

    #[must_use]
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    #[must_use]
    pub fn cache_capacity(mut self, bytes: u64) -> Self {
        self.cache_capacity = bytes;
        self
    }

    #[must_use]
    pub fn allow_other(mut self, allow: bool) -> Self {
        self.allow_other = allow;
        self
    }

    /// Whether remote entries should go through the entry cache.
    pub fn caching_enabled(&self) -> bool {
        !self.cache_ttl.is_zero() && self.cache_capacity > 0
    }
}
