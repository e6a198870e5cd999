//! Open file and directory handles.
//!
//! `open` reads a file once and parks the bytes here; `read` slices them
//! and `release` drops them. `opendir` does the same with a listing so that
//! `readdir` calls resumed at an offset see one consistent snapshot.

use bytes::Bytes;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Content of one open file.
#[derive(Debug, Clone)]
pub struct OpenFile {
    pub ino: u64,
    content: Bytes,
}

impl OpenFile {
    pub fn new(ino: u64, content: Bytes) -> Self {
        Self { ino, content }
    }

    pub fn len(&self) -> usize {
        self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    /// Returns up to `size` bytes starting at `offset`; empty past EOF.
    pub fn slice(&self, offset: u64, size: u32) -> Bytes {
        let len = self.content.len();
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(len);
        let end = start.saturating_add(size as usize).min(len);
        self.content.slice(start..end)
    }
}

/// Thread-safe handle table with auto-incrementing ids.
///
/// Ids start at 1; 0 is never issued. Values are handed out as clones, so
/// store something cheap to clone (`Bytes`, `Arc<..>`).
#[derive(Debug)]
pub struct HandleTable<V> {
    handles: DashMap<u64, V>,
    next_id: AtomicU64,
}

impl<V: Clone> HandleTable<V> {
    pub fn new() -> Self {
        Self {
            handles: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Stores a value and returns its handle id.
    pub fn insert(&self, value: V) -> u64 {
        let mut id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if id == 0 {
            // Wrapped around.
            id = self.next_id.fetch_add(1, Ordering::Relaxed);
        }
        self.handles.insert(id, value);
        id
    }

    pub fn get(&self, fh: u64) -> Option<V> {
        self.handles.get(&fh).map(|v| v.clone())
    }

    pub fn remove(&self, fh: u64) -> Option<V> {
        self.handles.remove(&fh).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

impl<V: Clone> Default for HandleTable<V> {
    fn default() -> Self {
        Self::new()
    }
}
