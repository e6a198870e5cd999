//! Inode allocation for remote paths.
//!
//! The table is a session-wide bidirectional map between normalized
//! [`RemotePath`]s and inode numbers. Numbers are handed out from a
//! monotonic counter and never reused or evicted, so a path keeps its inode
//! for the whole mount even after the kernel forgets it.

use crate::error::{FsError, FsResult};
use dashmap::DashMap;
use lxdfs_client::RemotePath;
use std::sync::atomic::{AtomicU64, Ordering};

/// The root inode number (FUSE convention).
pub const ROOT_INODE: u64 = 1;

/// Thread-safe path <-> inode table.
#[derive(Debug)]
pub struct InodeTable {
    path_to_inode: DashMap<RemotePath, u64>,
    inode_to_path: DashMap<u64, RemotePath>,
    next_inode: AtomicU64,
}

impl InodeTable {
    /// Creates a table whose root inode names `root`.
    pub fn new(root: RemotePath) -> Self {
        let table = Self {
            path_to_inode: DashMap::new(),
            inode_to_path: DashMap::new(),
            // Inode 1 is the root
            next_inode: AtomicU64::new(ROOT_INODE + 1),
        };
        table.path_to_inode.insert(root.clone(), ROOT_INODE);
        table.inode_to_path.insert(ROOT_INODE, root);
        table
    }

    /// Returns the inode for `path`, allocating one on first sight.
    ///
    /// Concurrent callers racing on the same new path get the same inode.
    pub fn identity(&self, path: &RemotePath) -> u64 {
        if let Some(ino) = self.path_to_inode.get(path) {
            return *ino;
        }

        // The reverse entry is written while the shard lock is held, so
        // anyone who can see the number can also resolve it.
        *self
            .path_to_inode
            .entry(path.clone())
            .or_insert_with(|| {
                let ino = self.next_inode.fetch_add(1, Ordering::SeqCst);
                self.inode_to_path.insert(ino, path.clone());
                ino
            })
    }

    /// Recovers the path for an inode the kernel handed back.
    pub fn path(&self, ino: u64) -> FsResult<RemotePath> {
        self.inode_to_path
            .get(&ino)
            .map(|p| p.clone())
            .ok_or(FsError::InvalidInode(ino))
    }

    /// Looks up an inode without allocating.
    pub fn get_inode(&self, path: &RemotePath) -> Option<u64> {
        self.path_to_inode.get(path).map(|r| *r)
    }

    pub fn root_path(&self) -> RemotePath {
        self.inode_to_path
            .get(&ROOT_INODE)
            .map(|p| p.clone())
            .unwrap_or_else(RemotePath::root)
    }

    /// Inode of the parent directory, clamped to the mount root.
    pub fn parent_of(&self, ino: u64) -> u64 {
        if ino == ROOT_INODE {
            return ROOT_INODE;
        }
        self.path(ino)
            .ok()
            .and_then(|p| p.parent())
            .and_then(|parent| self.get_inode(&parent))
            .unwrap_or(ROOT_INODE)
    }

    /// Number of paths seen this session, root included.
    pub fn len(&self) -> usize {
        self.inode_to_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inode_to_path.is_empty()
    }
}
