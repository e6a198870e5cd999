//! FUSE filesystem over an LXD container tree.
//!
//! This module implements the fuser `Filesystem` trait. Inode-addressed
//! kernel requests are turned into node operations: the inode is resolved to
//! a remote path, the node is re-derived with one fetch, and the node
//! operation runs on the tokio runtime through the async bridge. The reply
//! is sent from the runtime task, so the session thread goes straight back
//! to reading requests.
//!
//! The tree is read-only. Every mutating request is answered with EROFS.

use crate::async_bridge::AsyncBridge;
use crate::config::MountConfig;
use crate::error::{FsError, FsResult};
use crate::handles::{HandleTable, OpenFile};
use crate::inode::ROOT_INODE;
use crate::node::{DirectoryNode, Node, NodeAttr, NodeFactory, NodeKind};

use bytes::Bytes;
use fuser::{
    FileAttr, FileType, Filesystem, KernelConfig, ReplyAttr, ReplyCreate, ReplyData,
    ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, Request,
    TimeOrNow,
};
use libc::c_int;
use lxdfs_client::{RemoteEntryClient, RemotePath};
use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::runtime::{Builder, Handle, Runtime};
use tracing::{debug, info, trace, warn};

/// Block size for filesystem statistics.
const BLOCK_SIZE: u32 = 4096;

/// Fallback file permissions (rw-r--r--) when the remote reports none.
const DEFAULT_FILE_PERM: u16 = 0o644;

/// Fallback directory permissions (rwxr-xr-x) when the remote reports none.
const DEFAULT_DIR_PERM: u16 = 0o755;

const MAX_NAME_LEN: u32 = 255;

/// One row of a directory listing as handed to the kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedEntry {
    pub ino: u64,
    pub kind: FileType,
    pub name: String,
}

/// State shared between the FUSE session thread and in-flight operations.
///
/// Every remote-backed operation is an async method here, so a callback can
/// move an `Arc` of the state into a task and reply from that task.
pub struct MountState {
    factory: Arc<NodeFactory>,
    /// Fetched once at mount time and kept for the whole session.
    root: DirectoryNode,
    files: HandleTable<OpenFile>,
    dirs: HandleTable<Arc<Vec<ListedEntry>>>,
    /// Reported as every timestamp; the remote has none.
    mounted_at: SystemTime,
}

impl MountState {
    /// The mount root, the same node for the whole session.
    pub fn root(&self) -> &DirectoryNode {
        &self.root
    }

    pub fn factory(&self) -> &Arc<NodeFactory> {
        &self.factory
    }

    /// Re-derives the node behind an inode with one remote fetch.
    ///
    /// The root is answered from the node fetched at mount time.
    pub async fn node(&self, ino: u64) -> FsResult<Node> {
        if ino == ROOT_INODE {
            return Ok(Node::Directory(self.root.clone()));
        }
        let path = self.factory.inodes().path(ino)?;
        self.factory.resolve(path).await
    }

    /// Builds a kernel attribute record from node attributes.
    pub fn make_attr(&self, attr: &NodeAttr) -> FileAttr {
        let (kind, nlink, fallback) = match attr.kind {
            NodeKind::Directory => (FileType::Directory, 2, DEFAULT_DIR_PERM),
            NodeKind::File => (FileType::RegularFile, 1, DEFAULT_FILE_PERM),
        };
        let perm = match u16::try_from(attr.mode & 0o7777) {
            Ok(0) | Err(_) => fallback,
            Ok(bits) => bits,
        };
        FileAttr {
            ino: attr.ino,
            size: attr.size,
            blocks: attr.size.div_ceil(512),
            atime: self.mounted_at,
            mtime: self.mounted_at,
            ctime: self.mounted_at,
            crtime: self.mounted_at,
            kind,
            perm,
            nlink,
            uid: attr.uid,
            gid: attr.gid,
            rdev: 0,
            blksize: BLOCK_SIZE,
            flags: 0,
        }
    }

    /// Resolves `name` inside directory `parent`.
    pub async fn lookup(&self, parent: u64, name: &str) -> FsResult<FileAttr> {
        let dir = self.node(parent).await?.into_directory()?;
        let node = dir.lookup(name).await?;
        Ok(self.make_attr(&node.attributes()))
    }

    pub async fn getattr(&self, ino: u64) -> FsResult<FileAttr> {
        let node = self.node(ino).await?;
        Ok(self.make_attr(&node.attributes()))
    }

    /// Lists a directory, `.` and `..` first, then children in remote order.
    pub async fn list_entries(&self, ino: u64) -> FsResult<Vec<ListedEntry>> {
        let dir = self.node(ino).await?.into_directory()?;
        let parent = self.factory.inodes().parent_of(ino);
        let children = dir.read_directory().await?;

        let mut entries = Vec::with_capacity(children.len() + 2);
        entries.push(ListedEntry {
            ino,
            kind: FileType::Directory,
            name: ".".to_string(),
        });
        entries.push(ListedEntry {
            ino: parent,
            kind: FileType::Directory,
            name: "..".to_string(),
        });
        entries.extend(children.into_iter().map(|child| ListedEntry {
            ino: child.ino,
            kind: file_type(child.kind),
            name: child.name,
        }));
        Ok(entries)
    }

    /// Snapshots a listing into a directory handle.
    pub async fn open_dir(&self, ino: u64) -> FsResult<u64> {
        let entries = self.list_entries(ino).await?;
        Ok(self.dirs.insert(Arc::new(entries)))
    }

    /// Returns the listing behind `fh`, or a fresh one if the handle is unknown.
    pub async fn dir_listing(&self, ino: u64, fh: u64) -> FsResult<Arc<Vec<ListedEntry>>> {
        match self.dirs.get(fh) {
            Some(entries) => Ok(entries),
            None => self.list_entries(ino).await.map(Arc::new),
        }
    }

    pub fn release_dir(&self, fh: u64) {
        self.dirs.remove(fh);
    }

    /// Opens a file for reading, fetching its content once.
    pub async fn open_file(&self, ino: u64, flags: i32) -> FsResult<u64> {
        if flags & libc::O_ACCMODE != libc::O_RDONLY || flags & libc::O_TRUNC != 0 {
            return Err(FsError::ReadOnly);
        }
        let file = self.node(ino).await?.into_file()?;
        let content = file.read_all().await?;
        debug!(ino, size = content.len(), "file opened");
        Ok(self.files.insert(OpenFile::new(ino, content)))
    }

    /// Reads from an open file handle.
    pub fn read_handle(&self, fh: u64, offset: i64, size: u32) -> FsResult<Bytes> {
        let file = self.files.get(fh).ok_or(FsError::InvalidHandle(fh))?;
        let offset = u64::try_from(offset).unwrap_or(0);
        Ok(file.slice(offset, size))
    }

    pub fn release_handle(&self, fh: u64) {
        self.files.remove(fh);
    }

    /// Permission check: anything asking for write access is refused.
    pub fn check_access(&self, ino: u64, mask: i32) -> FsResult<()> {
        self.factory.inodes().path(ino)?;
        if mask & libc::W_OK != 0 {
            return Err(FsError::ReadOnly);
        }
        Ok(())
    }

    pub fn open_file_count(&self) -> usize {
        self.files.len()
    }
}

/// Read-only FUSE filesystem for one container subtree.
///
/// Constructing it is the mount transition: the subtree root is fetched and
/// must be a directory, otherwise construction fails and nothing is mounted.
/// Remote-backed kernel requests are dispatched onto the runtime and
/// answered from there, so one slow path never holds up the others.
pub struct LxdFs {
    state: Arc<MountState>,
    bridge: AsyncBridge,
    config: MountConfig,
    /// Present when the filesystem owns its runtime. Dropped last.
    runtime: Option<Runtime>,
}

impl LxdFs {
    /// Mounts `root` of `container`, running remote calls on a private runtime.
    pub fn new(
        client: Arc<dyn RemoteEntryClient>,
        container: &str,
        root: &str,
        config: MountConfig,
    ) -> FsResult<Self> {
        let runtime = Builder::new_multi_thread()
            .enable_all()
            .thread_name("lxdfs-io")
            .build()?;
        let mut fs = Self::with_runtime_handle(
            client,
            container,
            root,
            config,
            runtime.handle().clone(),
        )?;
        fs.runtime = Some(runtime);
        Ok(fs)
    }

    /// Mounts `root` of `container` on a runtime owned by the caller.
    ///
    /// Must be called from outside that runtime's worker threads.
    pub fn with_runtime_handle(
        client: Arc<dyn RemoteEntryClient>,
        container: &str,
        root: &str,
        config: MountConfig,
        handle: Handle,
    ) -> FsResult<Self> {
        let root_path = RemotePath::new(root);
        let factory = Arc::new(NodeFactory::new(
            client,
            container,
            root_path.clone(),
            config.concurrency_limit,
        ));
        let bridge = AsyncBridge::new(handle, config.io_timeout);

        let root_node = {
            let factory = Arc::clone(&factory);
            bridge.run(async move { factory.root().await })??
        };

        let attr = root_node.attributes();
        info!(
            container,
            root = %root_path,
            uid = attr.uid,
            gid = attr.gid,
            "container root resolved"
        );

        let state = MountState {
            factory,
            root: root_node,
            files: HandleTable::new(),
            dirs: HandleTable::new(),
            mounted_at: SystemTime::now(),
        };
        Ok(Self {
            state: Arc::new(state),
            bridge,
            config,
            runtime: None,
        })
    }

    /// The mount root, the same node for the whole session.
    pub fn root(&self) -> &DirectoryNode {
        self.state.root()
    }

    pub fn container(&self) -> &str {
        self.state.factory.container()
    }

    pub fn config(&self) -> &MountConfig {
        &self.config
    }

    pub fn state(&self) -> &Arc<MountState> {
        &self.state
    }

    pub fn bridge(&self) -> &AsyncBridge {
        &self.bridge
    }

    /// Runs `work` against the shared state on the runtime and passes the
    /// outcome to `respond` from there.
    ///
    /// Returns without waiting. Bridge failures arrive as [`FsError::Bridge`]
    /// and every failure is logged under `op` before `respond` sees it.
    pub fn dispatch<T, W, Fut, R>(&self, op: &'static str, ino: u64, work: W, respond: R)
    where
        W: FnOnce(Arc<MountState>) -> Fut,
        Fut: Future<Output = FsResult<T>> + Send + 'static,
        T: Send + 'static,
        R: FnOnce(FsResult<T>) + Send + 'static,
    {
        let future = work(Arc::clone(&self.state));
        self.bridge.spawn(future, move |outcome| {
            let result = outcome.map_err(FsError::from).and_then(|r| r);
            if let Err(e) = &result {
                log_failure(op, ino, e);
            }
            respond(result);
        });
    }
}

fn file_type(kind: NodeKind) -> FileType {
    match kind {
        NodeKind::Directory => FileType::Directory,
        NodeKind::File => FileType::RegularFile,
    }
}

/// Answers a `readdir` from a listing, resuming after `offset`.
fn fill_directory(mut reply: ReplyDirectory, entries: &[ListedEntry], offset: i64) {
    let skip = usize::try_from(offset).unwrap_or(0);
    for (i, entry) in entries.iter().enumerate().skip(skip) {
        let next = i64::try_from(i + 1).unwrap_or(i64::MAX);
        // add returns true once the reply buffer is full
        if reply.add(entry.ino, next, entry.kind, &entry.name) {
            break;
        }
    }
    reply.ok();
}

/// Logs a failed operation; missing entries are routine and stay quiet.
fn log_failure(op: &str, ino: u64, e: &FsError) {
    if e.is_not_found() {
        trace!(op, ino, error = %e, "operation failed");
    } else {
        warn!(op, ino, error = %e, "operation failed");
    }
}

impl Filesystem for LxdFs {
    fn init(&mut self, _req: &Request<'_>, config: &mut KernelConfig) -> Result<(), c_int> {
        info!(container = self.container(), "FUSE filesystem initialized");
        config.add_capabilities(fuser::consts::FUSE_ASYNC_READ).ok();
        Ok(())
    }

    fn destroy(&mut self) {
        let (started, completed, timed_out) = self.bridge.stats().snapshot();
        info!(
            started,
            completed,
            timed_out,
            inodes = self.state.factory.inodes().len(),
            "FUSE filesystem destroyed"
        );
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some(name) = name.to_str().map(str::to_owned) else {
            reply.error(libc::EINVAL);
            return;
        };
        trace!(parent, name = %name, "lookup");

        let ttl = self.config.attr_ttl;
        self.dispatch(
            "lookup",
            parent,
            move |state| async move { state.lookup(parent, &name).await },
            move |result| match result {
                Ok(attr) => reply.entry(&ttl, &attr, 0),
                Err(e) => reply.error(e.to_errno()),
            },
        );
    }

    fn forget(&mut self, _req: &Request<'_>, ino: u64, nlookup: u64) {
        // Inodes stay assigned for the whole session.
        trace!(ino, nlookup, "forget");
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        trace!(ino, "getattr");

        let ttl = self.config.attr_ttl;
        self.dispatch(
            "getattr",
            ino,
            move |state| async move { state.getattr(ino).await },
            move |result| match result {
                Ok(attr) => reply.attr(&ttl, &attr),
                Err(e) => reply.error(e.to_errno()),
            },
        );
    }

    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        _size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        trace!(ino, "setattr");
        reply.error(libc::EROFS);
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        trace!(ino, flags, "open");

        self.dispatch(
            "open",
            ino,
            move |state| async move { state.open_file(ino, flags).await },
            move |result| match result {
                Ok(fh) => reply.opened(fh, 0),
                Err(e) => reply.error(e.to_errno()),
            },
        );
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        trace!(ino, fh, offset, size, "read");

        // Served from the open handle, no remote call
        match self.state.read_handle(fh, offset, size) {
            Ok(data) => reply.data(&data),
            Err(e) => {
                log_failure("read", ino, &e);
                reply.error(e.to_errno());
            }
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        trace!(fh, "release");
        self.state.release_handle(fh);
        reply.ok();
    }

    fn opendir(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        trace!(ino, "opendir");

        self.dispatch(
            "opendir",
            ino,
            move |state| async move { state.open_dir(ino).await },
            move |result| match result {
                Ok(fh) => reply.opened(fh, 0),
                Err(e) => reply.error(e.to_errno()),
            },
        );
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        reply: ReplyDirectory,
    ) {
        trace!(ino, fh, offset, "readdir");

        self.dispatch(
            "readdir",
            ino,
            move |state| async move { state.dir_listing(ino, fh).await },
            move |result| match result {
                Ok(entries) => fill_directory(reply, &entries, offset),
                Err(e) => reply.error(e.to_errno()),
            },
        );
    }

    fn releasedir(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        reply: ReplyEmpty,
    ) {
        trace!(fh, "releasedir");
        self.state.release_dir(fh);
        reply.ok();
    }

    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: ReplyStatfs) {
        let files = self.state.factory.inodes().len() as u64;
        reply.statfs(0, 0, 0, files, 0, BLOCK_SIZE, MAX_NAME_LEN, BLOCK_SIZE);
    }

    fn access(&mut self, _req: &Request<'_>, ino: u64, mask: i32, reply: ReplyEmpty) {
        trace!(ino, mask, "access");

        match self.state.check_access(ino, mask) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    // ==================== Mutations (read-only filesystem) ====================

    fn mknod(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        _name: &OsStr,
        _mode: u32,
        _umask: u32,
        _rdev: u32,
        reply: ReplyEntry,
    ) {
        trace!(parent, "mknod");
        reply.error(libc::EROFS);
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        _name: &OsStr,
        _mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        trace!(parent, "mkdir");
        reply.error(libc::EROFS);
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, _name: &OsStr, reply: ReplyEmpty) {
        trace!(parent, "unlink");
        reply.error(libc::EROFS);
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, _name: &OsStr, reply: ReplyEmpty) {
        trace!(parent, "rmdir");
        reply.error(libc::EROFS);
    }

    fn symlink(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        _link_name: &OsStr,
        _target: &Path,
        reply: ReplyEntry,
    ) {
        trace!(parent, "symlink");
        reply.error(libc::EROFS);
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        _name: &OsStr,
        _newparent: u64,
        _newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        trace!(parent, "rename");
        reply.error(libc::EROFS);
    }

    fn link(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _newparent: u64,
        _newname: &OsStr,
        reply: ReplyEntry,
    ) {
        trace!(ino, "link");
        reply.error(libc::EROFS);
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        _offset: i64,
        _data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        trace!(ino, "write");
        reply.error(libc::EROFS);
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        _name: &OsStr,
        _mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        trace!(parent, "create");
        reply.error(libc::EROFS);
    }
}
