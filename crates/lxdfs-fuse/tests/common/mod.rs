//! In-memory remote for node and filesystem tests.
//!
//! `MockRemote` serves a fake container tree through the same
//! `RemoteEntryClient` contract the LXD client implements, with knobs for
//! injecting failures, stalls and latency and for counting calls.

// Not all test binaries use every helper
#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use fuser::FileAttr;
use lxdfs_client::{
    ClientError, ClientResult, EntryDescriptor, EntryKind, RemoteEntry, RemoteEntryClient,
    RemotePath,
};
use lxdfs_fuse::{FsResult, ListedEntry, LxdFs, MountState, NodeAttr};
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Container every fixture lives in.
pub const CONTAINER: &str = "c1";

/// Content of `/data/a.txt` in [`scenario`].
pub const A_TXT: &[u8] = b"hello from c1\n";

/// Injected failure for one path.
#[derive(Debug, Clone, Copy)]
pub enum Failure {
    /// LXD answers with this HTTP status.
    Status(u16),
    /// The socket cannot be reached.
    Connection,
    /// The call never completes.
    Stall,
}

#[derive(Default)]
pub struct MockRemote {
    entries: Mutex<HashMap<String, RemoteEntry>>,
    failures: Mutex<HashMap<String, Failure>>,
    calls: Mutex<HashMap<String, usize>>,
    latency: Mutex<Option<Duration>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockRemote {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_dir(self, path: &str, children: &[&str]) -> Self {
        let descriptor = EntryDescriptor::directory(children.iter().copied());
        self.put(path, RemoteEntry::new(descriptor, Bytes::new()));
        self
    }

    #[must_use]
    pub fn with_file(self, path: &str, content: &[u8]) -> Self {
        self.set_file(path, content);
        self
    }

    #[must_use]
    pub fn with_entry(self, path: &str, entry: RemoteEntry) -> Self {
        self.put(path, entry);
        self
    }

    pub fn put(&self, path: &str, entry: RemoteEntry) {
        self.entries
            .lock()
            .unwrap()
            .insert(RemotePath::new(path).to_string(), entry);
    }

    pub fn set_file(&self, path: &str, content: &[u8]) {
        self.put(
            path,
            RemoteEntry::new(EntryDescriptor::file(), Bytes::copy_from_slice(content)),
        );
    }

    pub fn remove(&self, path: &str) {
        self.entries
            .lock()
            .unwrap()
            .remove(RemotePath::new(path).as_str());
    }

    pub fn fail(&self, path: &str, failure: Failure) {
        self.failures
            .lock()
            .unwrap()
            .insert(RemotePath::new(path).to_string(), failure);
    }

    pub fn heal(&self, path: &str) {
        self.failures
            .lock()
            .unwrap()
            .remove(RemotePath::new(path).as_str());
    }

    /// Makes every call take at least `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = Some(latency);
    }

    /// Total calls so far.
    pub fn calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    pub fn calls_for(&self, path: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .get(RemotePath::new(path).as_str())
            .copied()
            .unwrap_or(0)
    }

    /// Highest number of calls observed running at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn lookup(&self, container: &str, path: &RemotePath) -> ClientResult<RemoteEntry> {
        let not_found = || ClientError::NotFound {
            container: container.to_string(),
            path: path.to_string(),
        };
        if container != CONTAINER {
            return Err(not_found());
        }
        self.entries
            .lock()
            .unwrap()
            .get(path.as_str())
            .cloned()
            .ok_or_else(not_found)
    }
}

#[async_trait]
impl RemoteEntryClient for MockRemote {
    async fn fetch_entry(&self, container: &str, path: &RemotePath) -> ClientResult<RemoteEntry> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_default() += 1;

        let failure = self.failures.lock().unwrap().get(path.as_str()).copied();
        match failure {
            Some(Failure::Status(status)) => {
                return Err(ClientError::Status {
                    status,
                    message: format!("injected {status}"),
                });
            }
            Some(Failure::Connection) => {
                return Err(ClientError::Connection {
                    socket: PathBuf::from("/var/lib/lxd/unix.socket"),
                    source: io::Error::from(io::ErrorKind::ConnectionRefused),
                });
            }
            Some(Failure::Stall) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            None => {}
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let latency = *self.latency.lock().unwrap();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        self.lookup(container, path)
    }
}

/// Container `c1` with subtree `/data` holding `a.txt` and `sub/`.
pub fn scenario() -> Arc<MockRemote> {
    Arc::new(
        MockRemote::new()
            .with_entry(
                "/data",
                RemoteEntry::new(
                    EntryDescriptor::directory(["a.txt", "sub"]).with_owner(1000, 1000),
                    Bytes::new(),
                ),
            )
            .with_entry(
                "/data/a.txt",
                RemoteEntry::new(
                    EntryDescriptor::file().with_owner(1000, 100).with_mode(0o640),
                    A_TXT,
                ),
            )
            .with_dir("/data/sub", &["deep.txt"])
            .with_file("/data/sub/deep.txt", b"deep"),
    )
}

/// A symlink entry, which the filesystem hides.
pub fn symlink_entry() -> RemoteEntry {
    RemoteEntry::new(EntryDescriptor::of_kind(EntryKind::Symlink), &b"/etc/target"[..])
}

/// Blocking forms of the kernel operations, for driving `LxdFs` without a
/// mount. Each call runs on the filesystem's runtime under its timeout.
pub trait BlockingOps {
    fn lookup_entry(&self, parent: u64, name: &str) -> FsResult<FileAttr>;
    fn getattr_entry(&self, ino: u64) -> FsResult<FileAttr>;
    fn list_entries(&self, ino: u64) -> FsResult<Vec<ListedEntry>>;
    fn open_dir(&self, ino: u64) -> FsResult<u64>;
    fn dir_listing(&self, ino: u64, fh: u64) -> FsResult<Arc<Vec<ListedEntry>>>;
    fn open_file(&self, ino: u64, flags: i32) -> FsResult<u64>;
    fn read_handle(&self, fh: u64, offset: i64, size: u32) -> FsResult<Bytes>;
    fn release_handle(&self, fh: u64);
    fn release_dir(&self, fh: u64);
    fn check_access(&self, ino: u64, mask: i32) -> FsResult<()>;
    fn open_file_count(&self) -> usize;
    fn make_attr(&self, attr: &NodeAttr) -> FileAttr;
}

fn block<T, W, Fut>(fs: &LxdFs, work: W) -> FsResult<T>
where
    W: FnOnce(Arc<MountState>) -> Fut,
    Fut: Future<Output = FsResult<T>> + Send + 'static,
    T: Send + 'static,
{
    fs.bridge().run(work(Arc::clone(fs.state())))?
}

impl BlockingOps for LxdFs {
    fn lookup_entry(&self, parent: u64, name: &str) -> FsResult<FileAttr> {
        let name = name.to_string();
        block(self, move |state| async move { state.lookup(parent, &name).await })
    }

    fn getattr_entry(&self, ino: u64) -> FsResult<FileAttr> {
        block(self, move |state| async move { state.getattr(ino).await })
    }

    fn list_entries(&self, ino: u64) -> FsResult<Vec<ListedEntry>> {
        block(self, move |state| async move { state.list_entries(ino).await })
    }

    fn open_dir(&self, ino: u64) -> FsResult<u64> {
        block(self, move |state| async move { state.open_dir(ino).await })
    }

    fn dir_listing(&self, ino: u64, fh: u64) -> FsResult<Arc<Vec<ListedEntry>>> {
        block(self, move |state| async move { state.dir_listing(ino, fh).await })
    }

    fn open_file(&self, ino: u64, flags: i32) -> FsResult<u64> {
        block(self, move |state| async move { state.open_file(ino, flags).await })
    }

    fn read_handle(&self, fh: u64, offset: i64, size: u32) -> FsResult<Bytes> {
        self.state().read_handle(fh, offset, size)
    }

    fn release_handle(&self, fh: u64) {
        self.state().release_handle(fh);
    }

    fn release_dir(&self, fh: u64) {
        self.state().release_dir(fh);
    }

    fn check_access(&self, ino: u64, mask: i32) -> FsResult<()> {
        self.state().check_access(ino, mask)
    }

    fn open_file_count(&self) -> usize {
        self.state().open_file_count()
    }

    fn make_attr(&self, attr: &NodeAttr) -> FileAttr {
        self.state().make_attr(attr)
    }
}
