//! Runs remote-backed async work from synchronous FUSE callbacks.
//!
//! [`AsyncBridge::spawn`] is what the kernel callbacks use: the future runs
//! on the tokio runtime under the per-operation timeout and its result is
//! handed to a completion closure on the runtime, so the FUSE session thread
//! never waits on the remote. [`AsyncBridge::run`] is the blocking form for
//! callers outside the session loop, such as mount-time root resolution.
//! Timed-out tasks are aborted so a stalled socket never keeps a request slot.

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::warn;

/// Counters for bridged operations.
#[derive(Debug, Default)]
pub struct BridgeStats {
    pub started: AtomicU64,
    pub completed: AtomicU64,
    pub timed_out: AtomicU64,
}

impl BridgeStats {
    /// Returns `(started, completed, timed_out)`.
    pub fn snapshot(&self) -> (u64, u64, u64) {
        (
            self.started.load(Ordering::Relaxed),
            self.completed.load(Ordering::Relaxed),
            self.timed_out.load(Ordering::Relaxed),
        )
    }
}

/// Error from the bridge itself, as opposed to the bridged operation.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("operation was cancelled")]
    Cancelled,
}

impl BridgeError {
    pub fn to_errno(&self) -> i32 {
        match self {
            BridgeError::Timeout(_) => libc::ETIMEDOUT,
            BridgeError::Cancelled => libc::ECANCELED,
        }
    }
}

/// Sync-to-async bridge bound to one runtime and one timeout.
#[derive(Debug)]
pub struct AsyncBridge {
    handle: Handle,
    timeout: Duration,
    stats: Arc<BridgeStats>,
}

impl AsyncBridge {
    pub fn new(handle: Handle, timeout: Duration) -> Self {
        Self {
            handle,
            timeout,
            stats: Arc::new(BridgeStats::default()),
        }
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn stats(&self) -> &BridgeStats {
        &self.stats
    }

    /// Runs `future` on the runtime and hands its result to `complete`.
    ///
    /// Returns immediately. `complete` runs exactly once on a runtime thread,
    /// with `Timeout` if the deadline passed and `Cancelled` if the future
    /// panicked.
    pub fn spawn<F, T, C>(&self, future: F, complete: C)
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
        C: FnOnce(Result<T, BridgeError>) + Send + 'static,
    {
        self.stats.started.fetch_add(1, Ordering::Relaxed);

        let timeout = self.timeout;
        let stats = Arc::clone(&self.stats);
        self.handle.spawn(async move {
            let guarded = AssertUnwindSafe(future).catch_unwind();
            let result = match tokio::time::timeout(timeout, guarded).await {
                Ok(Ok(value)) => {
                    stats.completed.fetch_add(1, Ordering::Relaxed);
                    Ok(value)
                }
                Ok(Err(_panic)) => Err(BridgeError::Cancelled),
                Err(_elapsed) => {
                    stats.timed_out.fetch_add(1, Ordering::Relaxed);
                    warn!(?timeout, "remote operation timed out");
                    Err(BridgeError::Timeout(timeout))
                }
            };
            complete(result);
        });
    }

    /// Runs `future` to completion on the runtime, blocking this thread.
    ///
    /// Must not be called from inside the runtime's own worker threads.
    pub fn run<F, T>(&self, future: F) -> Result<T, BridgeError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        self.stats.started.fetch_add(1, Ordering::Relaxed);

        let timeout = self.timeout;
        let (tx, rx) = oneshot::channel();
        let task = self.handle.spawn(async move {
            let result = tokio::time::timeout(timeout, future).await;
            // The receiver is gone only if the caller already gave up.
            let _ = tx.send(result);
        });

        match rx.blocking_recv() {
            Ok(Ok(value)) => {
                self.stats.completed.fetch_add(1, Ordering::Relaxed);
                Ok(value)
            }
            Ok(Err(_elapsed)) => {
                task.abort();
                self.stats.timed_out.fetch_add(1, Ordering::Relaxed);
                warn!(?timeout, "remote operation timed out");
                Err(BridgeError::Timeout(timeout))
            }
            Err(_) => {
                task.abort();
                Err(BridgeError::Cancelled)
            }
        }
    }
}
