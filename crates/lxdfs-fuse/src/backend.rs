//! Mounting an [`LxdFs`] with fuser.
//!
//! [`FuseBackend`] checks that FUSE is present, builds the mount options,
//! spawns the background session and waits until the kernel answers on the
//! mountpoint. Dropping the returned [`FuseMountHandle`] unmounts.

use crate::config::MountConfig;
use crate::filesystem::LxdFs;
use fuser::{BackgroundSession, MountOption};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::debug;

/// Handle to a mounted filesystem.
///
/// Wraps the fuser `BackgroundSession`. Dropping this handle triggers unmount.
pub struct FuseMountHandle {
    session: Option<BackgroundSession>,
    mountpoint: PathBuf,
}

impl FuseMountHandle {
    pub fn mountpoint(&self) -> &Path {
        &self.mountpoint
    }

    /// Unmounts and waits for the session thread to finish.
    pub fn unmount(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(session) = self.session.take() {
            debug!("Unmounting FUSE filesystem at {}", self.mountpoint.display());
            self.force_unmount();
            // Give the lazy unmount a moment before joining
            std::thread::sleep(Duration::from_millis(100));
            session.join();
        }
    }

    /// Lazily detaches the mount so busy handles cannot block the join.
    fn force_unmount(&self) {
        #[cfg(target_os = "linux")]
        {
            let _ = std::process::Command::new("fusermount")
                .arg("-uz")
                .arg(&self.mountpoint)
                .output();
        }

        #[cfg(target_os = "macos")]
        {
            let _ = std::process::Command::new("umount")
                .arg("-f")
                .arg(&self.mountpoint)
                .output();
        }
    }
}

impl Drop for FuseMountHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// FUSE-based mounting backend.
#[derive(Debug, Clone, Copy)]
pub struct FuseBackend {
    /// Timeout for waiting for mount readiness
    pub mount_timeout: Duration,
    /// Polling interval when waiting for mount
    pub poll_interval: Duration,
}

impl Default for FuseBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl FuseBackend {
    pub fn new() -> Self {
        Self {
            mount_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(50),
        }
    }

    pub fn with_timeouts(mount_timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            mount_timeout,
            poll_interval,
        }
    }

    pub fn is_available(&self) -> bool {
        #[cfg(target_os = "macos")]
        {
            Path::new("/Library/Filesystems/macfuse.fs").exists()
        }
        #[cfg(target_os = "linux")]
        {
            Path::new("/dev/fuse").exists()
        }
        #[cfg(not(any(target_os = "macos", target_os = "linux")))]
        {
            false
        }
    }

    pub fn unavailable_reason(&self) -> Option<String> {
        if self.is_available() {
            return None;
        }

        #[cfg(target_os = "macos")]
        {
            Some(
                "macFUSE is not installed. Download it from https://osxfuse.github.io/".to_string(),
            )
        }
        #[cfg(target_os = "linux")]
        {
            Some("FUSE is not available. Ensure the fuse kernel module is loaded.".to_string())
        }
        #[cfg(not(any(target_os = "macos", target_os = "linux")))]
        {
            Some("FUSE is not supported on this platform.".to_string())
        }
    }

    /// Mounts `fs` at `mountpoint` and waits until it is usable.
    pub fn mount(&self, fs: LxdFs, mountpoint: &Path) -> io::Result<FuseMountHandle> {
        if !self.is_available() {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                self.unavailable_reason().unwrap_or_default(),
            ));
        }

        let options = mount_options(fs.container(), fs.config());
        let session = fuser::spawn_mount2(fs, mountpoint, &options)?;
        let handle = FuseMountHandle {
            session: Some(session),
            mountpoint: mountpoint.to_path_buf(),
        };

        self.wait_for_mount(mountpoint)?;
        Ok(handle)
    }

    /// Polls until a filesystem is mounted at `mountpoint`.
    fn wait_for_mount(&self, mountpoint: &Path) -> io::Result<()> {
        let deadline = Instant::now() + self.mount_timeout;

        while Instant::now() < deadline {
            if is_mounted(mountpoint) {
                debug!(mountpoint = %mountpoint.display(), "mount is active");
                return Ok(());
            }
            std::thread::sleep(self.poll_interval);
        }

        Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!(
                "FUSE mount did not become ready within {:?}",
                self.mount_timeout
            ),
        ))
    }
}

/// Whether `path` is the root of a mount, i.e. lives on a different device
/// than its parent.
///
/// Stat-based rather than mount table parsing. An empty directory that was
/// never mounted lists fine, so listing it proves nothing.
#[cfg(unix)]
fn is_mounted(path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;

    let parent = match path.parent() {
        Some(parent) if parent.as_os_str().is_empty() => Path::new("."),
        Some(parent) => parent,
        None => return false,
    };

    match (std::fs::metadata(path), std::fs::metadata(parent)) {
        (Ok(path_meta), Ok(parent_meta)) => path_meta.dev() != parent_meta.dev(),
        _ => false,
    }
}

#[cfg(not(unix))]
fn is_mounted(path: &Path) -> bool {
    std::fs::read_dir(path).is_ok()
}

/// Mount options for one container mount.
pub fn mount_options(container: &str, config: &MountConfig) -> Vec<MountOption> {
    let mut options = vec![
        MountOption::FSName(format!("lxd:{container}")),
        MountOption::Subtype("lxdfs".to_string()),
        MountOption::RO,
        MountOption::AutoUnmount,
    ];

    if config.allow_other {
        options.push(MountOption::AllowOther);
    }

    #[cfg(target_os = "macos")]
    options.push(MountOption::CUSTOM(format!("volname={container}")));

    options
}
