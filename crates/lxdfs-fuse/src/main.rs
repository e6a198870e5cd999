//! lxdfs - Mount a directory of an LXD container as a read-only filesystem.
//!
//! Usage: lxdfs <MOUNTPOINT> <CONTAINER> <CONTAINERROOT>
//!
//! Logging follows `RUST_LOG` when set, otherwise `info` (`debug` with
//! `--debug`).

use anyhow::{Context, Result};
use clap::Parser;
use lxdfs_client::{CachingClient, LxdClient, LxdClientConfig, RemoteEntryClient};
use lxdfs_fuse::{FuseBackend, LxdFs, MountConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "lxdfs")]
#[command(about = "Mount a directory of an LXD container as a read-only filesystem")]
#[command(version)]
struct Cli {
    /// Local directory to mount on
    mountpoint: PathBuf,

    /// Name of the LXD instance
    container: String,

    /// Directory inside the container to expose as the mount root
    container_root: String,

    /// Path of the LXD daemon socket (default: discovered like `lxc` does)
    #[arg(long, env = "LXD_SOCKET")]
    socket: Option<PathBuf>,

    /// LXD project the instance belongs to
    #[arg(long, env = "LXD_PROJECT")]
    project: Option<String>,

    /// Timeout for each remote-backed operation, in seconds
    #[arg(long, env = "LXDFS_TIMEOUT_SECS", default_value_t = 30)]
    timeout_secs: u64,

    /// Attribute and entry TTL handed to the kernel, in seconds
    #[arg(long, env = "LXDFS_ATTR_TTL_SECS", default_value_t = 1)]
    attr_ttl_secs: u64,

    /// Keep fetched entries this many seconds (0 disables the cache)
    #[arg(long, env = "LXDFS_CACHE_TTL_SECS", default_value_t = 0)]
    cache_ttl_secs: u64,

    /// Maximum concurrent requests to the daemon
    #[arg(long, env = "LXDFS_CONCURRENCY", default_value_t = 16)]
    concurrency: usize,

    /// Allow other users to access the mount
    #[arg(long)]
    allow_other: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();

    run(cli)
}

fn run(cli: Cli) -> Result<()> {
    if !cli.mountpoint.is_dir() {
        anyhow::bail!("Mountpoint is not a directory: {}", cli.mountpoint.display());
    }

    let config = MountConfig::default()
        .attr_ttl(Duration::from_secs(cli.attr_ttl_secs))
        .io_timeout(Duration::from_secs(cli.timeout_secs))
        .concurrency_limit(cli.concurrency)
        .cache_ttl(Duration::from_secs(cli.cache_ttl_secs))
        .allow_other(cli.allow_other);

    let mut client_config = match &cli.socket {
        Some(socket) => LxdClientConfig::new(socket),
        None => LxdClientConfig::discover(),
    }
    .max_in_flight(config.concurrency_limit);
    if let Some(project) = &cli.project {
        client_config = client_config.project(project);
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("lxdfs-io")
        .build()
        .context("Failed to create tokio runtime")?;

    let lxd = runtime
        .block_on(LxdClient::connect(client_config))
        .context("Failed to reach the LXD daemon")?;
    info!(
        socket = %lxd.config().socket.display(),
        project = lxd.config().project.as_deref().unwrap_or("default"),
        "Connected to LXD"
    );

    let client: Arc<dyn RemoteEntryClient> = if config.caching_enabled() {
        info!(ttl = ?config.cache_ttl, "Entry cache enabled");
        Arc::new(CachingClient::new(lxd, config.cache_ttl, config.cache_capacity))
    } else {
        Arc::new(lxd)
    };

    info!(
        container = %cli.container,
        root = %cli.container_root,
        mount = %cli.mountpoint.display(),
        "Mounting container directory"
    );
    let fs = LxdFs::with_runtime_handle(
        client,
        &cli.container,
        &cli.container_root,
        config,
        runtime.handle().clone(),
    )
    .with_context(|| format!("Failed to open {}:{}", cli.container, cli.container_root))?;

    // Set up channel for signal handling
    let (tx, rx) = mpsc::channel::<()>();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("Failed to set signal handler")?;

    let handle = FuseBackend::new().mount(fs, &cli.mountpoint).map_err(|e| {
        error!(error = %e, "Mount failed");
        anyhow::anyhow!("Failed to mount filesystem: {e}")
    })?;

    info!("Filesystem mounted at {} (press Ctrl+C to unmount)", handle.mountpoint().display());

    match rx.recv() {
        Ok(()) => info!("Received interrupt signal, unmounting..."),
        Err(_) => warn!("Signal channel closed unexpectedly"),
    }

    handle.unmount();
    info!("Filesystem unmounted");
    Ok(())
}
