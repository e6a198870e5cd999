//! LXD daemon client over the local unix socket.
//!
//! Each request opens its own connection to the socket, so the client holds
//! no shared connection state and can be used from any number of tasks. A
//! semaphore bounds the number of requests in flight.

use crate::client::RemoteEntryClient;
use crate::entry::{EntryDescriptor, EntryKind, RemoteEntry};
use crate::error::{ClientError, ClientResult};
use crate::path::RemotePath;
use async_trait::async_trait;
use bytes::Bytes;
use http::header::{HOST, HeaderMap, USER_AGENT};
use http::{Method, Request, Response};
use http_body_util::{BodyExt, Empty};
use hyper::client::conn::http1;
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::UnixStream;
use tokio::sync::Semaphore;
use tracing::{debug, trace};

/// Socket of the snap-packaged daemon.
pub const SNAP_SOCKET: &str = "/var/snap/lxd/common/lxd/unix.socket";

/// Socket of a distribution-packaged daemon.
pub const DEFAULT_SOCKET: &str = "/var/lib/lxd/unix.socket";

/// Default bound on concurrent requests to the daemon.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 16;

const HEADER_UID: &str = "x-lxd-uid";
const HEADER_GID: &str = "x-lxd-gid";
const HEADER_MODE: &str = "x-lxd-mode";
const HEADER_TYPE: &str = "x-lxd-type";

const CLIENT_AGENT: &str = concat!("lxdfs/", env!("CARGO_PKG_VERSION"));

/// Connection settings for [`LxdClient`].
#[derive(Debug, Clone)]
pub struct LxdClientConfig {
    /// Path of the daemon's unix socket.
    pub socket: PathBuf,
    /// LXD project the instance lives in (`default` when unset).
    pub project: Option<String>,
    /// Maximum requests in flight at once.
    pub max_in_flight: usize,
}

impl LxdClientConfig {
    pub fn new(socket: impl Into<PathBuf>) -> Self {
        Self {
            socket: socket.into(),
            project: None,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }

    /// Locates the daemon socket the way the `lxc` tool does.
    ///
    /// `$LXD_DIR/unix.socket` wins; otherwise the snap socket is used when
    /// present, falling back to the distribution path.
    pub fn discover() -> Self {
        if let Some(dir) = std::env::var_os("LXD_DIR") {
            return Self::new(PathBuf::from(dir).join("unix.socket"));
        }
        if Path::new(SNAP_SOCKET).exists() {
            Self::new(SNAP_SOCKET)
        } else {
            Self::new(DEFAULT_SOCKET)
        }
    }

    #[must_use]
    pub fn project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    #[must_use]
    pub fn max_in_flight(mut self, limit: usize) -> Self {
        self.max_in_flight = limit.max(1);
        self
    }
}

impl Default for LxdClientConfig {
    fn default() -> Self {
        Self::discover()
    }
}

/// Standard LXD response envelope.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    error: String,
    #[serde(default)]
    error_code: u16,
    metadata: Option<T>,
}

/// Client for the LXD instance file API.
#[derive(Debug, Clone)]
pub struct LxdClient {
    config: LxdClientConfig,
    permits: Arc<Semaphore>,
}

impl LxdClient {
    /// Creates a client without contacting the daemon.
    pub fn new(config: LxdClientConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_in_flight.max(1)));
        Self { config, permits }
    }

    /// Creates a client and verifies the daemon answers on its socket.
    pub async fn connect(config: LxdClientConfig) -> ClientResult<Self> {
        let client = Self::new(config);
        client.ping().await?;
        Ok(client)
    }

    pub fn config(&self) -> &LxdClientConfig {
        &self.config
    }

    /// Issues `GET /1.0` and checks for a successful sync response.
    pub async fn ping(&self) -> ClientResult<()> {
        let response = self.get("/1.0").await?;
        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status.as_u16(), response.body()));
        }
        let envelope: Envelope<serde_json::Value> = serde_json::from_slice(response.body())?;
        if envelope.kind == "error" {
            return Err(ClientError::Status {
                status: envelope.error_code,
                message: envelope.error,
            });
        }
        debug!(socket = %self.config.socket.display(), "LXD daemon reachable");
        Ok(())
    }

    /// Builds the request target for a file API call.
    fn files_uri(&self, container: &str, path: &RemotePath) -> String {
        let mut query = url::form_urlencoded::Serializer::new(String::new());
        query.append_pair("path", path.as_str());
        if let Some(project) = &self.config.project {
            query.append_pair("project", project);
        }
        let instance: String = url::form_urlencoded::byte_serialize(container.as_bytes()).collect();
        format!("/1.0/instances/{instance}/files?{}", query.finish())
    }

    /// Performs one `GET` on a fresh socket connection and collects the body.
    async fn get(&self, uri: &str) -> ClientResult<Response<Bytes>> {
        let _permit = self.permits.acquire().await.map_err(|_| ClientError::Closed)?;

        let stream = UnixStream::connect(&self.config.socket)
            .await
            .map_err(|source| ClientError::Connection {
                socket: self.config.socket.clone(),
                source,
            })?;

        let (mut sender, connection) = http1::handshake(TokioIo::new(stream)).await?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                debug!(error = %e, "LXD connection closed with error");
            }
        });

        let request = Request::builder()
            .method(Method::GET)
            .uri(uri)
            .header(HOST, "lxd")
            .header(USER_AGENT, CLIENT_AGENT)
            .body(Empty::<Bytes>::new())?;

        trace!(uri, "LXD request");
        let response = sender.send_request(request).await?;
        let (parts, body) = response.into_parts();
        let body = body.collect().await?.to_bytes();
        Ok(Response::from_parts(parts, body))
    }
}

#[async_trait]
impl RemoteEntryClient for LxdClient {
    async fn fetch_entry(&self, container: &str, path: &RemotePath) -> ClientResult<RemoteEntry> {
        let uri = self.files_uri(container, path);
        debug!(container, path = %path, "fetching remote entry");

        let response = self.get(&uri).await?;
        let status = response.status();
        if status.as_u16() == 404 {
            return Err(ClientError::NotFound {
                container: container.to_string(),
                path: path.to_string(),
            });
        }
        if !status.is_success() {
            return Err(status_error(status.as_u16(), response.body()));
        }

        let mut descriptor = parse_file_headers(response.headers())?;
        let content = response.into_body();
        if descriptor.kind == EntryKind::Directory {
            descriptor.children = parse_listing(&content)?;
            return Ok(RemoteEntry::new(descriptor, Bytes::new()));
        }
        Ok(RemoteEntry::new(descriptor, content))
    }
}

/// Reads owner, mode and kind from the `X-LXD-*` response headers.
pub(crate) fn parse_file_headers(headers: &HeaderMap) -> ClientResult<EntryDescriptor> {
    let uid = header_str(headers, HEADER_UID)?;
    let gid = header_str(headers, HEADER_GID)?;
    let mode = header_str(headers, HEADER_MODE)?;
    let kind = header_str(headers, HEADER_TYPE)?;

    Ok(EntryDescriptor {
        kind: EntryKind::from_wire(kind),
        uid: parse_id(HEADER_UID, uid)?,
        gid: parse_id(HEADER_GID, gid)?,
        mode: parse_mode(mode)
            .ok_or_else(|| ClientError::InvalidResponse(format!("bad {HEADER_MODE}: {mode:?}")))?,
        children: Vec::new(),
    })
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> ClientResult<&'a str> {
    headers
        .get(name)
        .ok_or_else(|| ClientError::InvalidResponse(format!("missing {name} header")))?
        .to_str()
        .map_err(|_| ClientError::InvalidResponse(format!("non-ASCII {name} header")))
}

fn parse_id(name: &str, raw: &str) -> ClientResult<u32> {
    raw.trim()
        .parse()
        .map_err(|_| ClientError::InvalidResponse(format!("bad {name}: {raw:?}")))
}

/// Parses the octal mode LXD sends (`0644`, `644` or `0o644`).
pub(crate) fn parse_mode(raw: &str) -> Option<u32> {
    let raw = raw.trim();
    let digits = raw.strip_prefix("0o").unwrap_or(raw);
    if digits.is_empty() {
        return None;
    }
    u32::from_str_radix(digits, 8).ok().map(|mode| mode & 0o7777)
}

/// Decodes a directory listing envelope into child names.
pub(crate) fn parse_listing(body: &[u8]) -> ClientResult<Vec<String>> {
    let envelope: Envelope<Vec<String>> = serde_json::from_slice(body)?;
    if envelope.kind == "error" {
        return Err(ClientError::Status {
            status: envelope.error_code,
            message: envelope.error,
        });
    }
    Ok(envelope.metadata.unwrap_or_default())
}

/// Builds a status error, preferring the message from an LXD error envelope.
fn status_error(status: u16, body: &[u8]) -> ClientError {
    let message = match serde_json::from_slice::<Envelope<serde_json::Value>>(body) {
        Ok(envelope) if !envelope.error.is_empty() => envelope.error,
        _ => String::from_utf8_lossy(body).trim().to_string(),
    };
    ClientError::Status { status, message }
}
