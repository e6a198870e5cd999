//! LxdClient against a fake daemon listening on a unix socket.
//!
//! The fake daemon answers each connection with one canned HTTP/1.1
//! response and closes, which is all the client needs.

#![cfg(unix)]

use lxdfs_client::{
    ClientError, EntryKind, LxdClient, LxdClientConfig, RemoteEntryClient, RemotePath,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixListener;

struct Canned {
    status: u16,
    headers: Vec<(&'static str, String)>,
    body: Vec<u8>,
}

impl Canned {
    fn json(status: u16, body: &str) -> Self {
        Self {
            status,
            headers: vec![("Content-Type", "application/json".to_string())],
            body: body.as_bytes().to_vec(),
        }
    }

    fn entry(kind: &str, uid: u32, gid: u32, mode: &str, body: &[u8]) -> Self {
        Self {
            status: 200,
            headers: vec![
                ("X-LXD-uid", uid.to_string()),
                ("X-LXD-gid", gid.to_string()),
                ("X-LXD-mode", mode.to_string()),
                ("X-LXD-type", kind.to_string()),
            ],
            body: body.to_vec(),
        }
    }
}

/// A fake daemon socket in a temp directory.
struct FakeDaemon {
    _dir: TempDir,
    socket: PathBuf,
    requests: Arc<Mutex<Vec<String>>>,
}

impl FakeDaemon {
    fn start<F>(handler: F) -> Self
    where
        F: Fn(&str) -> Canned + Send + Sync + 'static,
    {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("unix.socket");
        let listener = UnixListener::bind(&socket).unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));

        let handler = Arc::new(handler);
        let seen = Arc::clone(&requests);
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let handler = Arc::clone(&handler);
                let seen = Arc::clone(&seen);
                tokio::spawn(async move {
                    let mut head = Vec::new();
                    let mut chunk = [0u8; 1024];
                    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                        match stream.read(&mut chunk).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => head.extend_from_slice(&chunk[..n]),
                        }
                    }
                    let head = String::from_utf8_lossy(&head).into_owned();
                    let target = head.split_whitespace().nth(1).unwrap_or_default().to_string();
                    seen.lock().unwrap().push(target.clone());

                    let canned = handler(&target);
                    let mut out = format!(
                        "HTTP/1.1 {} Canned\r\nContent-Length: {}\r\nConnection: close\r\n",
                        canned.status,
                        canned.body.len()
                    );
                    for (name, value) in &canned.headers {
                        out.push_str(&format!("{name}: {value}\r\n"));
                    }
                    out.push_str("\r\n");
                    let _ = stream.write_all(out.as_bytes()).await;
                    let _ = stream.write_all(&canned.body).await;
                    let _ = stream.shutdown().await;
                });
            }
        });

        Self {
            _dir: dir,
            socket,
            requests,
        }
    }

    fn client(&self) -> LxdClient {
        LxdClient::new(LxdClientConfig::new(&self.socket))
    }

    fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

/// Splits a request target into path and decoded query pairs.
fn split_target(target: &str) -> (String, HashMap<String, String>) {
    let (path, query) = target.split_once('?').unwrap_or((target, ""));
    let pairs = url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect();
    (path.to_string(), pairs)
}

/// Serves a tiny container tree under `/1.0/instances/c1/files`.
fn container_tree(target: &str) -> Canned {
    let (path, query) = split_target(target);
    if path == "/1.0" {
        return Canned::json(
            200,
            r#"{"type":"sync","status":"Success","status_code":200,"metadata":{"api_version":"1.0"}}"#,
        );
    }
    if path != "/1.0/instances/c1/files" {
        return Canned::json(
            404,
            r#"{"type":"error","error":"Instance not found","error_code":404}"#,
        );
    }

    match query.get("path").map(String::as_str) {
        Some("/data") => Canned::entry(
            "directory",
            0,
            0,
            "0755",
            br#"{"type":"sync","status":"Success","status_code":200,"metadata":["b.txt","a.txt","sub"]}"#,
        ),
        Some("/data/a.txt") => Canned::entry("file", 1000, 100, "0640", b"hello\n"),
        Some("/data/my file.txt") => Canned::entry("file", 0, 0, "0644", b"spaced"),
        Some("/secret") => Canned::json(
            403,
            r#"{"type":"error","error":"permission denied","error_code":403}"#,
        ),
        _ => Canned::json(
            404,
            r#"{"type":"error","error":"not found","error_code":404}"#,
        ),
    }
}

#[tokio::test]
async fn test_ping_and_connect() {
    let daemon = FakeDaemon::start(container_tree);
    daemon.client().ping().await.unwrap();

    let client = LxdClient::connect(LxdClientConfig::new(&daemon.socket))
        .await
        .unwrap();
    assert_eq!(client.config().socket, daemon.socket);
    assert!(daemon.requests().iter().all(|r| r == "/1.0"));
}

#[tokio::test]
async fn test_connect_to_missing_socket_fails() {
    let dir = tempfile::tempdir().unwrap();
    let err = LxdClient::connect(LxdClientConfig::new(dir.path().join("absent.socket")))
        .await
        .unwrap_err();
    assert!(err.is_connection(), "unexpected error: {err}");
}

#[tokio::test]
async fn test_fetch_file() {
    let daemon = FakeDaemon::start(container_tree);
    let entry = daemon
        .client()
        .fetch_entry("c1", &RemotePath::new("/data/a.txt"))
        .await
        .unwrap();

    assert_eq!(entry.descriptor.kind, EntryKind::File);
    assert_eq!(entry.descriptor.uid, 1000);
    assert_eq!(entry.descriptor.gid, 100);
    assert_eq!(entry.descriptor.mode, 0o640);
    assert!(entry.descriptor.children.is_empty());
    assert_eq!(&entry.content[..], b"hello\n");
    assert_eq!(entry.size(), 6);
}

#[tokio::test]
async fn test_fetch_directory_keeps_listing_order() {
    let daemon = FakeDaemon::start(container_tree);
    let entry = daemon
        .client()
        .fetch_entry("c1", &RemotePath::new("/data/"))
        .await
        .unwrap();

    assert_eq!(entry.descriptor.kind, EntryKind::Directory);
    assert_eq!(entry.descriptor.mode, 0o755);
    assert_eq!(entry.descriptor.children, vec!["b.txt", "a.txt", "sub"]);
    assert!(entry.content.is_empty());
}

#[tokio::test]
async fn test_path_with_space_is_encoded() {
    let daemon = FakeDaemon::start(container_tree);
    let entry = daemon
        .client()
        .fetch_entry("c1", &RemotePath::new("/data/my file.txt"))
        .await
        .unwrap();
    assert_eq!(&entry.content[..], b"spaced");
}

#[tokio::test]
async fn test_missing_path_is_not_found() {
    let daemon = FakeDaemon::start(container_tree);
    let err = daemon
        .client()
        .fetch_entry("c1", &RemotePath::new("/data/nope"))
        .await
        .unwrap_err();

    assert!(err.is_not_found());
    assert_eq!(err.to_string(), "not found: c1:/data/nope");
}

#[tokio::test]
async fn test_forbidden_path_reports_status() {
    let daemon = FakeDaemon::start(container_tree);
    let err = daemon
        .client()
        .fetch_entry("c1", &RemotePath::new("/secret"))
        .await
        .unwrap_err();

    assert!(
        matches!(
            err,
            ClientError::Status { status: 403, ref message } if message == "permission denied"
        ),
        "unexpected error: {err}"
    );
}

#[tokio::test]
async fn test_project_is_forwarded() {
    let daemon = FakeDaemon::start(container_tree);
    let client = LxdClient::new(LxdClientConfig::new(&daemon.socket).project("dev"));
    client
        .fetch_entry("c1", &RemotePath::new("/data/a.txt"))
        .await
        .unwrap();

    let requests = daemon.requests();
    let (_, query) = split_target(&requests[0]);
    assert_eq!(query.get("project").map(String::as_str), Some("dev"));
    assert_eq!(query.get("path").map(String::as_str), Some("/data/a.txt"));
}

#[tokio::test]
async fn test_missing_metadata_headers_are_rejected() {
    let daemon = FakeDaemon::start(|_| Canned::json(200, "plain body"));
    let err = daemon
        .client()
        .fetch_entry("c1", &RemotePath::new("/data/a.txt"))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::InvalidResponse(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_fetches() {
    let daemon = FakeDaemon::start(container_tree);
    let client = Arc::new(
        LxdClient::new(LxdClientConfig::new(&daemon.socket).max_in_flight(2)),
    );

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let client = Arc::clone(&client);
        tasks.push(tokio::spawn(async move {
            client
                .fetch_entry("c1", &RemotePath::new("/data/a.txt"))
                .await
        }));
    }
    for task in tasks {
        let entry = task.await.unwrap().unwrap();
        assert_eq!(&entry.content[..], b"hello\n");
    }
    assert_eq!(daemon.requests().len(), 8);
}
