//! Errors returned by remote entry clients.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failure of a single remote call.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The daemon socket could not be reached.
    #[error("cannot connect to LXD socket {}: {source}", socket.display())]
    Connection {
        socket: PathBuf,
        #[source]
        source: io::Error,
    },

    /// HTTP-level failure on an established connection.
    #[error("HTTP exchange with LXD failed: {0}")]
    Http(#[from] hyper::Error),

    /// The request could not be built (invalid container name, etc.).
    #[error("invalid LXD request: {0}")]
    Request(#[from] http::Error),

    /// The path does not exist in the container.
    #[error("not found: {container}:{path}")]
    NotFound { container: String, path: String },

    /// LXD answered with a non-success status.
    #[error("LXD returned status {status}: {message}")]
    Status { status: u16, message: String },

    /// The response did not carry the expected headers or body.
    #[error("malformed LXD response: {0}")]
    InvalidResponse(String),

    /// The JSON envelope could not be decoded.
    #[error("invalid JSON from LXD: {0}")]
    Json(#[from] serde_json::Error),

    /// The client's request limiter has been closed.
    #[error("LXD client is shut down")]
    Closed,
}

impl ClientError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound { .. })
    }

    pub fn is_connection(&self) -> bool {
        matches!(self, ClientError::Connection { .. })
    }

    /// HTTP status reported by LXD, if the failure carried one.
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Status { status, .. } => Some(*status),
            ClientError::NotFound { .. } => Some(404),
            _ => None,
        }
    }
}

/// Result type for remote calls.
pub type ClientResult<T> = Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let e = ClientError::NotFound {
            container: "c1".to_string(),
            path: "/missing".to_string(),
        };
        assert!(e.is_not_found());
        assert!(!e.is_connection());
        assert_eq!(e.status(), Some(404));

        let e = ClientError::Connection {
            socket: PathBuf::from("/nope.sock"),
            source: io::Error::from(io::ErrorKind::NotFound),
        };
        assert!(e.is_connection());
        assert!(!e.is_not_found());
        assert_eq!(e.status(), None);
    }

    #[test]
    fn test_display_names_the_location() {
        let e = ClientError::NotFound {
            container: "c1".to_string(),
            path: "/data/x".to_string(),
        };
        assert_eq!(e.to_string(), "not found: c1:/data/x");

        let e = ClientError::Connection {
            socket: PathBuf::from("/run/lxd.sock"),
            source: io::Error::from(io::ErrorKind::ConnectionRefused),
        };
        assert!(e.to_string().contains("/run/lxd.sock"));

        let e = ClientError::Status {
            status: 403,
            message: "not authorized".to_string(),
        };
        assert!(e.to_string().contains("403"));
        assert!(e.to_string().contains("not authorized"));
    }
}
