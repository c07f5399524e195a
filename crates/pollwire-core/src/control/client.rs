//! Control client: talks to a running session over its Unix socket.
//!
//! Uses `hyper` HTTP/1.1 directly on a `UnixStream`.

use std::path::PathBuf;

use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper_util::rt::TokioIo;
use serde::de::DeserializeOwned;
use tokio::net::UnixStream;
use tracing::debug;

use super::types::*;

/// Errors from the control client.
#[derive(Debug, thiserror::Error)]
pub enum ControlClientError {
    #[error("failed to connect to control socket at {path}: {source}")]
    Connect {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("no session is running (socket not found at {0})")]
    NotRunning(PathBuf),

    #[error("request failed: {0}")]
    Request(String),

    #[error("failed to parse response: {0}")]
    Parse(String),

    #[error("session returned error: {0}")]
    Session(String),
}

/// Client for the control socket of a running `pollwire` session.
pub struct ControlClient {
    socket_path: PathBuf,
}

impl ControlClient {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

    /// Whether the socket file exists.
    pub fn session_available(&self) -> bool {
        self.socket_path.exists()
    }

    async fn request(
        &self,
        method: hyper::Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> Result<Bytes, ControlClientError> {
        if !self.session_available() {
            return Err(ControlClientError::NotRunning(self.socket_path.clone()));
        }

        let stream = UnixStream::connect(&self.socket_path)
            .await
            .map_err(|source| ControlClientError::Connect {
                path: self.socket_path.clone(),
                source,
            })?;

        let (mut sender, conn) =
            hyper::client::conn::http1::handshake::<_, Full<Bytes>>(TokioIo::new(stream))
                .await
                .map_err(|e| ControlClientError::Request(format!("HTTP handshake failed: {e}")))?;

        tokio::spawn(async move {
            if let Err(e) = conn.await {
                tracing::warn!(error = %e, "Control connection error");
            }
        });

        debug!(%method, path, "Control request");

        let mut builder = hyper::Request::builder()
            .method(method)
            .uri(path)
            .header("host", "localhost");
        if body.is_some() {
            builder = builder.header("content-type", "application/json");
        }
        let req = builder
            .body(Full::new(body.map(Bytes::from).unwrap_or_default()))
            .map_err(|e| ControlClientError::Request(format!("failed to build request: {e}")))?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| ControlClientError::Request(e.to_string()))?;

        let status = resp.status();
        let resp_body = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| ControlClientError::Request(format!("failed to read response body: {e}")))?
            .to_bytes();

        if !status.is_success() {
            if let Ok(err) = serde_json::from_slice::<ErrorResponse>(&resp_body) {
                return Err(ControlClientError::Session(err.error));
            }
            return Err(ControlClientError::Request(format!(
                "unexpected status: {status}"
            )));
        }

        Ok(resp_body)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ControlClientError> {
        let body = self.request(hyper::Method::GET, path, None).await?;
        parse(path, &body)
    }

    pub async fn health(&self) -> Result<HealthResponse, ControlClientError> {
        self.get("/health").await
    }

    pub async fn status(&self) -> Result<StatusResponse, ControlClientError> {
        self.get("/status").await
    }

    /// Ask the session to stop.
    pub async fn stop(&self) -> Result<StopResponse, ControlClientError> {
        let body = self.request(hyper::Method::POST, "/stop", None).await?;
        parse("/stop", &body)
    }

    /// Queue `data` under `tag` on the running session.
    pub async fn write(&self, tag: &str, data: &str) -> Result<WriteResponse, ControlClientError> {
        let req = WriteRequest {
            tag: tag.to_string(),
            data: data.to_string(),
        };
        let bytes = serde_json::to_vec(&req)
            .map_err(|e| ControlClientError::Parse(format!("failed to serialize request: {e}")))?;
        let body = self
            .request(hyper::Method::POST, "/write", Some(bytes))
            .await?;
        parse("/write", &body)
    }

    pub async fn config(&self) -> Result<ConfigResponse, ControlClientError> {
        self.get("/config").await
    }
}

fn parse<T: DeserializeOwned>(path: &str, body: &[u8]) -> Result<T, ControlClientError> {
    serde_json::from_slice(body).map_err(|e| ControlClientError::Parse(format!("{path}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use pollwire_config::AppConfig;

    use super::super::server::{self, ControlState};
    use crate::session::{Session, SessionOptions, SessionState};
    use crate::transport::MemoryTransport;

    #[test]
    fn test_client_creation() {
        let client = ControlClient::new("/tmp/test-pollwire-missing.sock");
        assert!(!client.session_available());
    }

    #[tokio::test]
    async fn test_client_not_running_error() {
        let client = ControlClient::new("/tmp/nonexistent-pollwire.sock");
        let result = client.health().await;
        assert!(matches!(result, Err(ControlClientError::NotRunning(_))));
    }

    #[tokio::test]
    async fn test_integration_server_client() {
        pollwire_test_utils::tracing_setup::init_test_tracing();
        let dir = tempfile::tempdir().unwrap();
        let sock_path = dir.path().join("control.sock");

        let (transport, _peer) = MemoryTransport::pair();
        let options = SessionOptions {
            queue_capacity: 1,
            ..Default::default()
        };
        let session = Session::new(Arc::new(transport), options);
        let state = Arc::new(ControlState::new(session.clone(), AppConfig::default()));

        let server_path = sock_path.clone();
        let server_handle = tokio::spawn(async move { server::serve(&server_path, state).await });

        let client = ControlClient::new(&sock_path);
        tokio::time::timeout(Duration::from_secs(2), async {
            while !client.session_available() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        let health = client.health().await.unwrap();
        assert_eq!(health.status, "ok");

        let written = client.write("ping", "1").await.unwrap();
        assert!(written.accepted);
        assert_eq!(written.pending, 1);

        // Capacity 1: the second write is refused, not queued.
        let full = client.write("ping", "2").await;
        assert!(matches!(full, Err(ControlClientError::Session(_))));

        let status = client.status().await.unwrap();
        assert_eq!(status.session.state, SessionState::Idle);
        assert_eq!(status.session.pending.get("ping"), Some(&1));

        let config = client.config().await.unwrap();
        assert!(config.toml.contains("[endpoint]"));

        let stop = client.stop().await.unwrap();
        assert!(stop.acknowledged);
        assert_eq!(session.state(), SessionState::Stopped);

        tokio::time::timeout(Duration::from_secs(2), server_handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(!sock_path.exists());
    }
}
