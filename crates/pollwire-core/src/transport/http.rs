//! HTTP polling transport.
//!
//! Fetches with `GET <url>` and pushes with `POST <url>` carrying the encoded
//! batch as `application/json`. Any non-2xx status is a transport error.

use std::time::Duration;

use reqwest::Client;
use tracing::debug;

use pollwire_config::EndpointConfig;

use super::{Transport, TransportError};
use crate::BoxFuture;

/// Transport bound to a single HTTP endpoint.
pub struct HttpTransport {
    client: Client,
    url: String,
    timeout: Duration,
}

impl HttpTransport {
    /// Create a transport for `url` with the given per-request timeout.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
            timeout,
        })
    }

    /// Create a transport from the `[endpoint]` config section.
    pub fn from_config(config: &EndpointConfig) -> Result<Self, TransportError> {
        Self::new(config.url.clone(), config.request_timeout())
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn map_send_error(&self, e: reqwest::Error) -> TransportError {
        if e.is_timeout() {
            TransportError::Timeout(self.timeout)
        } else {
            TransportError::Network(e.to_string())
        }
    }

    async fn read_body(&self, resp: reqwest::Response) -> Result<Vec<u8>, TransportError> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| TransportError::Body(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

impl Transport for HttpTransport {
    fn name(&self) -> &str {
        "http"
    }

    fn fetch(&self) -> BoxFuture<'_, Result<Vec<u8>, TransportError>> {
        Box::pin(async move {
            let resp = self
                .client
                .get(&self.url)
                .send()
                .await
                .map_err(|e| self.map_send_error(e))?;
            let body = self.read_body(resp).await?;
            debug!(url = %self.url, bytes = body.len(), "Fetched batch");
            Ok(body)
        })
    }

    fn send(&self, body: Vec<u8>) -> BoxFuture<'_, Result<Vec<u8>, TransportError>> {
        Box::pin(async move {
            let len = body.len();
            let resp = self
                .client
                .post(&self.url)
                .header("content-type", "application/json")
                .body(body)
                .send()
                .await
                .map_err(|e| self.map_send_error(e))?;
            let reply = self.read_body(resp).await?;
            debug!(url = %self.url, bytes = len, "Pushed batch");
            Ok(reply)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use axum::Router;
    use axum::body::Bytes;
    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::get;
    use tokio::net::TcpListener;

    #[derive(Default)]
    struct Peer {
        outbox: Mutex<Vec<u8>>,
        inbox: Mutex<Vec<(Option<String>, Vec<u8>)>>,
    }

    async fn serve_peer(peer: Arc<Peer>) -> String {
        async fn pull(State(peer): State<Arc<Peer>>) -> Vec<u8> {
            std::mem::take(&mut *peer.outbox.lock().unwrap())
        }
        async fn push(State(peer): State<Arc<Peer>>, headers: HeaderMap, body: Bytes) -> &'static str {
            let content_type = headers
                .get("content-type")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            peer.inbox.lock().unwrap().push((content_type, body.to_vec()));
            "ok"
        }

        let app = Router::new()
            .route("/messages", get(pull).post(push))
            .route("/broken", get(|| async { (StatusCode::BAD_GATEWAY, "upstream down") }))
            .with_state(peer);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_fetch_returns_body() {
        let peer = Arc::new(Peer::default());
        *peer.outbox.lock().unwrap() = br#"[{"command":"ping","data":"1"}]"#.to_vec();
        let base = serve_peer(Arc::clone(&peer)).await;

        let transport =
            HttpTransport::new(format!("{base}/messages"), Duration::from_secs(5)).unwrap();
        let body = transport.fetch().await.unwrap();
        assert_eq!(body, br#"[{"command":"ping","data":"1"}]"#.to_vec());
    }

    #[tokio::test]
    async fn test_send_posts_json() {
        let peer = Arc::new(Peer::default());
        let base = serve_peer(Arc::clone(&peer)).await;

        let transport =
            HttpTransport::new(format!("{base}/messages"), Duration::from_secs(5)).unwrap();
        let reply = transport.send(b"[]".to_vec()).await.unwrap();
        assert_eq!(reply, b"ok".to_vec());

        let inbox = peer.inbox.lock().unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].0.as_deref(), Some("application/json"));
        assert_eq!(inbox[0].1, b"[]".to_vec());
    }

    #[tokio::test]
    async fn test_non_success_status_is_error() {
        let base = serve_peer(Arc::new(Peer::default())).await;
        let transport =
            HttpTransport::new(format!("{base}/broken"), Duration::from_secs(5)).unwrap();
        match transport.fetch().await {
            Err(TransportError::Status { status, body }) => {
                assert_eq!(status, 502);
                assert_eq!(body, "upstream down");
            }
            other => panic!("expected status error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_network_error() {
        // Bind then drop to get a port with nothing listening.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport =
            HttpTransport::new(format!("http://{addr}/messages"), Duration::from_secs(5))
                .unwrap();
        assert!(matches!(
            transport.fetch().await,
            Err(TransportError::Network(_))
        ));
    }

    #[test]
    fn test_from_config() {
        let config = EndpointConfig::default();
        let transport = HttpTransport::from_config(&config).unwrap();
        assert_eq!(transport.url(), config.url);
        assert_eq!(transport.name(), "http");
    }
}
