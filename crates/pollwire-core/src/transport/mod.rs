//! Byte-level transports the poll loops exchange batches over.
//!
//! A transport only moves opaque wire bytes: `fetch` pulls one pending batch,
//! `send` pushes one. Encoding, decoding and dispatch live above it.

pub mod http;
pub mod memory;

pub use http::HttpTransport;
pub use memory::MemoryTransport;

use crate::BoxFuture;

/// Errors from a transport exchange.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),

    #[error("endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to read response body: {0}")]
    Body(String),

    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("transport closed")]
    Closed,
}

/// One side of a polling link.
///
/// Implementations must be `Send + Sync`; both poll loops share one
/// instance. Uses `BoxFuture` so sessions can hold `Arc<dyn Transport>`.
pub trait Transport: Send + Sync {
    /// Short display name for logs (e.g. "http").
    fn name(&self) -> &str;

    /// Retrieve the wire bytes of one inbound batch.
    fn fetch(&self) -> BoxFuture<'_, Result<Vec<u8>, TransportError>>;

    /// Push the wire bytes of one outbound batch, returning the peer's reply body.
    fn send(&self, body: Vec<u8>) -> BoxFuture<'_, Result<Vec<u8>, TransportError>>;
}
