//! In-process transport pair.
//!
//! Links an Initiator and a Responder without a network: whatever one side
//! sends, the other side's next fetch returns. A fetch with nothing waiting
//! long-polls for up to `poll_wait` and then answers an empty batch.

use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tracing::trace;

use super::{Transport, TransportError};
use crate::BoxFuture;

/// Default long-poll wait for [`MemoryTransport::fetch`].
pub const DEFAULT_POLL_WAIT: Duration = Duration::from_millis(250);

/// One end of an in-process link.
pub struct MemoryTransport {
    to_peer: mpsc::UnboundedSender<Vec<u8>>,
    from_peer: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    poll_wait: Duration,
}

impl MemoryTransport {
    /// Create two connected ends.
    pub fn pair() -> (Self, Self) {
        Self::pair_with_wait(DEFAULT_POLL_WAIT)
    }

    /// Create two connected ends with a custom long-poll wait.
    pub fn pair_with_wait(poll_wait: Duration) -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        let a = Self {
            to_peer: b_tx,
            from_peer: Mutex::new(a_rx),
            poll_wait,
        };
        let b = Self {
            to_peer: a_tx,
            from_peer: Mutex::new(b_rx),
            poll_wait,
        };
        (a, b)
    }
}

impl Transport for MemoryTransport {
    fn name(&self) -> &str {
        "memory"
    }

    fn fetch(&self) -> BoxFuture<'_, Result<Vec<u8>, TransportError>> {
        Box::pin(async move {
            let mut rx = self.from_peer.lock().await;
            match tokio::time::timeout(self.poll_wait, rx.recv()).await {
                Ok(Some(body)) => {
                    trace!(bytes = body.len(), "Memory fetch");
                    Ok(body)
                }
                Ok(None) => Err(TransportError::Closed),
                Err(_) => Ok(b"[]".to_vec()),
            }
        })
    }

    fn send(&self, body: Vec<u8>) -> BoxFuture<'_, Result<Vec<u8>, TransportError>> {
        Box::pin(async move {
            self.to_peer
                .send(body)
                .map_err(|_| TransportError::Closed)?;
            Ok(Vec::new())
        })
    }
}
