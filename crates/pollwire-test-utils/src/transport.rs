//! A transport driven by a script, for exercising the poll loops without a
//! peer.

use std::collections::VecDeque;
use std::sync::Mutex;

use pollwire_core::{BoxFuture, Transport, TransportError};

/// Answers fetches from a queue of scripted results, then with empty
/// batches. Records every sent body; sends can be made to fail.
#[derive(Default)]
pub struct ScriptedTransport {
    fetches: Mutex<VecDeque<Result<Vec<u8>, TransportError>>>,
    sent: Mutex<Vec<Vec<u8>>>,
    failing_sends: Mutex<usize>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a body for a future fetch.
    pub fn push_fetch(&self, body: impl Into<Vec<u8>>) -> &Self {
        self.fetches
            .lock()
            .expect("script lock poisoned")
            .push_back(Ok(body.into()));
        self
    }

    /// Queue a failed fetch.
    pub fn push_fetch_error(&self, error: TransportError) -> &Self {
        self.fetches
            .lock()
            .expect("script lock poisoned")
            .push_back(Err(error));
        self
    }

    /// Make the next `n` sends fail with a network error.
    pub fn fail_next_sends(&self, n: usize) {
        *self.failing_sends.lock().expect("script lock poisoned") = n;
    }

    /// Bodies successfully sent so far.
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.sent.lock().expect("script lock poisoned").clone()
    }

    /// Scripted fetches not yet consumed.
    pub fn remaining_fetches(&self) -> usize {
        self.fetches.lock().expect("script lock poisoned").len()
    }
}

impl Transport for ScriptedTransport {
    fn name(&self) -> &str {
        "scripted"
    }

    fn fetch(&self) -> BoxFuture<'_, Result<Vec<u8>, TransportError>> {
        let next = self
            .fetches
            .lock()
            .expect("script lock poisoned")
            .pop_front();
        Box::pin(async move { next.unwrap_or_else(|| Ok(b"[]".to_vec())) })
    }

    fn send(&self, body: Vec<u8>) -> BoxFuture<'_, Result<Vec<u8>, TransportError>> {
        Box::pin(async move {
            {
                let mut failing = self.failing_sends.lock().expect("script lock poisoned");
                if *failing > 0 {
                    *failing -= 1;
                    return Err(TransportError::Network("scripted failure".to_string()));
                }
            }
            self.sent.lock().expect("script lock poisoned").push(body);
            Ok(Vec::new())
        })
    }
}
