//! Session test helpers.
//!
//! Builds pairs of sessions linked in-process, runs them on background tasks,
//! and records what their handlers receive.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use pollwire_core::poll::PollTiming;
use pollwire_core::{
    BoxFuture, Handler, HandlerError, MemoryTransport, Session, SessionError, SessionOptions,
    SessionState,
};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// Session options with millisecond loop pacing.
pub fn fast_options() -> SessionOptions {
    SessionOptions {
        timing: PollTiming {
            poll_interval: Duration::from_millis(1),
            fetch_retry: Duration::from_millis(1),
            idle_backoff_min: Duration::from_millis(1),
            idle_backoff_max: Duration::from_millis(5),
        },
        ..Default::default()
    }
}

/// Two idle sessions linked by a [`MemoryTransport`] pair: what one sends,
/// the other receives.
pub fn linked_sessions(options: SessionOptions) -> (Session, Session) {
    let (a, b) = MemoryTransport::pair_with_wait(Duration::from_millis(10));
    (
        Session::new(Arc::new(a), options.clone()),
        Session::new(Arc::new(b), options),
    )
}

/// A session running on a background task.
pub struct RunningSession {
    pub session: Session,
    pub task: JoinHandle<Result<(), SessionError>>,
}

impl RunningSession {
    /// Spawn `session.run()` and wait until the session reports `Running`.
    pub async fn start(session: Session) -> Self {
        let task = {
            let session = session.clone();
            tokio::spawn(async move { session.run().await })
        };
        session
            .subscribe_state()
            .wait_for(|s| *s != SessionState::Idle)
            .await
            .expect("session state channel closed");
        Self { session, task }
    }

    /// Stop the session and return what `run` returned.
    pub async fn shutdown(self) -> Result<(), SessionError> {
        self.session.stop();
        tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .expect("session did not stop in time")
            .expect("session task panicked")
    }
}

/// Handler that records every payload it receives, optionally failing on
/// payloads equal to a given value.
#[derive(Default)]
pub struct RecordingHandler {
    seen: Mutex<Vec<Vec<u8>>>,
    fail_on: Option<Vec<u8>>,
    notify: Notify,
}

impl RecordingHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A recorder that returns an error when it receives `payload`.
    pub fn failing_on(payload: impl Into<Vec<u8>>) -> Arc<Self> {
        Arc::new(Self {
            fail_on: Some(payload.into()),
            ..Default::default()
        })
    }

    pub fn payloads(&self) -> Vec<Vec<u8>> {
        self.seen.lock().expect("recorder lock poisoned").clone()
    }

    /// Wait until at least `n` payloads were recorded.
    pub async fn wait_for(&self, n: usize, timeout: Duration) -> Vec<Vec<u8>> {
        tokio::time::timeout(timeout, async {
            loop {
                let notified = self.notify.notified();
                let seen = self.payloads();
                if seen.len() >= n {
                    return seen;
                }
                notified.await;
            }
        })
        .await
        .expect("timed out waiting for payloads")
    }
}

impl Handler for RecordingHandler {
    fn handle<'a>(&'a self, payload: &'a [u8]) -> BoxFuture<'a, Result<(), HandlerError>> {
        Box::pin(async move {
            self.seen
                .lock()
                .expect("recorder lock poisoned")
                .push(payload.to_vec());
            self.notify.notify_waiters();
            if self.fail_on.as_deref() == Some(payload) {
                return Err(HandlerError::new(format!(
                    "rejected {:?}",
                    String::from_utf8_lossy(payload)
                )));
            }
            Ok(())
        })
    }
}
