//! Inbound demultiplexer: routes decoded messages to per-tag handlers.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::{debug, trace, warn};

use crate::BoxFuture;
use crate::codec::Message;

/// Error returned by a handler that could not process a payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// A callback invoked with the payload of every inbound message for its tag.
///
/// Uses `BoxFuture` so handlers can be stored as `Arc<dyn Handler>`.
pub trait Handler: Send + Sync {
    fn handle<'a>(&'a self, payload: &'a [u8]) -> BoxFuture<'a, Result<(), HandlerError>>;
}

impl<H: Handler + ?Sized> Handler for Arc<H> {
    fn handle<'a>(&'a self, payload: &'a [u8]) -> BoxFuture<'a, Result<(), HandlerError>> {
        (**self).handle(payload)
    }
}

/// Adapter turning a synchronous closure into a [`Handler`].
pub struct FnHandler<F>(F);

/// Wrap a closure as a handler.
pub fn handler_fn<F>(f: F) -> FnHandler<F>
where
    F: Fn(&[u8]) -> Result<(), HandlerError> + Send + Sync,
{
    FnHandler(f)
}

impl<F> Handler for FnHandler<F>
where
    F: Fn(&[u8]) -> Result<(), HandlerError> + Send + Sync,
{
    fn handle<'a>(&'a self, payload: &'a [u8]) -> BoxFuture<'a, Result<(), HandlerError>> {
        let result = (self.0)(payload);
        Box::pin(async move { result })
    }
}

/// What happens to the rest of a batch after a handler fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchPolicy {
    /// Stop at the first failure; later messages in the batch are skipped.
    #[default]
    AbortBatch,
    /// Keep dispatching and report every failure at the end.
    ContinueBatch,
}

impl std::str::FromStr for DispatchPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "abort" => Ok(DispatchPolicy::AbortBatch),
            "continue" => Ok(DispatchPolicy::ContinueBatch),
            other => Err(format!("unknown dispatch policy: {other}")),
        }
    }
}

/// One handler failure within a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerFailure {
    /// Position of the message in the batch.
    pub index: usize,
    pub tag: String,
    pub error: HandlerError,
}

/// A batch could not be fully dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchError {
    /// Never empty.
    pub failures: Vec<HandlerFailure>,
    /// Messages left undispatched because of an abort.
    pub skipped: usize,
}

impl std::fmt::Display for DispatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.failures.as_slice() {
            [] => write!(f, "dispatch failed"),
            [only] => write!(f, "handler for tag {:?} failed: {}", only.tag, only.error),
            [first, rest @ ..] => write!(
                f,
                "handler for tag {:?} failed: {} (and {} more)",
                first.tag,
                first.error,
                rest.len()
            ),
        }
    }
}

impl std::error::Error for DispatchError {}

/// Counts from a successful dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub dispatched: usize,
    pub ignored: usize,
}

/// Tag → handler table, internally synchronized.
pub struct Demux {
    handlers: RwLock<HashMap<String, Arc<dyn Handler>>>,
    policy: DispatchPolicy,
}

impl Demux {
    pub fn new(policy: DispatchPolicy) -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            policy,
        }
    }

    pub fn policy(&self) -> DispatchPolicy {
        self.policy
    }

    /// Register `handler` for `tag`, replacing any previous one.
    pub fn register(&self, tag: impl Into<String>, handler: Arc<dyn Handler>) {
        let tag = tag.into();
        let mut table = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        if table.insert(tag.clone(), handler).is_some() {
            debug!(tag = %tag, "Replaced handler");
        } else {
            debug!(tag = %tag, "Registered handler");
        }
    }

    /// Remove the handler for `tag`. Returns whether one was registered.
    pub fn unregister(&self, tag: &str) -> bool {
        let mut table = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        table.remove(tag).is_some()
    }

    /// Tags with a registered handler, sorted.
    pub fn tags(&self) -> Vec<String> {
        let table = self.handlers.read().unwrap_or_else(|e| e.into_inner());
        let mut tags: Vec<String> = table.keys().cloned().collect();
        tags.sort();
        tags
    }

    fn lookup(&self, tag: &str) -> Option<Arc<dyn Handler>> {
        let table = self.handlers.read().unwrap_or_else(|e| e.into_inner());
        table.get(tag).cloned()
    }

    /// Deliver each message of `batch` to the handler for its tag.
    ///
    /// Messages for unregistered tags are dropped silently. The table lock
    /// is not held while a handler runs.
    pub async fn dispatch(&self, batch: &[Message]) -> Result<DispatchReport, DispatchError> {
        let mut report = DispatchReport::default();
        let mut failures = Vec::new();

        for (index, message) in batch.iter().enumerate() {
            let Some(handler) = self.lookup(&message.tag) else {
                trace!(tag = %message.tag, "No handler, dropping message");
                report.ignored += 1;
                continue;
            };

            match handler.handle(&message.payload).await {
                Ok(()) => report.dispatched += 1,
                Err(error) => {
                    warn!(tag = %message.tag, index, error = %error, "Handler failed");
                    failures.push(HandlerFailure {
                        index,
                        tag: message.tag.clone(),
                        error,
                    });
                    if self.policy == DispatchPolicy::AbortBatch {
                        return Err(DispatchError {
                            failures,
                            skipped: batch.len() - index - 1,
                        });
                    }
                }
            }
        }

        if failures.is_empty() {
            Ok(report)
        } else {
            Err(DispatchError {
                failures,
                skipped: 0,
            })
        }
    }
}

impl Default for Demux {
    fn default() -> Self {
        Self::new(DispatchPolicy::default())
    }
}
