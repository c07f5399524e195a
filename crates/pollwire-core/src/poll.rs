//! The receive and send activities of a running session.
//!
//! Both loops check the session state at every iteration boundary and exit
//! once it leaves `Running`. A fetch or send already in flight is allowed to
//! finish; only the idle waits between iterations are cut short by a stop.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::codec;
use crate::demux::{Demux, DispatchError};
use crate::mux::OutboundMux;
use crate::session::SessionState;
use crate::transport::Transport;

/// Loop pacing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollTiming {
    /// Pause after a fetch that returned no messages.
    pub poll_interval: Duration,
    /// Pause after a failed fetch.
    pub fetch_retry: Duration,
    /// First idle sleep of the send loop.
    pub idle_backoff_min: Duration,
    /// Ceiling for the send loop's idle sleep.
    pub idle_backoff_max: Duration,
}

impl Default for PollTiming {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            fetch_retry: Duration::from_millis(500),
            idle_backoff_min: Duration::from_millis(5),
            idle_backoff_max: Duration::from_millis(250),
        }
    }
}

/// The receive loop ended because a handler failed.
#[derive(Debug, thiserror::Error)]
pub enum LoopError {
    #[error("dispatch aborted: {0}")]
    Dispatch(#[from] DispatchError),
}

/// Running counters for a session.
#[derive(Debug, Default)]
pub struct SessionStats {
    batches_sent: AtomicU64,
    messages_sent: AtomicU64,
    batches_received: AtomicU64,
    messages_dispatched: AtomicU64,
    messages_ignored: AtomicU64,
    fetch_errors: AtomicU64,
    decode_errors: AtomicU64,
    send_errors: AtomicU64,
    handler_failures: AtomicU64,
}

/// Point-in-time copy of [`SessionStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub batches_sent: u64,
    pub messages_sent: u64,
    pub batches_received: u64,
    pub messages_dispatched: u64,
    pub messages_ignored: u64,
    pub fetch_errors: u64,
    pub decode_errors: u64,
    pub send_errors: u64,
    pub handler_failures: u64,
}

impl SessionStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            batches_sent: get(&self.batches_sent),
            messages_sent: get(&self.messages_sent),
            batches_received: get(&self.batches_received),
            messages_dispatched: get(&self.messages_dispatched),
            messages_ignored: get(&self.messages_ignored),
            fetch_errors: get(&self.fetch_errors),
            decode_errors: get(&self.decode_errors),
            send_errors: get(&self.send_errors),
            handler_failures: get(&self.handler_failures),
        }
    }
}

fn bump(counter: &AtomicU64, by: usize) {
    counter.fetch_add(by as u64, Ordering::Relaxed);
}

/// Everything the two loops share.
pub(crate) struct LoopContext {
    pub transport: Arc<dyn Transport>,
    pub mux: Arc<OutboundMux>,
    pub demux: Arc<Demux>,
    pub stats: SessionStats,
    pub timing: PollTiming,
}

/// Whether a loop should start another iteration. A dropped state sender
/// counts as a stop.
fn keep_going(state: &watch::Receiver<SessionState>) -> bool {
    state.has_changed().is_ok() && *state.borrow() == SessionState::Running
}

/// Resolve once the session is stopped or its state sender is gone.
pub(crate) async fn wait_stopped(state: &mut watch::Receiver<SessionState>) {
    loop {
        if *state.borrow_and_update() == SessionState::Stopped {
            return;
        }
        if state.changed().await.is_err() {
            return;
        }
    }
}

/// Sleep for `d` unless the session stops first.
async fn pause(state: &mut watch::Receiver<SessionState>, d: Duration) {
    tokio::select! {
        _ = tokio::time::sleep(d) => {}
        _ = wait_stopped(state) => {}
    }
}

/// Fetch, decode and dispatch until stopped or a handler fails.
pub(crate) async fn receive_loop(
    ctx: Arc<LoopContext>,
    mut state: watch::Receiver<SessionState>,
) -> Result<(), LoopError> {
    info!(transport = ctx.transport.name(), "Receive loop started");

    while keep_going(&state) {
        let body = match ctx.transport.fetch().await {
            Ok(body) => body,
            Err(e) => {
                bump(&ctx.stats.fetch_errors, 1);
                warn!(error = %e, "Fetch failed, will retry");
                pause(&mut state, ctx.timing.fetch_retry).await;
                continue;
            }
        };

        let batch = match codec::decode(&body) {
            Ok(batch) => batch,
            Err(e) => {
                bump(&ctx.stats.decode_errors, 1);
                warn!(error = %e, bytes = body.len(), "Discarding malformed batch");
                pause(&mut state, ctx.timing.poll_interval).await;
                continue;
            }
        };

        if batch.is_empty() {
            pause(&mut state, ctx.timing.poll_interval).await;
            continue;
        }

        bump(&ctx.stats.batches_received, 1);
        match ctx.demux.dispatch(&batch).await {
            Ok(report) => {
                bump(&ctx.stats.messages_dispatched, report.dispatched);
                bump(&ctx.stats.messages_ignored, report.ignored);
                debug!(
                    messages = batch.len(),
                    dispatched = report.dispatched,
                    ignored = report.ignored,
                    "Batch dispatched"
                );
            }
            Err(e) => {
                bump(&ctx.stats.handler_failures, e.failures.len());
                error!(error = %e, skipped = e.skipped, "Handler failure, receive loop exiting");
                return Err(LoopError::Dispatch(e));
            }
        }
    }

    info!("Receive loop stopped");
    Ok(())
}

/// Drain, encode and push until stopped. Send failures drop the batch and
/// the loop carries on.
pub(crate) async fn send_loop(ctx: Arc<LoopContext>, mut state: watch::Receiver<SessionState>) {
    info!(transport = ctx.transport.name(), "Send loop started");
    let mut idle = ctx.timing.idle_backoff_min;

    while keep_going(&state) {
        let drained = ctx.mux.drain_all();
        if drained.is_empty() {
            tokio::select! {
                _ = tokio::time::sleep(idle) => {}
                _ = ctx.mux.notified() => {}
                _ = wait_stopped(&mut state) => {}
            }
            idle = (idle * 2).min(ctx.timing.idle_backoff_max);
            continue;
        }
        idle = ctx.timing.idle_backoff_min;

        let batch = codec::coalesce(drained);
        let messages = batch.len();
        let body = codec::encode(&batch);
        let bytes = body.len();

        match ctx.transport.send(body).await {
            Ok(_) => {
                bump(&ctx.stats.batches_sent, 1);
                bump(&ctx.stats.messages_sent, messages);
                debug!(messages, bytes, "Batch sent");
            }
            Err(e) => {
                bump(&ctx.stats.send_errors, 1);
                warn!(error = %e, messages, bytes, "Send failed, batch dropped");
            }
        }
    }

    info!("Send loop stopped");
}
