//! Session lifecycle: `Idle → Running → Stopped`.
//!
//! A [`Session`] owns the outbound multiplexer, the handler table and a
//! transport. [`Session::run`] starts the receive and send loops and waits
//! for a stop; [`Session::stop`] may be called from any task. The state lives
//! in a `watch` channel that doubles as the stop signal both loops observe.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{error, info};

use pollwire_config::SessionConfig;

use crate::demux::{Demux, DispatchPolicy, Handler};
use crate::mux::{EnqueueError, OutboundMux, QueueFullError, WritePolicy};
use crate::poll::{self, LoopContext, LoopError, PollTiming, SessionStats, StatsSnapshot};
use crate::transport::Transport;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Constructed; no loops running.
    Idle,
    /// Both loops active.
    Running,
    /// Terminal. A stop has been issued.
    Stopped,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionState::Idle => "idle",
            SessionState::Running => "running",
            SessionState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Tunables for a session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub queue_capacity: usize,
    pub write_policy: WritePolicy,
    pub dispatch_policy: DispatchPolicy,
    pub timing: PollTiming,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            queue_capacity: crate::mux::DEFAULT_QUEUE_CAPACITY,
            write_policy: WritePolicy::Block,
            dispatch_policy: DispatchPolicy::AbortBatch,
            timing: PollTiming::default(),
        }
    }
}

impl SessionOptions {
    /// Build options from the `[session]` config section.
    pub fn from_config(config: &SessionConfig) -> Result<Self, SessionError> {
        let dispatch_policy = config
            .dispatch_policy
            .parse::<DispatchPolicy>()
            .map_err(SessionError::Options)?;
        Ok(Self {
            queue_capacity: config.queue_capacity,
            write_policy: WritePolicy::from_timeout(config.write_timeout()),
            dispatch_policy,
            timing: PollTiming {
                poll_interval: config.poll_interval(),
                fetch_retry: config.fetch_retry(),
                idle_backoff_min: config.idle_backoff_min(),
                idle_backoff_max: config.idle_backoff_max(),
            },
        })
    }
}

/// Errors from running a session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session is already running")]
    AlreadyStarted,

    #[error("session has been stopped")]
    Stopped,

    #[error("receive loop terminated: {0}")]
    Receive(#[from] LoopError),

    #[error("loop task failed: {0}")]
    Task(String),

    #[error("invalid session options: {0}")]
    Options(String),
}

/// Errors from [`Session::write`].
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error(transparent)]
    QueueFull(#[from] QueueFullError),

    #[error("session has been stopped")]
    Stopped,
}

impl From<EnqueueError> for WriteError {
    fn from(err: EnqueueError) -> Self {
        match err {
            EnqueueError::Full(full) => WriteError::QueueFull(full),
            EnqueueError::Closed => WriteError::Stopped,
        }
    }
}

/// Serializable view of a session for status reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStatus {
    pub state: SessionState,
    pub transport: String,
    pub handlers: Vec<String>,
    pub pending: BTreeMap<String, usize>,
    pub stats: StatsSnapshot,
}

/// A multiplexed polling session. Cloning yields another handle to the
/// same session.
#[derive(Clone)]
pub struct Session {
    ctx: Arc<LoopContext>,
    write_policy: WritePolicy,
    state_tx: Arc<watch::Sender<SessionState>>,
}

impl Session {
    /// Create an idle session over `transport`.
    pub fn new(transport: Arc<dyn Transport>, options: SessionOptions) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Idle);
        let ctx = LoopContext {
            transport,
            mux: Arc::new(OutboundMux::new(options.queue_capacity)),
            demux: Arc::new(Demux::new(options.dispatch_policy)),
            stats: SessionStats::default(),
            timing: options.timing,
        };
        Self {
            ctx: Arc::new(ctx),
            write_policy: options.write_policy,
            state_tx: Arc::new(state_tx),
        }
    }

    /// Register `handler` for inbound messages tagged `tag`. Last one wins.
    pub fn add_handler<H>(&self, tag: impl Into<String>, handler: H)
    where
        H: Handler + 'static,
    {
        self.ctx.demux.register(tag, Arc::new(handler));
    }

    /// Remove the handler for `tag`.
    pub fn remove_handler(&self, tag: &str) -> bool {
        self.ctx.demux.unregister(tag)
    }

    /// Queue `payload` for sending under `tag`, waiting for queue space
    /// according to the session's write policy. A writer still waiting when
    /// the session stops gets [`WriteError::Stopped`].
    pub async fn write(&self, tag: &str, payload: impl Into<Vec<u8>>) -> Result<(), WriteError> {
        if self.state() == SessionState::Stopped {
            return Err(WriteError::Stopped);
        }
        self.ctx
            .mux
            .write(tag, payload.into(), self.write_policy)
            .await?;
        Ok(())
    }

    /// Queue `payload` without waiting; fails if the tag's queue is full.
    pub fn try_write(&self, tag: &str, payload: impl Into<Vec<u8>>) -> Result<(), WriteError> {
        if self.state() == SessionState::Stopped {
            return Err(WriteError::Stopped);
        }
        self.ctx.mux.try_write(tag, payload.into())?;
        Ok(())
    }

    /// Start both loops and wait until the session stops.
    ///
    /// Returns `Ok(())` after [`stop`](Self::stop), or
    /// [`SessionError::Receive`] if a handler failure ended the receive loop
    /// (the session is stopped in that case too).
    pub async fn run(&self) -> Result<(), SessionError> {
        let mut started = false;
        self.state_tx.send_if_modified(|state| {
            if *state == SessionState::Idle {
                *state = SessionState::Running;
                started = true;
                true
            } else {
                false
            }
        });
        if !started {
            return Err(match self.state() {
                SessionState::Stopped => SessionError::Stopped,
                _ => SessionError::AlreadyStarted,
            });
        }

        info!(
            transport = self.ctx.transport.name(),
            handlers = ?self.ctx.demux.tags(),
            "Session running"
        );

        let mut receiver = tokio::spawn(poll::receive_loop(
            Arc::clone(&self.ctx),
            self.state_tx.subscribe(),
        ));
        // Detached: exits on its own once the state leaves Running.
        tokio::spawn(poll::send_loop(
            Arc::clone(&self.ctx),
            self.state_tx.subscribe(),
        ));

        let mut state_rx = self.state_tx.subscribe();
        // A finished receive loop takes precedence so its error is not lost
        // to a stop issued at the same moment.
        tokio::select! {
            biased;
            joined = &mut receiver => {
                self.stop();
                match joined {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => {
                        error!(error = %e, "Session stopped by receive loop failure");
                        Err(SessionError::Receive(e))
                    }
                    Err(e) => Err(SessionError::Task(e.to_string())),
                }
            }
            _ = poll::wait_stopped(&mut state_rx) => {
                info!("Session stopped");
                Ok(())
            }
        }
    }

    /// Request shutdown. Only the first call issues the stop signal; it
    /// returns `true` in that case. Closes the outbound queues, so blocked
    /// writers are released.
    pub fn stop(&self) -> bool {
        let mut issued = false;
        self.state_tx.send_if_modified(|state| {
            if *state == SessionState::Stopped {
                false
            } else {
                *state = SessionState::Stopped;
                issued = true;
                true
            }
        });
        if issued {
            self.ctx.mux.close();
            info!("Session stop requested");
        }
        issued
    }

    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.ctx.stats.snapshot()
    }

    /// Pending outbound chunks per tag.
    pub fn pending(&self) -> BTreeMap<String, usize> {
        self.ctx.mux.pending_counts()
    }

    /// Tags with a registered handler.
    pub fn handler_tags(&self) -> Vec<String> {
        self.ctx.demux.tags()
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            state: self.state(),
            transport: self.ctx.transport.name().to_string(),
            handlers: self.handler_tags(),
            pending: self.pending(),
            stats: self.stats(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use crate::demux::{HandlerError, handler_fn};
    use crate::transport::MemoryTransport;

    fn fast_options() -> SessionOptions {
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

    fn pair() -> (Session, Session) {
        let (a, b) = MemoryTransport::pair_with_wait(Duration::from_millis(10));
        (
            Session::new(Arc::new(a), fast_options()),
            Session::new(Arc::new(b), fast_options()),
        )
    }

    #[tokio::test]
    async fn test_new_session_is_idle() {
        let (session, _) = pair();
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(session.status().transport, "memory");
    }

    #[tokio::test]
    async fn test_stop_unblocks_run() {
        let (session, _peer) = pair();
        let runner = {
            let session = session.clone();
            tokio::spawn(async move { session.run().await })
        };

        let mut state = session.subscribe_state();
        state
            .wait_for(|s| *s == SessionState::Running)
            .await
            .unwrap();

        assert!(session.stop());
        let result = tokio::time::timeout(Duration::from_secs(2), runner)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
        assert_eq!(session.state(), SessionState::Stopped);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let (session, _) = pair();
        assert!(session.stop());
        assert!(!session.stop());
        assert_eq!(session.state(), SessionState::Stopped);
    }

    #[tokio::test]
    async fn test_run_after_stop_fails() {
        let (session, _) = pair();
        session.stop();
        assert!(matches!(session.run().await, Err(SessionError::Stopped)));
    }

    #[tokio::test]
    async fn test_second_run_fails_while_running() {
        let (session, _peer) = pair();
        let runner = {
            let session = session.clone();
            tokio::spawn(async move { session.run().await })
        };
        session
            .subscribe_state()
            .wait_for(|s| *s == SessionState::Running)
            .await
            .unwrap();

        assert!(matches!(
            session.run().await,
            Err(SessionError::AlreadyStarted)
        ));
        session.stop();
        runner.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_write_after_stop_is_rejected() {
        let (session, _) = pair();
        session.stop();
        assert!(matches!(
            session.write("cmd", "x").await,
            Err(WriteError::Stopped)
        ));
        assert!(matches!(
            session.try_write("cmd", "x"),
            Err(WriteError::Stopped)
        ));
    }

    #[tokio::test]
    async fn test_writes_before_run_are_delivered() {
        let (initiator, responder) = pair();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        responder.add_handler(
            "ping",
            handler_fn(move |p: &[u8]| {
                sink.lock().unwrap().push(p.to_vec());
                Ok(())
            }),
        );

        initiator.write("ping", "1").await.unwrap();
        initiator.write("ping", "2").await.unwrap();

        let a = initiator.clone();
        let b = responder.clone();
        let ra = tokio::spawn(async move { a.run().await });
        let rb = tokio::spawn(async move { b.run().await });

        tokio::time::timeout(Duration::from_secs(5), async {
            while seen.lock().unwrap().is_empty() {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .unwrap();

        initiator.stop();
        responder.stop();
        ra.await.unwrap().unwrap();
        rb.await.unwrap().unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![b"12".to_vec()]);
        assert_eq!(initiator.stats().batches_sent, 1);
        assert_eq!(responder.stats().messages_dispatched, 1);
    }

    #[tokio::test]
    async fn test_handler_failure_surfaces_from_run() {
        let (initiator, responder) = pair();
        responder.add_handler(
            "cmd",
            handler_fn(|_: &[u8]| Err(HandlerError::new("rejected"))),
        );
        initiator.try_write("cmd", "x").unwrap();

        let a = initiator.clone();
        let ra = tokio::spawn(async move { a.run().await });

        let result = tokio::time::timeout(Duration::from_secs(5), responder.run())
            .await
            .unwrap();
        assert!(matches!(result, Err(SessionError::Receive(_))));
        assert_eq!(responder.state(), SessionState::Stopped);

        initiator.stop();
        ra.await.unwrap().unwrap();
    }

    #[test]
    fn test_options_from_config() {
        let config = SessionConfig {
            queue_capacity: 7,
            write_timeout_ms: Some(0),
            dispatch_policy: "continue".to_string(),
            ..Default::default()
        };
        let options = SessionOptions::from_config(&config).unwrap();
        assert_eq!(options.queue_capacity, 7);
        assert_eq!(options.write_policy, WritePolicy::Immediate);
        assert_eq!(options.dispatch_policy, DispatchPolicy::ContinueBatch);
        assert_eq!(options.timing.poll_interval, config.poll_interval());
    }

    #[test]
    fn test_options_reject_unknown_policy() {
        let config = SessionConfig {
            dispatch_policy: "sometimes".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            SessionOptions::from_config(&config),
            Err(SessionError::Options(_))
        ));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(SessionState::Running.to_string(), "running");
        assert_eq!(
            serde_json::to_string(&SessionState::Stopped).unwrap(),
            "\"stopped\""
        );
    }
}
