#![deny(unsafe_code)]

//! pollwire core runtime.
//!
//! Carries many independent, tagged byte streams over a single HTTP polling
//! link. Outbound writes are queued per tag and coalesced into one batch per
//! send; inbound batches are split by tag and handed to registered handlers.
//! Both directions run as loops owned by a [`Session`].

use std::future::Future;
use std::pin::Pin;

/// A type-erased, `Send`-safe, boxed future used as the return type for async
/// trait methods that need dynamic dispatch (`dyn Handler`, `dyn Transport`).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Build metadata (version, git hash, profile).
pub mod build_info;
/// JSON batch wire format.
pub mod codec;
/// Unix-socket control API for a running session.
pub mod control;
/// Inbound demultiplexer: tag → handler dispatch.
pub mod demux;
/// Outbound multiplexer: bounded per-tag queues.
pub mod mux;
/// Receive and send loops.
pub mod poll;
/// Session lifecycle.
pub mod session;
/// HTTP and in-process transports.
pub mod transport;

pub use codec::{Batch, DecodeError, Message};
pub use demux::{
    Demux, DispatchError, DispatchPolicy, DispatchReport, Handler, HandlerError, handler_fn,
};
pub use mux::{EnqueueError, OutboundMux, QueueFullError, WritePolicy};
pub use poll::{PollTiming, StatsSnapshot};
pub use session::{Session, SessionError, SessionOptions, SessionState, SessionStatus, WriteError};
pub use transport::{HttpTransport, MemoryTransport, Transport, TransportError};
