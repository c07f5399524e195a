//! Local control socket for a running session.
//!
//! `pollwire run` exposes an HTTP/JSON API over a Unix socket so that other
//! `pollwire` invocations can inspect the session, queue outbound payloads
//! and request shutdown.
//!
//! ```text
//! ┌──────────────┐      Unix socket       ┌────────────────┐
//! │ pollwire CLI │───────────────────────▶│ Control server │
//! │ (status/stop)│  HTTP/1.1 + JSON       │ (axum)         │
//! └──────────────┘                        └───────┬────────┘
//!                                                 │
//!                                         ┌───────▼────────┐      HTTP poll
//!                                         │    Session     │◀────────────────▶ peer
//!                                         └────────────────┘
//! ```

pub mod client;
pub mod server;
pub mod types;

pub use client::{ControlClient, ControlClientError};
pub use server::{ControlState, DEFAULT_SOCKET_PATH, socket_path_from_config};
pub use types::*;
