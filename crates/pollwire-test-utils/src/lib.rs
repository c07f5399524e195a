#![deny(unsafe_code)]

//! Shared test utilities for the pollwire workspace.
//!
//! Provides config builders, linked session pairs, recording handlers, a
//! scripted transport and tracing helpers so that individual crate tests
//! stay concise.
//!
//! Add this crate as a `[dev-dependency]` in any workspace member:
//!
//! ```toml
//! [dev-dependencies]
//! pollwire-test-utils = { workspace = true }
//! ```

pub mod config;
pub mod session;
pub mod tracing_setup;
pub mod transport;
