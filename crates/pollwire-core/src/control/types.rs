//! Request/response types for the control socket, shared by server and client.

use serde::{Deserialize, Serialize};

use crate::session::SessionStatus;

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Session status plus process details.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub session: SessionStatus,
    pub endpoint: String,
    pub uptime_secs: u64,
    pub pid: u32,
}

/// Shutdown acknowledgement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopResponse {
    pub acknowledged: bool,
    pub message: String,
}

/// Queue a payload on the running session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteRequest {
    pub tag: String,
    pub data: String,
}

/// Result of a queued write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteResponse {
    pub accepted: bool,
    /// Chunks pending for the tag after the write.
    pub pending: usize,
}

/// Effective configuration rendered as TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigResponse {
    pub toml: String,
}

/// Generic error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
