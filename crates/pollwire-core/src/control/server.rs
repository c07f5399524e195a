//! Control server: an axum router over a Unix domain socket.
//!
//! Serves until the session it controls is stopped, then removes the socket.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use tokio::net::UnixListener;
use tracing::info;

use pollwire_config::AppConfig;

use super::types::*;
use crate::poll::wait_stopped;
use crate::session::{Session, WriteError};

/// Shared state accessible to all control route handlers.
pub struct ControlState {
    pub session: Session,
    pub config: AppConfig,
    pub started_at: Instant,
}

impl ControlState {
    pub fn new(session: Session, config: AppConfig) -> Self {
        Self {
            session,
            config,
            started_at: Instant::now(),
        }
    }
}

/// Default Unix socket path for the control server.
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/pollwire.sock";

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, error: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
}

/// Build the axum router with all control routes.
pub fn router(state: Arc<ControlState>) -> axum::Router {
    axum::Router::new()
        .route("/health", get(handle_health))
        .route("/status", get(handle_status))
        .route("/stop", post(handle_stop))
        .route("/write", post(handle_write))
        .route("/config", get(handle_config))
        .with_state(state)
}

/// Serve the control API on `socket_path` until the session stops.
///
/// Removes any stale socket file before binding and the socket itself on exit.
pub async fn serve(socket_path: &Path, state: Arc<ControlState>) -> Result<(), std::io::Error> {
    if socket_path.exists() {
        std::fs::remove_file(socket_path)?;
    }
    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent).ok();
    }

    let listener = UnixListener::bind(socket_path)?;
    info!(path = %socket_path.display(), "Control server listening");

    let mut session_state = state.session.subscribe_state();
    let app = router(state);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            wait_stopped(&mut session_state).await;
            info!("Control server shutting down");
        })
        .await?;

    std::fs::remove_file(socket_path).ok();
    Ok(())
}

/// Resolve the socket path from config or use the default.
pub fn socket_path_from_config(config: &AppConfig) -> PathBuf {
    config
        .control
        .socket_path
        .as_deref()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SOCKET_PATH))
}

// ── Route handlers ──────────────────────────────────────────────────────

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: crate::build_info::version_string(),
    })
}

async fn handle_status(State(state): State<Arc<ControlState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        session: state.session.status(),
        endpoint: state.config.endpoint.url.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        pid: std::process::id(),
    })
}

async fn handle_stop(State(state): State<Arc<ControlState>>) -> Json<StopResponse> {
    info!("Stop requested via control socket");
    let issued = state.session.stop();
    Json(StopResponse {
        acknowledged: true,
        message: if issued {
            "Shutdown initiated".to_string()
        } else {
            "Session already stopped".to_string()
        },
    })
}

async fn handle_write(
    State(state): State<Arc<ControlState>>,
    Json(req): Json<WriteRequest>,
) -> Result<Json<WriteResponse>, ApiError> {
    if req.tag.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "tag must not be empty"));
    }
    match state.session.try_write(&req.tag, req.data.into_bytes()) {
        Ok(()) => Ok(Json(WriteResponse {
            accepted: true,
            pending: state.session.pending().get(&req.tag).copied().unwrap_or(0),
        })),
        Err(e @ WriteError::QueueFull(_)) => {
            Err(api_error(StatusCode::SERVICE_UNAVAILABLE, e.to_string()))
        }
        Err(e @ WriteError::Stopped) => Err(api_error(StatusCode::CONFLICT, e.to_string())),
    }
}

async fn handle_config(
    State(state): State<Arc<ControlState>>,
) -> Result<Json<ConfigResponse>, ApiError> {
    toml::to_string_pretty(&state.config)
        .map(|toml| Json(ConfigResponse { toml }))
        .map_err(|e| {
            api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to serialize config: {e}"),
            )
        })
}
