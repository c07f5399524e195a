#![deny(unsafe_code)]

//! Configuration loading and validation for pollwire.
//!
//! Loads TOML configuration files and validates them. [`AppConfig`] is the
//! central configuration structure shared by the session runtime, the
//! control socket, and the CLI.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    Validation(String),
}

/// Top-level application configuration.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Remote endpoint the session polls and pushes to.
    #[serde(default)]
    pub endpoint: EndpointConfig,

    /// Multiplexer and poll-loop tuning.
    #[serde(default)]
    pub session: SessionConfig,

    /// Local control socket.
    #[serde(default)]
    pub control: ControlConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Handlers registered by the CLI for inbound tags.
    #[serde(default)]
    pub handlers: Vec<HandlerConfig>,
}

/// Remote endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// URL fetched with GET and pushed to with POST.
    #[serde(default = "default_endpoint_url")]
    pub url: String,

    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            url: default_endpoint_url(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl EndpointConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_endpoint_url() -> String {
    "http://127.0.0.1:8080/messages".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

/// Session tuning: queue bounds, write policy, and loop pacing.
///
/// ## TOML Example
///
/// ```toml
/// [session]
/// queue_capacity = 100
/// write_timeout_ms = 2000
/// poll_interval_ms = 100
/// fetch_retry_ms = 500
/// idle_backoff_min_ms = 5
/// idle_backoff_max_ms = 250
/// dispatch_policy = "abort"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Maximum pending chunks per tag before writers wait.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// How long a write may wait for queue space. Absent means wait
    /// indefinitely, `0` means fail immediately when the queue is full.
    #[serde(default)]
    pub write_timeout_ms: Option<u64>,

    /// Pause after a fetch that returned no messages.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Pause after a failed fetch before retrying.
    #[serde(default = "default_fetch_retry_ms")]
    pub fetch_retry_ms: u64,

    /// First idle sleep of the send loop when nothing is queued.
    #[serde(default = "default_idle_backoff_min_ms")]
    pub idle_backoff_min_ms: u64,

    /// Ceiling for the send loop's idle backoff.
    #[serde(default = "default_idle_backoff_max_ms")]
    pub idle_backoff_max_ms: u64,

    /// What to do with the rest of a batch when a handler fails:
    /// "abort" or "continue".
    #[serde(default = "default_dispatch_policy")]
    pub dispatch_policy: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            write_timeout_ms: None,
            poll_interval_ms: default_poll_interval_ms(),
            fetch_retry_ms: default_fetch_retry_ms(),
            idle_backoff_min_ms: default_idle_backoff_min_ms(),
            idle_backoff_max_ms: default_idle_backoff_max_ms(),
            dispatch_policy: default_dispatch_policy(),
        }
    }
}

impl SessionConfig {
    pub fn write_timeout(&self) -> Option<Duration> {
        self.write_timeout_ms.map(Duration::from_millis)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn fetch_retry(&self) -> Duration {
        Duration::from_millis(self.fetch_retry_ms)
    }

    pub fn idle_backoff_min(&self) -> Duration {
        Duration::from_millis(self.idle_backoff_min_ms)
    }

    pub fn idle_backoff_max(&self) -> Duration {
        Duration::from_millis(self.idle_backoff_max_ms)
    }
}

fn default_queue_capacity() -> usize {
    100
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_fetch_retry_ms() -> u64 {
    500
}

fn default_idle_backoff_min_ms() -> u64 {
    5
}

fn default_idle_backoff_max_ms() -> u64 {
    250
}

fn default_dispatch_policy() -> String {
    "abort".to_string()
}

/// Local control socket configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    /// Whether `pollwire run` serves the control socket.
    #[serde(default = "default_control_enabled")]
    pub enabled: bool,

    /// Unix socket path. Falls back to the built-in default when unset.
    #[serde(default)]
    pub socket_path: Option<String>,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            enabled: default_control_enabled(),
            socket_path: None,
        }
    }
}

fn default_control_enabled() -> bool {
    true
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g. "info", "debug", "trace").
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// A handler bound to an inbound tag.
///
/// ## TOML Example
///
/// ```toml
/// [[handlers]]
/// tag = "status"
/// action = "log"
///
/// [[handlers]]
/// tag = "ping"
/// action = "echo"
/// reply_tag = "pong"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerConfig {
    /// Inbound tag the handler is registered for.
    pub tag: String,

    /// "log" or "echo".
    #[serde(default = "default_handler_action")]
    pub action: String,

    /// Outbound tag for echoed payloads (required when action = "echo").
    #[serde(default)]
    pub reply_tag: Option<String>,
}

fn default_handler_action() -> String {
    "log".to_string()
}

impl AppConfig {
    /// Load configuration from a TOML file at the given path using async I/O.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path).await?;
        debug!(path = %path.display(), bytes = content.len(), "Loaded config file");
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = &self.endpoint.url;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::Validation(format!(
                "endpoint.url must be an http:// or https:// URL, got {url:?}"
            )));
        }
        if self.endpoint.request_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "endpoint.request_timeout_secs must be non-zero".to_string(),
            ));
        }

        let session = &self.session;
        if session.queue_capacity == 0 {
            return Err(ConfigError::Validation(
                "session.queue_capacity must be at least 1".to_string(),
            ));
        }
        if session.idle_backoff_min_ms == 0 {
            return Err(ConfigError::Validation(
                "session.idle_backoff_min_ms must be non-zero".to_string(),
            ));
        }
        if session.idle_backoff_min_ms > session.idle_backoff_max_ms {
            return Err(ConfigError::Validation(format!(
                "session.idle_backoff_min_ms ({}) exceeds session.idle_backoff_max_ms ({})",
                session.idle_backoff_min_ms, session.idle_backoff_max_ms
            )));
        }
        let valid_policies = ["abort", "continue"];
        if !valid_policies.contains(&session.dispatch_policy.as_str()) {
            return Err(ConfigError::Validation(format!(
                "session.dispatch_policy must be one of {:?}, got {:?}",
                valid_policies, session.dispatch_policy
            )));
        }

        if let Some(path) = &self.control.socket_path {
            if path.is_empty() {
                return Err(ConfigError::Validation(
                    "control.socket_path must not be empty when set".to_string(),
                ));
            }
        }

        let valid_actions = ["log", "echo"];
        for (i, handler) in self.handlers.iter().enumerate() {
            if handler.tag.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "handlers[{i}].tag must not be empty"
                )));
            }
            if !valid_actions.contains(&handler.action.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "handlers[{i}].action must be one of {:?}, got {:?}",
                    valid_actions, handler.action
                )));
            }
            if handler.action == "echo"
                && handler.reply_tag.as_deref().is_none_or(str::is_empty)
            {
                return Err(ConfigError::Validation(format!(
                    "handlers[{i}].reply_tag is required when action is \"echo\""
                )));
            }
            if self.handlers[..i].iter().any(|h| h.tag == handler.tag) {
                return Err(ConfigError::Validation(format!(
                    "handlers[{i}].tag {:?} is registered more than once",
                    handler.tag
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.endpoint.url, "http://127.0.0.1:8080/messages");
        assert_eq!(config.session.queue_capacity, 100);
        assert_eq!(config.session.write_timeout(), None);
        assert_eq!(config.session.dispatch_policy, "abort");
        assert!(config.control.enabled);
        assert_eq!(config.logging.level, "info");
        assert!(config.handlers.is_empty());
    }

    #[test]
    fn test_parse_minimal_toml() {
        let config = AppConfig::parse("").unwrap();
        assert_eq!(config.session.queue_capacity, 100);
        assert_eq!(config.endpoint.request_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_parse_full_toml() {
        let toml = r#"
            [endpoint]
            url = "https://relay.example.net/poll"
            request_timeout_secs = 10

            [session]
            queue_capacity = 8
            write_timeout_ms = 250
            poll_interval_ms = 50
            fetch_retry_ms = 1000
            idle_backoff_min_ms = 2
            idle_backoff_max_ms = 100
            dispatch_policy = "continue"

            [control]
            enabled = false
            socket_path = "/run/pollwire/control.sock"

            [logging]
            level = "debug"

            [[handlers]]
            tag = "status"

            [[handlers]]
            tag = "ping"
            action = "echo"
            reply_tag = "pong"
        "#;
        let config = AppConfig::parse(toml).unwrap();
        assert_eq!(config.endpoint.url, "https://relay.example.net/poll");
        assert_eq!(config.endpoint.request_timeout_secs, 10);
        assert_eq!(config.session.queue_capacity, 8);
        assert_eq!(
            config.session.write_timeout(),
            Some(Duration::from_millis(250))
        );
        assert_eq!(config.session.poll_interval(), Duration::from_millis(50));
        assert_eq!(config.session.fetch_retry(), Duration::from_secs(1));
        assert_eq!(config.session.idle_backoff_min(), Duration::from_millis(2));
        assert_eq!(config.session.idle_backoff_max(), Duration::from_millis(100));
        assert_eq!(config.session.dispatch_policy, "continue");
        assert!(!config.control.enabled);
        assert_eq!(
            config.control.socket_path.as_deref(),
            Some("/run/pollwire/control.sock")
        );
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.handlers.len(), 2);
        assert_eq!(config.handlers[0].action, "log");
        assert_eq!(config.handlers[1].reply_tag.as_deref(), Some("pong"));
    }

    #[test]
    fn test_validation_rejects_non_http_url() {
        let toml = r#"
            [endpoint]
            url = "ftp://example.com/messages"
        "#;
        assert!(AppConfig::parse(toml).is_err());
    }

    #[test]
    fn test_validation_rejects_zero_timeout() {
        let toml = r#"
            [endpoint]
            request_timeout_secs = 0
        "#;
        assert!(AppConfig::parse(toml).is_err());
    }

    #[test]
    fn test_validation_rejects_zero_capacity() {
        let toml = r#"
            [session]
            queue_capacity = 0
        "#;
        assert!(AppConfig::parse(toml).is_err());
    }

    #[test]
    fn test_validation_rejects_inverted_backoff() {
        let toml = r#"
            [session]
            idle_backoff_min_ms = 500
            idle_backoff_max_ms = 10
        "#;
        assert!(AppConfig::parse(toml).is_err());
    }

    #[test]
    fn test_validation_rejects_bad_dispatch_policy() {
        let toml = r#"
            [session]
            dispatch_policy = "retry"
        "#;
        assert!(AppConfig::parse(toml).is_err());
    }

    #[test]
    fn test_zero_write_timeout_is_allowed() {
        let toml = r#"
            [session]
            write_timeout_ms = 0
        "#;
        let config = AppConfig::parse(toml).unwrap();
        assert_eq!(config.session.write_timeout(), Some(Duration::ZERO));
    }

    #[test]
    fn test_validation_rejects_empty_socket_path() {
        let toml = r#"
            [control]
            socket_path = ""
        "#;
        assert!(AppConfig::parse(toml).is_err());
    }

    // ── Handlers ──────────────────────────────────────────────────────

    #[test]
    fn test_handler_validation_rejects_empty_tag() {
        let toml = r#"
            [[handlers]]
            tag = ""
        "#;
        assert!(AppConfig::parse(toml).is_err());
    }

    #[test]
    fn test_handler_validation_rejects_unknown_action() {
        let toml = r#"
            [[handlers]]
            tag = "ping"
            action = "forward"
        "#;
        assert!(AppConfig::parse(toml).is_err());
    }

    #[test]
    fn test_handler_validation_requires_reply_tag_for_echo() {
        let toml = r#"
            [[handlers]]
            tag = "ping"
            action = "echo"
        "#;
        assert!(AppConfig::parse(toml).is_err());
    }

    #[test]
    fn test_handler_validation_rejects_duplicate_tag() {
        let toml = r#"
            [[handlers]]
            tag = "ping"

            [[handlers]]
            tag = "ping"
            action = "echo"
            reply_tag = "pong"
        "#;
        let err = AppConfig::parse(toml).unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    // ── Async file-based loading ──────────────────────────────────────

    #[tokio::test]
    async fn test_load_from_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("pollwire.toml");
        tokio::fs::write(
            &path,
            b"[endpoint]\nurl = \"http://10.0.0.5:9000/mux\"\n[session]\nqueue_capacity = 4\n",
        )
        .await
        .unwrap();

        let config = AppConfig::load(&path).await.unwrap();
        assert_eq!(config.endpoint.url, "http://10.0.0.5:9000/mux");
        assert_eq!(config.session.queue_capacity, 4);
    }

    #[tokio::test]
    async fn test_load_nonexistent_file() {
        let result = AppConfig::load(Path::new("/nonexistent/file.toml")).await;
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[tokio::test]
    async fn test_load_invalid_toml_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("bad.toml");
        tokio::fs::write(&path, b"not valid toml [[[").await.unwrap();

        let result = AppConfig::load(&path).await;
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::Validation("bad value".to_string());
        assert_eq!(err.to_string(), "validation error: bad value");
    }

    #[test]
    fn test_roundtrip_through_toml() {
        let mut config = AppConfig::default();
        config.handlers.push(HandlerConfig {
            tag: "ping".to_string(),
            action: "echo".to_string(),
            reply_tag: Some("pong".to_string()),
        });
        let rendered = toml::to_string_pretty(&config).unwrap();
        let parsed = AppConfig::parse(&rendered).unwrap();
        assert_eq!(parsed.handlers[0].reply_tag.as_deref(), Some("pong"));
        assert_eq!(parsed.session.queue_capacity, config.session.queue_capacity);
    }
}
