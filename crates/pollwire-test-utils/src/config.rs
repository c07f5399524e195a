//! Configuration builders and temp config files for tests.
//!
//! Use [`TestConfigBuilder`] to create customised [`AppConfig`] values without
//! repeating boilerplate across crate boundaries.

use std::path::PathBuf;

use pollwire_config::{AppConfig, HandlerConfig};
use tempfile::TempDir;

/// Fluent builder for [`AppConfig`] in tests.
///
/// # Example
///
/// ```ignore
/// let config = TestConfigBuilder::new()
///     .endpoint_url("http://127.0.0.1:9000/poll")
///     .queue_capacity(4)
///     .build();
/// ```
pub struct TestConfigBuilder {
    config: AppConfig,
}

impl TestConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: AppConfig::default(),
        }
    }

    pub fn endpoint_url(mut self, url: &str) -> Self {
        self.config.endpoint.url = url.to_string();
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.endpoint.request_timeout_secs = secs;
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.session.queue_capacity = capacity;
        self
    }

    pub fn write_timeout_ms(mut self, ms: u64) -> Self {
        self.config.session.write_timeout_ms = Some(ms);
        self
    }

    pub fn dispatch_policy(mut self, policy: &str) -> Self {
        self.config.session.dispatch_policy = policy.to_string();
        self
    }

    /// Millisecond pacing for every loop delay, for fast tests.
    pub fn fast_polling(mut self) -> Self {
        self.config.session.poll_interval_ms = 1;
        self.config.session.fetch_retry_ms = 1;
        self.config.session.idle_backoff_min_ms = 1;
        self.config.session.idle_backoff_max_ms = 5;
        self
    }

    pub fn control_socket(mut self, path: &str) -> Self {
        self.config.control.socket_path = Some(path.to_string());
        self
    }

    pub fn control_enabled(mut self, enabled: bool) -> Self {
        self.config.control.enabled = enabled;
        self
    }

    pub fn log_level(mut self, level: &str) -> Self {
        self.config.logging.level = level.to_string();
        self
    }

    pub fn handler(mut self, tag: &str, action: &str, reply_tag: Option<&str>) -> Self {
        self.config.handlers.push(HandlerConfig {
            tag: tag.to_string(),
            action: action.to_string(),
            reply_tag: reply_tag.map(str::to_string),
        });
        self
    }

    pub fn build(self) -> AppConfig {
        self.config
    }
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A TOML config file in a temp directory that is removed on drop.
pub struct TestConfigFile {
    pub path: PathBuf,
    _temp_dir: TempDir,
}

impl TestConfigFile {
    pub async fn with_toml(toml_content: &str) -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let path = temp_dir.path().join("pollwire.toml");
        tokio::fs::write(&path, toml_content)
            .await
            .expect("failed to write test config");
        Self {
            path,
            _temp_dir: temp_dir,
        }
    }

    /// Load and validate the file.
    pub async fn load(&self) -> AppConfig {
        AppConfig::load(&self.path)
            .await
            .expect("failed to load test config")
    }
}
