//! Engine configuration.
//!
//! # Responsibilities
//! - Schema for engine tuning: stream keep-alive, drain deadline, client
//!   retry policy
//! - Loading from TOML (serde handles syntactic validation)
//! - Semantic validation returning all errors, not just the first
//!
//! # Design Decisions
//! - Every field has a default so an empty file is a valid config
//! - Durations are stored as integer fields and exposed through typed
//!   accessors

use std::path::Path;

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root engine configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Idle interval between stream keep-alive newlines, in milliseconds.
    pub sse_keep_alive_ms: u64,

    /// Shutdown drain settings.
    pub drain: DrainConfig,

    /// Client retry policy.
    pub retry: RetryConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sse_keep_alive_ms: 15_000,
            drain: DrainConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn sse_keep_alive(&self) -> Duration {
        Duration::from_millis(self.sse_keep_alive_ms)
    }
}

/// How long shutdown waits for in-flight requests and background tasks.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DrainConfig {
    /// Hard deadline in seconds.
    pub max_wait_secs: u64,

    /// Poll interval in milliseconds.
    pub check_interval_ms: u64,
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self { max_wait_secs: 300, check_interval_ms: 250 }
    }
}

impl DrainConfig {
    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_secs)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }
}

/// Bounded retry policy for the client. Applies to 5xx responses only.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Additional attempts after the first (0 disables retries).
    pub max_retries: u32,

    /// Base backoff delay in milliseconds (doubles per attempt).
    pub base_delay_ms: u64,

    /// Backoff ceiling in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_retries: 2, base_delay_ms: 100, max_delay_ms: 2_000 }
    }
}

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Validation failed: {}", .0.join(", "))]
    Validation(Vec<String>),
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<EngineConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    from_toml(&content)
}

/// Parse and validate configuration from a TOML string.
pub fn from_toml(content: &str) -> Result<EngineConfig, ConfigError> {
    let config: EngineConfig = toml::from_str(content)?;
    validate(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Semantic validation. Collects every problem before reporting.
pub fn validate(config: &EngineConfig) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();
    if config.sse_keep_alive_ms == 0 {
        errors.push("sse_keep_alive_ms must be greater than zero".to_string());
    }
    if config.drain.max_wait_secs == 0 {
        errors.push("drain.max_wait_secs must be greater than zero".to_string());
    }
    if config.drain.check_interval_ms == 0 {
        errors.push("drain.check_interval_ms must be greater than zero".to_string());
    }
    if config.drain.check_interval_ms > config.drain.max_wait_secs.saturating_mul(1_000) {
        errors.push("drain.check_interval_ms exceeds the drain deadline".to_string());
    }
    if config.retry.base_delay_ms == 0 {
        errors.push("retry.base_delay_ms must be greater than zero".to_string());
    }
    if config.retry.max_delay_ms < config.retry.base_delay_ms {
        errors.push("retry.max_delay_ms must be at least retry.base_delay_ms".to_string());
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
