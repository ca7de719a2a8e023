//! Sink configuration.
//!
//! Aggregates configuration from all modules into a single `SinkConfig`
//! that can be loaded from YAML files or environment variables.

use serde::Deserialize;

use crate::dlq::DlqConfig;
use crate::retry::RetryConfig;
use crate::sink::BulkConfig;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "bulk-retry.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "BULK_RETRY_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "BULK_RETRY";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "BULK_RETRY_LOG";

/// Errors that can occur while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main sink configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    /// Retry budget and backoff.
    pub retry: RetryConfig,
    /// Batching thresholds.
    pub bulk: BulkConfig,
    /// Dead letter destination.
    pub dlq: DlqConfig,
    /// Pipeline name recorded on dead letters.
    pub pipeline_name: String,
    /// Plugin name recorded on dead letters.
    pub plugin_name: String,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            bulk: BulkConfig::default(),
            dlq: DlqConfig::default(),
            pipeline_name: "default".to_string(),
            plugin_name: "bulk-retry".to_string(),
        }
    }
}

impl SinkConfig {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `bulk-retry.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: SinkConfig = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.retry.multiplier.is_finite() || self.retry.multiplier <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "retry.multiplier must be a positive number, got {}",
                self.retry.multiplier
            )));
        }
        if self.retry.max_delay < self.retry.initial_delay {
            return Err(ConfigError::Invalid(
                "retry.max_delay_ms must not be below retry.initial_delay_ms".to_string(),
            ));
        }
        if self.bulk.bulk_size_bytes == Some(0) {
            return Err(ConfigError::Invalid(
                "bulk.bulk_size_bytes must be positive; omit it for no limit".to_string(),
            ));
        }
        Ok(())
    }

    /// Create config for testing.
    pub fn for_test() -> Self {
        Self {
            retry: RetryConfig::immediate(Some(3)),
            ..Self::default()
        }
    }
}

/// Serde adapter for durations given as integer milliseconds.
pub mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}
