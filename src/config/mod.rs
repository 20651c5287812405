//! Application configuration.
//!
//! Aggregates AWS, naming, listener and subscription settings into a single
//! `HeraldConfig` that can be loaded from YAML files or environment variables.

mod subscription;

pub use subscription::{SubscriptionConfig, SubscriptionHooks, SubscriptionSettings};

use std::time::Duration;

use serde::Deserialize;

use crate::naming::NamingConvention;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "herald.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "HERALD_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "HERALD";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "HERALD_LOG";

/// SQS caps a single receive at 10 messages.
pub const MAX_RECEIVE_BATCH: usize = 10;
/// SQS caps long polling at 20 seconds.
pub const MAX_WAIT_TIME_SECS: u64 = 20;

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid value for '{field}': {message}")]
    Invalid {
        field: &'static str,
        message: String,
    },

    #[error("Failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            message: message.into(),
        }
    }
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HeraldConfig {
    /// AWS connection settings.
    pub aws: AwsConfig,
    /// Resource naming convention.
    pub naming: NamingConvention,
    /// Receive loop tuning shared by all listeners.
    pub listener: ListenerSettings,
    /// Subscriptions to provision and listen on.
    pub subscriptions: Vec<SubscriptionSettings>,
}

impl HeraldConfig {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `herald.yaml` in current directory (if exists)
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

        let config: HeraldConfig = config.try_deserialize()?;
        config.listener.validate()?;
        Ok(config)
    }

    /// Validate every configured subscription against the naming convention.
    ///
    /// Hooks are not part of the file format, so each subscription gets the
    /// defaults.
    pub fn subscription_configs(&self) -> Result<Vec<SubscriptionConfig>, ConfigError> {
        self.subscriptions
            .iter()
            .cloned()
            .map(|settings| {
                SubscriptionConfig::new(settings, &self.naming, SubscriptionHooks::default())
            })
            .collect()
    }
}

/// AWS connection settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AwsConfig {
    /// AWS region (e.g., "eu-west-1"). Uses default provider chain if not set.
    pub region: Option<String>,
    /// Custom endpoint URL (for LocalStack or testing).
    pub endpoint_url: Option<String>,
}

/// Receive loop tuning.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ListenerSettings {
    /// Max number of messages to receive in one poll (1..=10).
    pub batch_size: usize,
    /// Long polling wait in seconds (0..=20).
    pub wait_time_secs: u64,
    /// How long `stop()` waits for in-flight messages before detaching them.
    pub drain_timeout_secs: u64,
    /// First delay after a failed receive.
    pub receive_backoff_min_ms: u64,
    /// Upper bound for the delay between failed receives.
    pub receive_backoff_max_ms: u64,
}

impl Default for ListenerSettings {
    fn default() -> Self {
        Self {
            batch_size: MAX_RECEIVE_BATCH,
            wait_time_secs: MAX_WAIT_TIME_SECS,
            drain_timeout_secs: 30,
            receive_backoff_min_ms: 1_000,
            receive_backoff_max_ms: 30_000,
        }
    }
}

impl ListenerSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 || self.batch_size > MAX_RECEIVE_BATCH {
            return Err(ConfigError::invalid(
                "listener.batch_size",
                format!("must be between 1 and {MAX_RECEIVE_BATCH}"),
            ));
        }
        if self.wait_time_secs > MAX_WAIT_TIME_SECS {
            return Err(ConfigError::invalid(
                "listener.wait_time_secs",
                format!("must be at most {MAX_WAIT_TIME_SECS}"),
            ));
        }
        if self.receive_backoff_min_ms > self.receive_backoff_max_ms {
            return Err(ConfigError::invalid(
                "listener.receive_backoff_min_ms",
                "must not exceed receive_backoff_max_ms",
            ));
        }
        Ok(())
    }

    pub fn wait_time(&self) -> Duration {
        Duration::from_secs(self.wait_time_secs)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }

    pub fn receive_backoff_min(&self) -> Duration {
        Duration::from_millis(self.receive_backoff_min_ms)
    }

    pub fn receive_backoff_max(&self) -> Duration {
        Duration::from_millis(self.receive_backoff_max_ms)
    }
}
