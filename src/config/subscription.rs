//! Subscription configuration.
//!
//! `SubscriptionSettings` is the plain, deserializable form. It becomes a
//! `SubscriptionConfig` only through `SubscriptionConfig::new`, which resolves
//! resource names and rejects anything incomplete.

use std::fmt;
use std::sync::Arc;

use serde::Deserialize;

use super::ConfigError;
use crate::listener::ErrorCallback;
use crate::naming::NamingConvention;
use crate::strategy::{ProcessingStrategy, Throttled, Unbounded};

/// Four days, the SQS default.
pub const DEFAULT_RETENTION_SECS: u32 = 345_600;
/// Fourteen days, the SQS maximum.
pub const MAX_RETENTION_SECS: u32 = 1_209_600;
pub const MIN_RETENTION_SECS: u32 = 60;
pub const DEFAULT_VISIBILITY_TIMEOUT_SECS: u32 = 30;
/// Twelve hours, the SQS maximum.
pub const MAX_VISIBILITY_TIMEOUT_SECS: u32 = 43_200;
pub const DEFAULT_MAX_RECEIVE_COUNT: u32 = 5;

/// Declarative subscription settings, as read from configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SubscriptionSettings {
    /// Logical topic name. Required.
    pub topic: String,
    /// Explicit queue name; derived from the topic when absent.
    pub queue_name: Option<String>,
    pub retention_seconds: u32,
    pub visibility_timeout_seconds: u32,
    /// Suffix giving each instance its own queue.
    pub instance_position: Option<u32>,
    /// Upper bound on concurrently handled messages. Unbounded when absent.
    pub max_in_flight: Option<usize>,
    /// Skip creating `<queue>_error` and its redrive policy.
    pub error_queue_opt_out: bool,
    pub error_queue_retention_seconds: u32,
    /// Deliveries before SQS moves a message to the error queue.
    pub max_receive_count: u32,
}

impl Default for SubscriptionSettings {
    fn default() -> Self {
        Self {
            topic: String::new(),
            queue_name: None,
            retention_seconds: DEFAULT_RETENTION_SECS,
            visibility_timeout_seconds: DEFAULT_VISIBILITY_TIMEOUT_SECS,
            instance_position: None,
            max_in_flight: None,
            error_queue_opt_out: false,
            error_queue_retention_seconds: MAX_RETENTION_SECS,
            max_receive_count: DEFAULT_MAX_RECEIVE_COUNT,
        }
    }
}

impl SubscriptionSettings {
    pub fn for_topic(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            ..Default::default()
        }
    }
}

/// Runtime-only parts of a subscription that cannot come from a file.
#[derive(Clone, Default)]
pub struct SubscriptionHooks {
    /// Invoked for every message that fails to dispatch.
    pub error_callback: Option<ErrorCallback>,
    /// Overrides the strategy derived from `max_in_flight`.
    pub processing_strategy: Option<Arc<dyn ProcessingStrategy>>,
}

impl fmt::Debug for SubscriptionHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHooks")
            .field("error_callback", &self.error_callback.is_some())
            .field("processing_strategy", &self.processing_strategy.is_some())
            .finish()
    }
}

/// A validated, immutable subscription.
#[derive(Clone)]
pub struct SubscriptionConfig {
    settings: SubscriptionSettings,
    queue_name: String,
    error_queue_name: Option<String>,
    publish_endpoint: String,
    error_callback: Option<ErrorCallback>,
    processing_strategy: Arc<dyn ProcessingStrategy>,
}

impl SubscriptionConfig {
    /// Validate settings and resolve resource names.
    ///
    /// Required fields are never defaulted: an empty topic, or a naming
    /// convention that resolves to an empty name, is an error.
    pub fn new(
        settings: SubscriptionSettings,
        naming: &NamingConvention,
        hooks: SubscriptionHooks,
    ) -> Result<Self, ConfigError> {
        if settings.topic.trim().is_empty() {
            return Err(ConfigError::MissingField("topic"));
        }
        if !(MIN_RETENTION_SECS..=MAX_RETENTION_SECS).contains(&settings.retention_seconds) {
            return Err(ConfigError::invalid(
                "retention_seconds",
                format!("must be between {MIN_RETENTION_SECS} and {MAX_RETENTION_SECS}"),
            ));
        }
        if !(MIN_RETENTION_SECS..=MAX_RETENTION_SECS)
            .contains(&settings.error_queue_retention_seconds)
        {
            return Err(ConfigError::invalid(
                "error_queue_retention_seconds",
                format!("must be between {MIN_RETENTION_SECS} and {MAX_RETENTION_SECS}"),
            ));
        }
        if settings.visibility_timeout_seconds > MAX_VISIBILITY_TIMEOUT_SECS {
            return Err(ConfigError::invalid(
                "visibility_timeout_seconds",
                format!("must be at most {MAX_VISIBILITY_TIMEOUT_SECS}"),
            ));
        }
        if !(1..=1000).contains(&settings.max_receive_count) {
            return Err(ConfigError::invalid(
                "max_receive_count",
                "must be between 1 and 1000",
            ));
        }

        let processing_strategy = match (hooks.processing_strategy, settings.max_in_flight) {
            (Some(strategy), _) => strategy,
            (None, Some(max)) => {
                let throttled = Throttled::new(max)
                    .map_err(|e| ConfigError::invalid("max_in_flight", e.to_string()))?;
                Arc::new(throttled) as Arc<dyn ProcessingStrategy>
            }
            (None, None) => Arc::new(Unbounded) as Arc<dyn ProcessingStrategy>,
        };

        let queue_name = naming.resolve_queue_name(&settings);
        if queue_name.is_empty() {
            return Err(ConfigError::invalid("queue_name", "resolved to an empty name"));
        }
        let publish_endpoint = naming.resolve_publish_endpoint(&settings);
        if publish_endpoint.is_empty() {
            return Err(ConfigError::invalid("topic", "resolved to an empty endpoint"));
        }
        let error_queue_name =
            (!settings.error_queue_opt_out).then(|| naming.resolve_error_queue_name(&settings));

        Ok(Self {
            settings,
            queue_name,
            error_queue_name,
            publish_endpoint,
            error_callback: hooks.error_callback,
            processing_strategy,
        })
    }

    pub fn topic(&self) -> &str {
        &self.settings.topic
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// `None` when the subscription opted out of an error queue.
    pub fn error_queue_name(&self) -> Option<&str> {
        self.error_queue_name.as_deref()
    }

    /// Name of the topic that publishes into this subscription's queue.
    pub fn publish_endpoint(&self) -> &str {
        &self.publish_endpoint
    }

    pub fn settings(&self) -> &SubscriptionSettings {
        &self.settings
    }

    pub fn error_callback(&self) -> Option<&ErrorCallback> {
        self.error_callback.as_ref()
    }

    pub fn processing_strategy(&self) -> Arc<dyn ProcessingStrategy> {
        Arc::clone(&self.processing_strategy)
    }
}

impl fmt::Debug for SubscriptionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionConfig")
            .field("topic", &self.settings.topic)
            .field("queue_name", &self.queue_name)
            .field("error_queue_name", &self.error_queue_name)
            .field("publish_endpoint", &self.publish_endpoint)
            .field("max_workers", &self.processing_strategy.max_workers())
            .finish_non_exhaustive()
    }
}
