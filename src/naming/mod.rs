//! Endpoint resolution.
//!
//! Maps a logical topic to concrete SNS topic and SQS queue names.
//! Topic naming: `{prefix}-{environment}-{topic}`
//! Queue naming: `{prefix}-{environment}-{topic}[-{instance_position}]`
//! Error queue naming: `{queue}_error`
//!
//! Every function here is pure so repeated startups resolve the same names
//! and find the resources created by earlier runs.

use serde::Deserialize;

use crate::config::SubscriptionSettings;

/// SQS queue names are limited to 80 characters.
pub const MAX_QUEUE_NAME_LEN: usize = 80;
/// SNS topic names are limited to 256 characters.
pub const MAX_TOPIC_NAME_LEN: usize = 256;
pub const ERROR_QUEUE_SUFFIX: &str = "_error";

/// Naming convention applied to every topic and queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct NamingConvention {
    /// Application prefix (e.g., "billing").
    pub prefix: Option<String>,
    /// Deployment environment (e.g., "prod", "staging").
    pub environment: Option<String>,
}

impl NamingConvention {
    pub fn new(prefix: Option<&str>, environment: Option<&str>) -> Self {
        Self {
            prefix: prefix.map(str::to_string),
            environment: environment.map(str::to_string),
        }
    }

    /// Name of the topic messages for this subscription are published on.
    pub fn resolve_publish_endpoint(&self, settings: &SubscriptionSettings) -> String {
        truncate(self.qualified(&settings.topic), MAX_TOPIC_NAME_LEN)
    }

    /// Name of the queue the subscription listens on.
    pub fn resolve_queue_name(&self, settings: &SubscriptionSettings) -> String {
        let base = match settings.queue_name.as_deref().map(sanitize) {
            Some(explicit) if !explicit.is_empty() => explicit,
            _ => self.qualified(&settings.topic),
        };
        let suffix = settings
            .instance_position
            .map(|position| format!("-{position}"))
            .unwrap_or_default();
        // Leave room for the error queue suffix so both names stay valid.
        let room = MAX_QUEUE_NAME_LEN - ERROR_QUEUE_SUFFIX.len() - suffix.len();
        let base = truncate(base, room);
        if base.is_empty() {
            return base;
        }
        format!("{base}{suffix}")
    }

    /// Name of the dead-letter queue paired with the subscription's queue.
    pub fn resolve_error_queue_name(&self, settings: &SubscriptionSettings) -> String {
        format!("{}{}", self.resolve_queue_name(settings), ERROR_QUEUE_SUFFIX)
    }

    /// Topic name for a publisher that is not tied to a subscription.
    pub fn resolve_topic_name(&self, topic: &str) -> String {
        truncate(self.qualified(topic), MAX_TOPIC_NAME_LEN)
    }

    fn qualified(&self, name: &str) -> String {
        let name = sanitize(name);
        if name.is_empty() {
            return name;
        }
        [self.prefix.as_deref(), self.environment.as_deref()]
            .into_iter()
            .flatten()
            .map(sanitize)
            .filter(|part| !part.is_empty())
            .chain(std::iter::once(name))
            .collect::<Vec<_>>()
            .join("-")
    }
}

/// Lower-case and replace anything outside `[a-z0-9_-]` with a dash.
///
/// Dots become dashes, matching how hierarchical names are flattened for AWS.
pub fn sanitize(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

fn truncate(mut name: String, max: usize) -> String {
    // Sanitized names are ASCII, so byte truncation stays on a char boundary.
    name.truncate(max);
    name
}

#[cfg(test)]
mod tests;
