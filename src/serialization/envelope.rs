//! Wire envelope.
//!
//! Messages published to SNS reach SQS wrapped in an SNS notification
//! document. The `Subject` carries the message type and `Message` carries the
//! serialized payload.

use serde::{Deserialize, Serialize};

use super::{Result, SerializationError};

/// SNS notification document as delivered into an SQS queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SnsNotification {
    #[serde(rename = "Type", default)]
    pub kind: String,
    #[serde(default)]
    pub message_id: String,
    #[serde(default)]
    pub topic_arn: String,
    #[serde(default)]
    pub subject: Option<String>,
    pub message: String,
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl SnsNotification {
    pub fn new(
        message_id: impl Into<String>,
        topic_arn: impl Into<String>,
        subject: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind: "Notification".to_string(),
            message_id: message_id.into(),
            topic_arn: topic_arn.into(),
            subject: Some(subject.into()),
            message: message.into(),
            timestamp: Some(chrono::Utc::now().to_rfc3339()),
        }
    }
}

/// Type discriminator plus opaque payload, extracted from a queue message body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub message_id: String,
    pub message_type: String,
    pub payload: String,
}

impl Envelope {
    /// Parse an SNS notification body.
    pub fn parse(body: &str) -> Result<Self> {
        let notification: SnsNotification = serde_json::from_str(body)
            .map_err(|e| SerializationError::Envelope(e.to_string()))?;

        let message_type = notification
            .subject
            .filter(|subject| !subject.is_empty())
            .ok_or_else(|| SerializationError::Envelope("missing Subject".to_string()))?;

        Ok(Self {
            message_id: notification.message_id,
            message_type,
            payload: notification.message,
        })
    }
}
