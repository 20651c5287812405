//! Message publishers.
//!
//! The bus serializes a message and hands the payload to the publisher
//! registered for its type. `TopicPublisher` sends it to a topic with the
//! message type as subject, which is what listeners route on.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::interfaces::{ServiceError, TopicService};
use crate::provisioning::{ProvisioningError, QueueProvisioner};

/// Sends serialized messages somewhere subscribers can receive them.
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    /// Publish an already serialized payload of `message_type`.
    async fn publish(&self, message_type: &str, payload: &str) -> Result<(), ServiceError>;

    /// Where messages go, for logs and errors.
    fn endpoint(&self) -> &str;
}

/// Publishes to one topic.
#[derive(Clone)]
pub struct TopicPublisher {
    topics: Arc<dyn TopicService>,
    endpoint: String,
}

impl TopicPublisher {
    /// Publisher for an existing topic endpoint.
    pub fn new(topics: Arc<dyn TopicService>, endpoint: impl Into<String>) -> Self {
        Self {
            topics,
            endpoint: endpoint.into(),
        }
    }

    /// Ensure `topic_name` exists and return a publisher for it.
    pub async fn provision(
        provisioner: &QueueProvisioner,
        topics: Arc<dyn TopicService>,
        topic_name: &str,
    ) -> Result<Self, ProvisioningError> {
        let endpoint = provisioner.verify_or_create_topic(topic_name).await?;
        Ok(Self::new(topics, endpoint))
    }
}

#[async_trait]
impl MessagePublisher for TopicPublisher {
    async fn publish(&self, message_type: &str, payload: &str) -> Result<(), ServiceError> {
        self.topics
            .publish(&self.endpoint, message_type, payload)
            .await?;
        debug!(
            endpoint = %self.endpoint,
            message_type = %message_type,
            "Message published"
        );
        Ok(())
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl fmt::Debug for TopicPublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TopicPublisher")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}
