//! Topic service interface.

use async_trait::async_trait;

use super::{QueueRef, Result};

/// Interface for topic management and publishing.
///
/// Topics are addressed by an endpoint (an ARN for SNS) once they exist.
#[async_trait]
pub trait TopicService: Send + Sync {
    /// Look up a topic by name, returning its publish endpoint.
    async fn find_topic(&self, name: &str) -> Result<Option<String>>;

    /// Check whether a topic with this name exists.
    async fn topic_exists(&self, name: &str) -> Result<bool> {
        Ok(self.find_topic(name).await?.is_some())
    }

    /// Create a topic and return its publish endpoint.
    async fn create_topic(&self, name: &str) -> Result<String>;

    /// Fan out messages published on `endpoint` into `queue`.
    async fn subscribe_queue(&self, endpoint: &str, queue: &QueueRef) -> Result<()>;

    /// Publish a payload. `subject` carries the message type discriminator.
    async fn publish(&self, endpoint: &str, subject: &str, payload: &str) -> Result<()>;
}
