//! Queue service interface.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::Result;

/// Location of a provisioned queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueRef {
    /// Queue name (unique per region).
    pub name: String,
    /// Address used for receive/delete calls.
    pub url: String,
    /// Resource identifier used in policies and redrive targets.
    pub arn: String,
}

/// Redrive policy moving repeatedly failing messages to an error queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedrivePolicy {
    pub dead_letter_target_arn: String,
    pub max_receive_count: u32,
}

/// Attributes applied when a queue is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueAttributes {
    pub retention_seconds: u32,
    pub visibility_timeout_seconds: u32,
    pub redrive_policy: Option<RedrivePolicy>,
}

/// A message as received from a queue, before any decoding.
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub message_id: String,
    /// Token required to delete (acknowledge) this delivery.
    pub receipt_handle: String,
    pub body: String,
}

/// Interface for queue provisioning and consumption.
///
/// Implementations:
/// - `SqsQueueService`: AWS SQS
/// - `InMemoryQueueService`: in-process queues for local runs and tests
#[async_trait]
pub trait QueueService: Send + Sync {
    /// Region this service instance talks to.
    fn region(&self) -> &str;

    /// Look up a queue by name.
    async fn get_queue(&self, name: &str) -> Result<Option<QueueRef>>;

    /// Check whether a queue with this name exists.
    async fn queue_exists(&self, name: &str) -> Result<bool> {
        Ok(self.get_queue(name).await?.is_some())
    }

    /// Create a queue with the given attributes.
    async fn create_queue(&self, name: &str, attributes: &QueueAttributes) -> Result<QueueRef>;

    /// Receive up to `max_batch` messages, waiting at most `wait` for the first one.
    async fn receive(
        &self,
        queue: &QueueRef,
        max_batch: usize,
        wait: Duration,
    ) -> Result<Vec<ReceivedMessage>>;

    /// Delete (acknowledge) a received message.
    async fn delete(&self, queue: &QueueRef, receipt_handle: &str) -> Result<()>;

    /// Allow `principal` (a topic ARN) to send into the queue.
    ///
    /// Must be idempotent: attaching an already attached principal is a no-op.
    async fn attach_send_policy(&self, queue: &QueueRef, principal: &str) -> Result<()>;
}

/// A provisioned queue bound to the service that owns it.
///
/// Created by the provisioner and owned by exactly one listener.
#[derive(Clone)]
pub struct QueueHandle {
    region: String,
    queue: QueueRef,
    service: Arc<dyn QueueService>,
}

impl QueueHandle {
    pub fn new(region: impl Into<String>, queue: QueueRef, service: Arc<dyn QueueService>) -> Self {
        Self {
            region: region.into(),
            queue,
            service,
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn name(&self) -> &str {
        &self.queue.name
    }

    pub fn queue(&self) -> &QueueRef {
        &self.queue
    }

    pub async fn receive(&self, max_batch: usize, wait: Duration) -> Result<Vec<ReceivedMessage>> {
        self.service.receive(&self.queue, max_batch, wait).await
    }

    pub async fn delete(&self, receipt_handle: &str) -> Result<()> {
        self.service.delete(&self.queue, receipt_handle).await
    }
}

impl fmt::Debug for QueueHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueHandle")
            .field("region", &self.region)
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}
