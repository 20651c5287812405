//! Queue and topic provisioning.
//!
//! Ensures the resources behind a subscription exist: error queue, queue with
//! its redrive policy, publish topic, send policy and subscription. Every step
//! looks before it creates, so provisioning the same subscription twice creates
//! nothing the second time.

use std::sync::Arc;

use tracing::{debug, info};

use crate::config::SubscriptionConfig;
use crate::interfaces::{
    QueueAttributes, QueueHandle, QueueRef, QueueService, RedrivePolicy, ServiceError,
    TopicService,
};

/// Errors raised while provisioning a subscription.
#[derive(Debug, thiserror::Error)]
pub enum ProvisioningError {
    #[error("Queue service serves region '{actual}', subscription expects '{expected}'")]
    RegionMismatch { expected: String, actual: String },

    #[error("Failed to {step} '{resource}': {source}")]
    Service {
        step: &'static str,
        resource: String,
        #[source]
        source: ServiceError,
    },
}

/// Attach the failed step and resource to a collaborator error.
trait ProvisioningStep<T> {
    fn step(self, step: &'static str, resource: &str) -> Result<T, ProvisioningError>;
}

impl<T> ProvisioningStep<T> for Result<T, ServiceError> {
    fn step(self, step: &'static str, resource: &str) -> Result<T, ProvisioningError> {
        self.map_err(|source| ProvisioningError::Service {
            step,
            resource: resource.to_string(),
            source,
        })
    }
}

/// Verifies or creates the queue and topic resources of subscriptions.
#[derive(Clone)]
pub struct QueueProvisioner {
    queues: Arc<dyn QueueService>,
    topics: Arc<dyn TopicService>,
}

impl QueueProvisioner {
    pub fn new(queues: Arc<dyn QueueService>, topics: Arc<dyn TopicService>) -> Self {
        Self { queues, topics }
    }

    pub fn region(&self) -> &str {
        self.queues.region()
    }

    /// Ensure the queue of `config` exists and receives from its topic.
    ///
    /// An existing queue is used as is; its attributes are never updated.
    pub async fn verify_or_create_queue(
        &self,
        region: &str,
        config: &SubscriptionConfig,
    ) -> Result<QueueHandle, ProvisioningError> {
        let actual = self.queues.region();
        if actual != region {
            return Err(ProvisioningError::RegionMismatch {
                expected: region.to_string(),
                actual: actual.to_string(),
            });
        }

        let settings = config.settings();
        let redrive_policy = match config.error_queue_name() {
            Some(error_queue_name) => {
                let attributes = QueueAttributes {
                    retention_seconds: settings.error_queue_retention_seconds,
                    visibility_timeout_seconds: settings.visibility_timeout_seconds,
                    redrive_policy: None,
                };
                let error_queue = self.ensure_queue(error_queue_name, &attributes).await?;
                Some(RedrivePolicy {
                    dead_letter_target_arn: error_queue.arn,
                    max_receive_count: settings.max_receive_count,
                })
            }
            None => None,
        };

        let attributes = QueueAttributes {
            retention_seconds: settings.retention_seconds,
            visibility_timeout_seconds: settings.visibility_timeout_seconds,
            redrive_policy,
        };
        let queue = self.ensure_queue(config.queue_name(), &attributes).await?;

        let topic_arn = self.verify_or_create_topic(config.publish_endpoint()).await?;
        self.queues
            .attach_send_policy(&queue, &topic_arn)
            .await
            .step("attach send policy to queue", &queue.name)?;
        self.topics
            .subscribe_queue(&topic_arn, &queue)
            .await
            .step("subscribe queue to topic", &topic_arn)?;

        info!(
            topic = %config.topic(),
            queue = %queue.name,
            topic_arn = %topic_arn,
            "Subscription provisioned"
        );
        Ok(QueueHandle::new(region, queue, Arc::clone(&self.queues)))
    }

    /// Ensure a topic named `name` exists and return its endpoint.
    pub async fn verify_or_create_topic(&self, name: &str) -> Result<String, ProvisioningError> {
        if let Some(arn) = self.topics.find_topic(name).await.step("look up topic", name)? {
            debug!(topic = %name, "Topic exists");
            return Ok(arn);
        }
        let arn = self.topics.create_topic(name).await.step("create topic", name)?;
        info!(topic = %name, topic_arn = %arn, "Created topic");
        Ok(arn)
    }

    async fn ensure_queue(
        &self,
        name: &str,
        attributes: &QueueAttributes,
    ) -> Result<QueueRef, ProvisioningError> {
        if let Some(queue) = self.queues.get_queue(name).await.step("look up queue", name)? {
            debug!(queue = %name, "Queue exists");
            return Ok(queue);
        }
        let queue = self
            .queues
            .create_queue(name, attributes)
            .await
            .step("create queue", name)?;
        info!(
            queue = %name,
            retention_seconds = attributes.retention_seconds,
            visibility_timeout_seconds = attributes.visibility_timeout_seconds,
            redrive = attributes.redrive_policy.is_some(),
            "Created queue"
        );
        Ok(queue)
    }
}
