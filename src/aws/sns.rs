//! SNS topic service.

use async_trait::async_trait;
use aws_sdk_sns::Client;
use tracing::debug;

use super::service_error;
use crate::interfaces::{QueueRef, Result, ServiceError, TopicService};

/// Topic service backed by AWS SNS.
#[derive(Debug, Clone)]
pub struct SnsTopicService {
    client: Client,
}

impl SnsTopicService {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

/// Topic name part of an SNS topic ARN.
fn topic_name(arn: &str) -> &str {
    arn.rsplit(':').next().unwrap_or(arn)
}

#[async_trait]
impl TopicService for SnsTopicService {
    async fn find_topic(&self, name: &str) -> Result<Option<String>> {
        let mut next_token: Option<String> = None;
        loop {
            let output = self
                .client
                .list_topics()
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|e| service_error("list topics", e))?;

            let found = output
                .topics()
                .iter()
                .filter_map(|topic| topic.topic_arn())
                .find(|arn| topic_name(arn) == name);
            if let Some(arn) = found {
                return Ok(Some(arn.to_string()));
            }

            match output.next_token() {
                Some(token) => next_token = Some(token.to_string()),
                None => return Ok(None),
            }
        }
    }

    async fn create_topic(&self, name: &str) -> Result<String> {
        let output = self
            .client
            .create_topic()
            .name(name)
            .send()
            .await
            .map_err(|e| service_error("create topic", e))?;

        output
            .topic_arn()
            .map(str::to_string)
            .ok_or_else(|| ServiceError::Rejected("create topic returned no ARN".to_string()))
    }

    async fn subscribe_queue(&self, endpoint: &str, queue: &QueueRef) -> Result<()> {
        // Subscribing an already subscribed endpoint returns the existing
        // subscription. Raw delivery stays off: listeners read the envelope.
        self.client
            .subscribe()
            .topic_arn(endpoint)
            .protocol("sqs")
            .endpoint(&queue.arn)
            .send()
            .await
            .map_err(|e| service_error("subscribe queue", e))?;

        debug!(queue_arn = %queue.arn, topic_arn = %endpoint, "Subscribed queue to topic");
        Ok(())
    }

    async fn publish(&self, endpoint: &str, subject: &str, payload: &str) -> Result<()> {
        self.client
            .publish()
            .topic_arn(endpoint)
            .subject(subject)
            .message(payload)
            .send()
            .await
            .map_err(|e| service_error("publish", e))?;
        Ok(())
    }
}
