//! SQS queue service.

use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_sqs::types::QueueAttributeName;
use aws_sdk_sqs::Client;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::service_error;
use crate::config::{MAX_RECEIVE_BATCH, MAX_WAIT_TIME_SECS};
use crate::interfaces::{
    QueueAttributes, QueueRef, QueueService, ReceivedMessage, Result, ServiceError,
};

/// Queue service backed by AWS SQS.
#[derive(Debug, Clone)]
pub struct SqsQueueService {
    client: Client,
    region: String,
}

impl SqsQueueService {
    pub fn new(client: Client, region: impl Into<String>) -> Self {
        Self {
            client,
            region: region.into(),
        }
    }

    async fn queue_arn(&self, url: &str) -> Result<String> {
        let output = self
            .client
            .get_queue_attributes()
            .queue_url(url)
            .attribute_names(QueueAttributeName::QueueArn)
            .send()
            .await
            .map_err(|e| service_error("get queue ARN", e))?;

        output
            .attributes()
            .and_then(|attrs| attrs.get(&QueueAttributeName::QueueArn))
            .cloned()
            .ok_or_else(|| ServiceError::Rejected(format!("queue '{url}' has no ARN attribute")))
    }

    async fn queue_policy(&self, url: &str) -> Result<Option<String>> {
        let output = self
            .client
            .get_queue_attributes()
            .queue_url(url)
            .attribute_names(QueueAttributeName::Policy)
            .send()
            .await
            .map_err(|e| service_error("get queue policy", e))?;

        Ok(output
            .attributes()
            .and_then(|attrs| attrs.get(&QueueAttributeName::Policy))
            .cloned())
    }
}

/// Policy statement letting topic `source_arn` send into `queue_arn`.
fn send_statement(queue_arn: &str, source_arn: &str) -> Value {
    json!({
        "Effect": "Allow",
        "Principal": { "Service": "sns.amazonaws.com" },
        "Action": "sqs:SendMessage",
        "Resource": queue_arn,
        "Condition": { "ArnEquals": { "aws:SourceArn": source_arn } }
    })
}

/// Merge a send statement for `source_arn` into an existing policy document.
///
/// Returns `None` when the policy already allows that source.
fn merge_send_policy(
    existing: Option<&str>,
    queue_arn: &str,
    source_arn: &str,
) -> std::result::Result<Option<String>, serde_json::Error> {
    let mut policy = match existing {
        Some(document) if !document.trim().is_empty() => serde_json::from_str::<Value>(document)?,
        _ => json!({ "Version": "2012-10-17", "Statement": [] }),
    };

    if !policy.is_object() {
        return Err(serde::de::Error::custom("policy document is not an object"));
    }
    if !policy.get("Statement").is_some_and(|statement| statement.is_array()) {
        // A policy may hold a single statement object instead of a list.
        let single = policy.get_mut("Statement").map(Value::take);
        policy["Statement"] = Value::Array(single.into_iter().collect());
    }
    let Value::Array(statements) = &mut policy["Statement"] else {
        unreachable!("statement list was just normalized")
    };

    let already_allowed = statements.iter().any(|statement| {
        statement
            .pointer("/Condition/ArnEquals/aws:SourceArn")
            .and_then(Value::as_str)
            == Some(source_arn)
    });
    if already_allowed {
        return Ok(None);
    }

    statements.push(send_statement(queue_arn, source_arn));
    Ok(Some(policy.to_string()))
}

#[async_trait]
impl QueueService for SqsQueueService {
    fn region(&self) -> &str {
        &self.region
    }

    async fn get_queue(&self, name: &str) -> Result<Option<QueueRef>> {
        let output = match self.client.get_queue_url().queue_name(name).send().await {
            Ok(output) => output,
            Err(e) => {
                let missing = e
                    .as_service_error()
                    .is_some_and(|service| service.is_queue_does_not_exist());
                if missing {
                    return Ok(None);
                }
                return Err(service_error("get queue URL", e));
            }
        };

        let url = output
            .queue_url()
            .ok_or_else(|| ServiceError::Rejected(format!("no URL returned for queue '{name}'")))?
            .to_string();
        let arn = self.queue_arn(&url).await?;
        Ok(Some(QueueRef {
            name: name.to_string(),
            url,
            arn,
        }))
    }

    async fn create_queue(&self, name: &str, attributes: &QueueAttributes) -> Result<QueueRef> {
        let mut request = self
            .client
            .create_queue()
            .queue_name(name)
            .attributes(
                QueueAttributeName::MessageRetentionPeriod,
                attributes.retention_seconds.to_string(),
            )
            .attributes(
                QueueAttributeName::VisibilityTimeout,
                attributes.visibility_timeout_seconds.to_string(),
            );
        if let Some(ref redrive) = attributes.redrive_policy {
            let policy = json!({
                "deadLetterTargetArn": redrive.dead_letter_target_arn,
                "maxReceiveCount": redrive.max_receive_count.to_string(),
            });
            request = request.attributes(QueueAttributeName::RedrivePolicy, policy.to_string());
        }

        let output = request
            .send()
            .await
            .map_err(|e| service_error("create queue", e))?;
        let url = output
            .queue_url()
            .ok_or_else(|| ServiceError::Rejected("create queue returned no URL".to_string()))?
            .to_string();
        let arn = self.queue_arn(&url).await?;

        debug!(queue = %name, url = %url, "Created SQS queue");
        Ok(QueueRef {
            name: name.to_string(),
            url,
            arn,
        })
    }

    async fn receive(
        &self,
        queue: &QueueRef,
        max_batch: usize,
        wait: Duration,
    ) -> Result<Vec<ReceivedMessage>> {
        let max_messages = max_batch.clamp(1, MAX_RECEIVE_BATCH) as i32;
        let wait_time_secs = wait.as_secs().min(MAX_WAIT_TIME_SECS) as i32;

        let output = self
            .client
            .receive_message()
            .queue_url(&queue.url)
            .max_number_of_messages(max_messages)
            .wait_time_seconds(wait_time_secs)
            .send()
            .await
            .map_err(|e| service_error("receive messages", e))?;

        let mut received = Vec::with_capacity(output.messages().len());
        for message in output.messages() {
            match (message.receipt_handle(), message.body()) {
                (Some(receipt_handle), Some(body)) => received.push(ReceivedMessage {
                    message_id: message.message_id().unwrap_or_default().to_string(),
                    receipt_handle: receipt_handle.to_string(),
                    body: body.to_string(),
                }),
                _ => warn!(
                    queue = %queue.name,
                    message_id = ?message.message_id(),
                    "Skipping message without receipt handle or body"
                ),
            }
        }
        Ok(received)
    }

    async fn delete(&self, queue: &QueueRef, receipt_handle: &str) -> Result<()> {
        self.client
            .delete_message()
            .queue_url(&queue.url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(|e| service_error("delete message", e))?;
        Ok(())
    }

    async fn attach_send_policy(&self, queue: &QueueRef, principal: &str) -> Result<()> {
        let existing = self.queue_policy(&queue.url).await?;
        let merged = merge_send_policy(existing.as_deref(), &queue.arn, principal).map_err(|e| {
            ServiceError::Rejected(format!("queue '{}' has an unreadable policy: {e}", queue.name))
        })?;
        let Some(policy) = merged else {
            debug!(queue = %queue.name, principal = %principal, "Send policy already attached");
            return Ok(());
        };

        self.client
            .set_queue_attributes()
            .queue_url(&queue.url)
            .attributes(QueueAttributeName::Policy, policy)
            .send()
            .await
            .map_err(|e| service_error("set queue policy", e))?;

        debug!(queue = %queue.name, principal = %principal, "Attached send policy");
        Ok(())
    }
}
