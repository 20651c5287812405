//! In-memory queue and topic services.
//!
//! Mimic the SNS/SQS behaviour the dispatch engine relies on: visibility
//! timeouts and redelivery, redrive to an error queue, send policies gating
//! topic fan-out, and SNS notification envelopes. Ideal for local development
//! and testing without external dependencies.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::interfaces::{
    QueueAttributes, QueueRef, QueueService, ReceivedMessage, Result, ServiceError, TopicService,
};
use crate::serialization::SnsNotification;

/// Account id used in generated ARNs.
pub const LOCAL_ACCOUNT_ID: &str = "000000000000";

/// Upper bound on a single sleep while long polling, so expired in-flight
/// messages are noticed promptly.
const POLL_TICK: Duration = Duration::from_millis(20);

struct StoredMessage {
    message_id: String,
    body: String,
    receive_count: u32,
}

struct InFlight {
    message: StoredMessage,
    visible_at: Instant,
}

struct QueueState {
    reference: QueueRef,
    attributes: QueueAttributes,
    visible: VecDeque<StoredMessage>,
    in_flight: HashMap<String, InFlight>,
    allowed_senders: Vec<String>,
    arrivals: Arc<Notify>,
}

/// In-process queues keyed by name.
pub struct InMemoryQueueService {
    region: String,
    queues: Mutex<HashMap<String, QueueState>>,
    create_calls: AtomicUsize,
    failing_receives: AtomicUsize,
    fail_deletes: AtomicBool,
}

impl InMemoryQueueService {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            queues: Mutex::new(HashMap::new()),
            create_calls: AtomicUsize::new(0),
            failing_receives: AtomicUsize::new(0),
            fail_deletes: AtomicBool::new(false),
        }
    }

    fn queue_ref(&self, name: &str) -> QueueRef {
        QueueRef {
            name: name.to_string(),
            url: format!("http://sqs.{}.localhost/{}/{}", self.region, LOCAL_ACCOUNT_ID, name),
            arn: format!("arn:aws:sqs:{}:{}:{}", self.region, LOCAL_ACCOUNT_ID, name),
        }
    }

    /// Number of `create_queue` calls so far.
    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    /// Make the next `count` receive calls fail.
    pub fn fail_next_receives(&self, count: usize) {
        self.failing_receives.store(count, Ordering::SeqCst);
    }

    pub fn set_fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Enqueue a raw body directly, bypassing any topic.
    pub async fn send(&self, queue_name: &str, body: impl Into<String>) -> Result<String> {
        let mut queues = self.queues.lock().await;
        let state = queues
            .get_mut(queue_name)
            .ok_or_else(|| ServiceError::NotFound(format!("queue '{queue_name}'")))?;
        let message_id = Uuid::new_v4().to_string();
        state.visible.push_back(StoredMessage {
            message_id: message_id.clone(),
            body: body.into(),
            receive_count: 0,
        });
        state.arrivals.notify_one();
        Ok(message_id)
    }

    /// Deliver on behalf of a topic; dropped unless the topic may send.
    async fn deliver_from(&self, queue: &QueueRef, sender: &str, body: String) -> Result<()> {
        {
            let queues = self.queues.lock().await;
            let state = queues
                .get(&queue.name)
                .ok_or_else(|| ServiceError::NotFound(format!("queue '{}'", queue.name)))?;
            if !state.allowed_senders.iter().any(|s| s == sender) {
                warn!(queue = %queue.name, sender = %sender, "Delivery denied by queue policy");
                return Ok(());
            }
        }
        self.send(&queue.name, body).await.map(|_| ())
    }

    /// Messages waiting to be received.
    pub async fn visible_count(&self, queue_name: &str) -> usize {
        let mut queues = self.queues.lock().await;
        Self::expire_in_flight(&mut queues, queue_name);
        queues.get(queue_name).map_or(0, |q| q.visible.len())
    }

    /// Messages received but neither deleted nor expired.
    pub async fn in_flight_count(&self, queue_name: &str) -> usize {
        let mut queues = self.queues.lock().await;
        Self::expire_in_flight(&mut queues, queue_name);
        queues.get(queue_name).map_or(0, |q| q.in_flight.len())
    }

    pub async fn attributes(&self, queue_name: &str) -> Option<QueueAttributes> {
        let queues = self.queues.lock().await;
        queues.get(queue_name).map(|q| q.attributes.clone())
    }

    pub async fn allowed_senders(&self, queue_name: &str) -> Vec<String> {
        let queues = self.queues.lock().await;
        queues
            .get(queue_name)
            .map(|q| q.allowed_senders.clone())
            .unwrap_or_default()
    }

    /// Return expired in-flight messages to the queue, or to the dead-letter
    /// target once they reached the redrive threshold.
    fn expire_in_flight(queues: &mut HashMap<String, QueueState>, queue_name: &str) {
        let now = Instant::now();
        let Some(state) = queues.get_mut(queue_name) else {
            return;
        };
        let expired: Vec<String> = state
            .in_flight
            .iter()
            .filter(|(_, entry)| entry.visible_at <= now)
            .map(|(receipt, _)| receipt.clone())
            .collect();
        if expired.is_empty() {
            return;
        }

        let redrive = state.attributes.redrive_policy.clone();
        let mut dead_letters = Vec::new();
        for receipt in expired {
            let Some(entry) = state.in_flight.remove(&receipt) else {
                continue;
            };
            match &redrive {
                Some(policy) if entry.message.receive_count >= policy.max_receive_count => {
                    dead_letters.push((policy.dead_letter_target_arn.clone(), entry.message));
                }
                _ => state.visible.push_back(entry.message),
            }
        }
        state.arrivals.notify_one();

        for (target_arn, message) in dead_letters {
            match queues.values_mut().find(|q| q.reference.arn == target_arn) {
                Some(dlq) => {
                    debug!(
                        queue = %queue_name,
                        message_id = %message.message_id,
                        "Message moved to error queue"
                    );
                    dlq.visible.push_back(StoredMessage {
                        receive_count: 0,
                        ..message
                    });
                }
                None => warn!(target = %target_arn, "Redrive target missing, message dropped"),
            }
        }
    }

    async fn try_receive(
        &self,
        queue: &QueueRef,
        max_batch: usize,
    ) -> Result<(Vec<ReceivedMessage>, Arc<Notify>)> {
        let mut queues = self.queues.lock().await;
        Self::expire_in_flight(&mut queues, &queue.name);
        let state = queues
            .get_mut(&queue.name)
            .ok_or_else(|| ServiceError::NotFound(format!("queue '{}'", queue.name)))?;

        let visibility =
            Duration::from_secs(u64::from(state.attributes.visibility_timeout_seconds));
        let mut received = Vec::new();
        while received.len() < max_batch {
            let Some(mut message) = state.visible.pop_front() else {
                break;
            };
            message.receive_count += 1;
            let receipt_handle = Uuid::new_v4().to_string();
            received.push(ReceivedMessage {
                message_id: message.message_id.clone(),
                receipt_handle: receipt_handle.clone(),
                body: message.body.clone(),
            });
            state.in_flight.insert(
                receipt_handle,
                InFlight {
                    message,
                    visible_at: Instant::now() + visibility,
                },
            );
        }
        Ok((received, Arc::clone(&state.arrivals)))
    }
}

#[async_trait]
impl QueueService for InMemoryQueueService {
    fn region(&self) -> &str {
        &self.region
    }

    async fn get_queue(&self, name: &str) -> Result<Option<QueueRef>> {
        let queues = self.queues.lock().await;
        Ok(queues.get(name).map(|q| q.reference.clone()))
    }

    async fn create_queue(&self, name: &str, attributes: &QueueAttributes) -> Result<QueueRef> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let mut queues = self.queues.lock().await;
        if let Some(existing) = queues.get(name) {
            // SQS only accepts a repeated create when the attributes match.
            if existing.attributes != *attributes {
                return Err(ServiceError::Rejected(format!(
                    "queue '{name}' already exists with different attributes"
                )));
            }
            return Ok(existing.reference.clone());
        }
        let reference = self.queue_ref(name);
        queues.insert(
            name.to_string(),
            QueueState {
                reference: reference.clone(),
                attributes: attributes.clone(),
                visible: VecDeque::new(),
                in_flight: HashMap::new(),
                allowed_senders: Vec::new(),
                arrivals: Arc::new(Notify::new()),
            },
        );
        debug!(queue = %name, "Created in-memory queue");
        Ok(reference)
    }

    async fn receive(
        &self,
        queue: &QueueRef,
        max_batch: usize,
        wait: Duration,
    ) -> Result<Vec<ReceivedMessage>> {
        let failing = self
            .failing_receives
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(ServiceError::Unavailable("injected receive failure".to_string()));
        }

        let deadline = Instant::now() + wait;
        loop {
            let (received, arrivals) = self.try_receive(queue, max_batch).await?;
            let now = Instant::now();
            if !received.is_empty() || now >= deadline {
                return Ok(received);
            }
            let nap = (deadline - now).min(POLL_TICK);
            let _ = tokio::time::timeout(nap, arrivals.notified()).await;
        }
    }

    async fn delete(&self, queue: &QueueRef, receipt_handle: &str) -> Result<()> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(ServiceError::Unavailable("injected delete failure".to_string()));
        }
        let mut queues = self.queues.lock().await;
        let state = queues
            .get_mut(&queue.name)
            .ok_or_else(|| ServiceError::NotFound(format!("queue '{}'", queue.name)))?;
        // Deleting with a stale receipt is a no-op, as in SQS.
        state.in_flight.remove(receipt_handle);
        Ok(())
    }

    async fn attach_send_policy(&self, queue: &QueueRef, principal: &str) -> Result<()> {
        let mut queues = self.queues.lock().await;
        let state = queues
            .get_mut(&queue.name)
            .ok_or_else(|| ServiceError::NotFound(format!("queue '{}'", queue.name)))?;
        if !state.allowed_senders.iter().any(|s| s == principal) {
            state.allowed_senders.push(principal.to_string());
        }
        Ok(())
    }
}

struct TopicState {
    arn: String,
    subscribers: Vec<QueueRef>,
}

/// Published message, as recorded by `InMemoryTopicService`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub topic_arn: String,
    pub subject: String,
    pub payload: String,
}

/// In-process topics fanning out into `InMemoryQueueService` queues.
pub struct InMemoryTopicService {
    region: String,
    queues: Arc<InMemoryQueueService>,
    topics: Mutex<HashMap<String, TopicState>>,
    published: Mutex<Vec<PublishedMessage>>,
    create_calls: AtomicUsize,
    fail_publish: AtomicBool,
}

impl InMemoryTopicService {
    pub fn new(queues: Arc<InMemoryQueueService>) -> Self {
        Self {
            region: queues.region.clone(),
            queues,
            topics: Mutex::new(HashMap::new()),
            published: Mutex::new(Vec::new()),
            create_calls: AtomicUsize::new(0),
            fail_publish: AtomicBool::new(false),
        }
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn set_fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    pub async fn published(&self) -> Vec<PublishedMessage> {
        self.published.lock().await.clone()
    }

    pub async fn subscriber_count(&self, name: &str) -> usize {
        let topics = self.topics.lock().await;
        topics.get(name).map_or(0, |t| t.subscribers.len())
    }
}

#[async_trait]
impl TopicService for InMemoryTopicService {
    async fn find_topic(&self, name: &str) -> Result<Option<String>> {
        let topics = self.topics.lock().await;
        Ok(topics.get(name).map(|t| t.arn.clone()))
    }

    async fn create_topic(&self, name: &str) -> Result<String> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let mut topics = self.topics.lock().await;
        let topic = topics.entry(name.to_string()).or_insert_with(|| TopicState {
            arn: format!("arn:aws:sns:{}:{}:{}", self.region, LOCAL_ACCOUNT_ID, name),
            subscribers: Vec::new(),
        });
        Ok(topic.arn.clone())
    }

    async fn subscribe_queue(&self, endpoint: &str, queue: &QueueRef) -> Result<()> {
        let mut topics = self.topics.lock().await;
        let topic = topics
            .values_mut()
            .find(|t| t.arn == endpoint)
            .ok_or_else(|| ServiceError::NotFound(format!("topic '{endpoint}'")))?;
        if !topic.subscribers.iter().any(|q| q.arn == queue.arn) {
            topic.subscribers.push(queue.clone());
        }
        Ok(())
    }

    async fn publish(&self, endpoint: &str, subject: &str, payload: &str) -> Result<()> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(ServiceError::Unavailable("injected publish failure".to_string()));
        }
        let subscribers = {
            let topics = self.topics.lock().await;
            topics
                .values()
                .find(|t| t.arn == endpoint)
                .map(|t| t.subscribers.clone())
                .ok_or_else(|| ServiceError::NotFound(format!("topic '{endpoint}'")))?
        };

        self.published.lock().await.push(PublishedMessage {
            topic_arn: endpoint.to_string(),
            subject: subject.to_string(),
            payload: payload.to_string(),
        });

        let notification =
            SnsNotification::new(Uuid::new_v4().to_string(), endpoint, subject, payload);
        let body = serde_json::to_string(&notification)
            .map_err(|e| ServiceError::Rejected(format!("unencodable notification: {e}")))?;
        for queue in &subscribers {
            self.queues.deliver_from(queue, endpoint, body.clone()).await?;
        }
        Ok(())
    }
}
