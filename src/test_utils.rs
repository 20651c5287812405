//! Test utilities and mock implementations.
//!
//! Sample message types, recording handlers and a recording monitor for
//! exercising the listener and bus without AWS.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, Semaphore};
use uuid::Uuid;

use crate::config::ListenerSettings;
use crate::handlers::{HandlerError, MessageHandler};
use crate::interfaces::{QueueAttributes, QueueHandle, QueueService};
use crate::listener::DispatchError;
use crate::memory::InMemoryQueueService;
use crate::monitor::{ErrorContext, MessageMonitor};
use crate::serialization::{Message, SerializationRegistry, SnsNotification};

pub const TEST_REGION: &str = "us-east-1";
pub const TEST_TOPIC_ARN: &str = "arn:aws:sns:us-east-1:000000000000:orders";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPlaced {
    pub order_id: u64,
}

impl Message for OrderPlaced {
    const MESSAGE_TYPE: &'static str = "OrderPlaced";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCancelled {
    pub order_id: u64,
    pub reason: String,
}

impl Message for OrderCancelled {
    const MESSAGE_TYPE: &'static str = "OrderCancelled";
}

/// Registry knowing both sample message types.
pub fn order_registry() -> Arc<SerializationRegistry> {
    let registry = SerializationRegistry::new();
    registry.add_json::<OrderPlaced>();
    registry.add_json::<OrderCancelled>();
    Arc::new(registry)
}

/// Queue body for `message`, wrapped the way SNS delivers it.
pub fn notification<T: Message>(message: &T) -> String {
    let payload = serde_json::to_string(message).unwrap();
    raw_notification(T::MESSAGE_TYPE, &payload)
}

pub fn raw_notification(subject: &str, payload: &str) -> String {
    let notification =
        SnsNotification::new(Uuid::new_v4().to_string(), TEST_TOPIC_ARN, subject, payload);
    serde_json::to_string(&notification).unwrap()
}

/// Listener settings with short timings.
pub fn fast_settings() -> ListenerSettings {
    ListenerSettings {
        batch_size: 10,
        wait_time_secs: 1,
        drain_timeout_secs: 5,
        receive_backoff_min_ms: 10,
        receive_backoff_max_ms: 50,
    }
}

/// In-memory queue named `name`, with the given visibility timeout.
pub async fn memory_queue(
    name: &str,
    visibility_timeout_seconds: u32,
) -> (Arc<InMemoryQueueService>, QueueHandle) {
    let service = Arc::new(InMemoryQueueService::new(TEST_REGION));
    let queue = service
        .create_queue(
            name,
            &QueueAttributes {
                retention_seconds: 345_600,
                visibility_timeout_seconds,
                redrive_policy: None,
            },
        )
        .await
        .unwrap();
    let handle = QueueHandle::new(TEST_REGION, queue, service.clone());
    (service, handle)
}

/// Handler that records every message it sees.
///
/// Can be made to fail, to take time, or to block until released.
pub struct RecordingHandler<T> {
    received: RwLock<Vec<T>>,
    calls: AtomicUsize,
    running: AtomicUsize,
    peak: AtomicUsize,
    fail: AtomicBool,
    delay: Duration,
    gate: Option<Semaphore>,
    _marker: PhantomData<fn(T)>,
}

impl<T: Message + Clone> RecordingHandler<T> {
    fn build(delay: Duration, gate: Option<Semaphore>) -> Arc<Self> {
        Arc::new(Self {
            received: RwLock::new(Vec::new()),
            calls: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
            delay,
            gate,
            _marker: PhantomData,
        })
    }

    pub fn new() -> Arc<Self> {
        Self::build(Duration::ZERO, None)
    }

    /// Each call takes `delay` before completing.
    pub fn slow(delay: Duration) -> Arc<Self> {
        Self::build(delay, None)
    }

    /// Each call blocks until a matching `release`.
    pub fn gated() -> Arc<Self> {
        Self::build(Duration::ZERO, Some(Semaphore::new(0)))
    }

    pub fn failing() -> Arc<Self> {
        let handler = Self::new();
        handler.set_fail(true);
        handler
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Let `count` gated calls complete.
    pub fn release(&self, count: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(count);
        }
    }

    /// Messages handled successfully.
    pub async fn received(&self) -> Vec<T> {
        self.received.read().await.clone()
    }

    /// Calls started, successful or not.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Calls currently executing.
    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    /// Highest number of concurrent calls observed.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<T: Message + Clone> MessageHandler<T> for RecordingHandler<T> {
    async fn handle(&self, message: &T) -> Result<(), HandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let result = if self.fail.load(Ordering::SeqCst) {
            Err(format!("handler rejected {}", T::MESSAGE_TYPE).into())
        } else {
            self.received.write().await.push(message.clone());
            Ok(())
        };
        self.running.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Monitor that counts everything reported to it.
#[derive(Default)]
pub struct RecordingMonitor {
    errors: StdMutex<HashMap<&'static str, usize>>,
    received: AtomicUsize,
    processed: AtomicUsize,
    throttled: AtomicUsize,
    published: AtomicUsize,
    publish_failures: AtomicUsize,
}

impl RecordingMonitor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Errors reported with this `DispatchError::kind`.
    pub fn errors(&self, kind: &str) -> usize {
        self.errors.lock().unwrap().get(kind).copied().unwrap_or(0)
    }

    pub fn total_errors(&self) -> usize {
        self.errors.lock().unwrap().values().sum()
    }

    pub fn received(&self) -> usize {
        self.received.load(Ordering::SeqCst)
    }

    pub fn processed(&self) -> usize {
        self.processed.load(Ordering::SeqCst)
    }

    pub fn throttled(&self) -> usize {
        self.throttled.load(Ordering::SeqCst)
    }

    pub fn published(&self) -> usize {
        self.published.load(Ordering::SeqCst)
    }

    pub fn publish_failures(&self) -> usize {
        self.publish_failures.load(Ordering::SeqCst)
    }
}

impl MessageMonitor for RecordingMonitor {
    fn message_received(&self, _queue: &str) {
        self.received.fetch_add(1, Ordering::SeqCst);
    }

    fn message_processed(&self, _queue: &str, _message_type: &str) {
        self.processed.fetch_add(1, Ordering::SeqCst);
    }

    fn report_error(&self, error: &DispatchError, _context: &ErrorContext<'_>) {
        *self.errors.lock().unwrap().entry(error.kind()).or_default() += 1;
    }

    fn throttled(&self, _queue: &str, _waited: Duration) {
        self.throttled.fetch_add(1, Ordering::SeqCst);
    }

    fn publish_time(&self, _message_type: &str, _elapsed: Duration) {
        self.published.fetch_add(1, Ordering::SeqCst);
    }

    fn publish_failed(&self, _message_type: &str, _error: &str) {
        self.publish_failures.fetch_add(1, Ordering::SeqCst);
    }
}

/// Poll `condition` until it holds, panicking after `timeout`.
pub async fn eventually(timeout: Duration, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + timeout;
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within {timeout:?}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
