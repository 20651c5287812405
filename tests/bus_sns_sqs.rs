//! AWS SNS/SQS integration tests using testcontainers.
//!
//! Run with: cargo test --test bus_sns_sqs --features localstack -- --nocapture
//!
//! Uses LocalStack to emulate AWS SNS/SQS locally.
//! Tests share a single LocalStack container to avoid rootless port conflicts.

#![cfg(feature = "localstack")]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use herald::aws::{self, SnsTopicService, SqsQueueService};
use herald::config::{AwsConfig, ListenerSettings};
use herald::interfaces::{QueueAttributes, QueueService, TopicService};
use herald::monitor::TracingMonitor;
use herald::naming::NamingConvention;
use herald::provisioning::QueueProvisioner;
use herald::publisher::TopicPublisher;
use herald::{
    HandlerError, Message, MessageHandler, MessagingBus, SerializationRegistry,
    SubscriptionConfig, SubscriptionHooks, SubscriptionSettings,
};
use serde::{Deserialize, Serialize};
use testcontainers::{
    core::{IntoContainerPort, WaitFor},
    runners::AsyncRunner,
    ContainerAsync, GenericImage, ImageExt,
};
use tokio::sync::OnceCell;

const REGION: &str = "us-east-1";

/// Shared LocalStack container and endpoint URL.
static LOCALSTACK: OnceCell<(ContainerAsync<GenericImage>, String)> = OnceCell::const_new();

/// Get the shared LocalStack endpoint, starting the container if needed.
async fn get_localstack_endpoint() -> String {
    let (_, endpoint) = LOCALSTACK
        .get_or_init(|| async {
            println!("Starting shared LocalStack container...");
            start_localstack_internal().await
        })
        .await;
    endpoint.clone()
}

async fn start_localstack_internal() -> (ContainerAsync<GenericImage>, String) {
    let image = GenericImage::new("localstack/localstack", "latest")
        .with_exposed_port(4566.tcp())
        .with_wait_for(WaitFor::message_on_stdout("Ready."));

    let container = image
        .with_env_var("SERVICES", "sns,sqs")
        .with_env_var("AWS_DEFAULT_REGION", REGION)
        .with_env_var("EAGER_SERVICE_LOADING", "1")
        .with_env_var("DISABLE_EVENTS", "1")
        .with_env_var("SKIP_INFRA_DOWNLOADS", "1")
        .with_env_var("DNS_DISABLED", "true")
        .with_env_var("LOCALSTACK_HOST", "localhost")
        .with_startup_timeout(Duration::from_secs(180))
        .start()
        .await
        .expect("Failed to start localstack container");

    // SNS/SQS need a moment after the ready message.
    tokio::time::sleep(Duration::from_secs(5)).await;

    let host_port = container
        .get_host_port_ipv4(4566)
        .await
        .expect("Failed to get mapped port");
    let host = container
        .get_host()
        .await
        .expect("Failed to get container host");

    let endpoint_url = format!("http://{}:{}", host, host_port);
    println!("LocalStack (SNS/SQS) available at: {}", endpoint_url);
    (container, endpoint_url)
}

async fn connect() -> (Arc<SqsQueueService>, Arc<SnsTopicService>) {
    // LocalStack accepts any credentials.
    std::env::set_var("AWS_ACCESS_KEY_ID", "test");
    std::env::set_var("AWS_SECRET_ACCESS_KEY", "test");

    let config = AwsConfig {
        region: Some(REGION.to_string()),
        endpoint_url: Some(get_localstack_endpoint().await),
    };
    aws::connect(&config).await.expect("Failed to connect")
}

/// Names unique per test run so tests sharing the container don't collide.
fn naming() -> NamingConvention {
    let run = uuid::Uuid::new_v4().simple().to_string();
    NamingConvention::new(Some("herald"), Some(&run[..8]))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OrderPlaced {
    order_id: u64,
}

impl Message for OrderPlaced {
    const MESSAGE_TYPE: &'static str = "OrderPlaced";
}

#[derive(Default)]
struct CountingHandler {
    count: AtomicUsize,
}

#[async_trait]
impl MessageHandler<OrderPlaced> for CountingHandler {
    async fn handle(&self, _message: &OrderPlaced) -> Result<(), HandlerError> {
        self.count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn test_provisioning_is_idempotent() {
    let (queues, topics) = connect().await;
    let provisioner = QueueProvisioner::new(queues.clone(), topics.clone());
    let config = SubscriptionConfig::new(
        SubscriptionSettings::for_topic("orders"),
        &naming(),
        SubscriptionHooks::default(),
    )
    .unwrap();

    let first = provisioner
        .verify_or_create_queue(REGION, &config)
        .await
        .expect("first provisioning failed");
    let second = provisioner
        .verify_or_create_queue(REGION, &config)
        .await
        .expect("second provisioning failed");

    assert_eq!(first.queue(), second.queue());
    assert!(queues.queue_exists(config.queue_name()).await.unwrap());
    assert!(queues
        .queue_exists(config.error_queue_name().unwrap())
        .await
        .unwrap());
    assert!(topics.topic_exists(config.publish_endpoint()).await.unwrap());
}

#[tokio::test]
async fn test_missing_queue_is_none() {
    let (queues, _) = connect().await;
    let name = format!("missing-{}", uuid::Uuid::new_v4().simple());

    assert!(queues.get_queue(&name).await.unwrap().is_none());
}

#[tokio::test]
async fn test_send_policy_attach_is_idempotent() {
    let (queues, topics) = connect().await;
    let name = format!("policy-{}", uuid::Uuid::new_v4().simple());
    let queue = queues
        .create_queue(
            &name,
            &QueueAttributes {
                retention_seconds: 3_600,
                visibility_timeout_seconds: 30,
                redrive_policy: None,
            },
        )
        .await
        .unwrap();
    let topic_arn = topics.create_topic(&name).await.unwrap();

    queues.attach_send_policy(&queue, &topic_arn).await.unwrap();
    queues.attach_send_policy(&queue, &topic_arn).await.unwrap();
}

#[tokio::test]
async fn test_published_messages_are_handled_and_acknowledged() {
    let (queues, topics) = connect().await;
    let provisioner = QueueProvisioner::new(queues.clone(), topics.clone());
    let config = SubscriptionConfig::new(
        SubscriptionSettings {
            max_in_flight: Some(2),
            ..SubscriptionSettings::for_topic("orders")
        },
        &naming(),
        SubscriptionHooks::default(),
    )
    .unwrap();

    let bus = MessagingBus::new(
        Arc::new(SerializationRegistry::new()),
        Arc::new(TracingMonitor),
    );
    let settings = ListenerSettings {
        wait_time_secs: 1,
        ..ListenerSettings::default()
    };
    let listener = bus
        .subscribe(&provisioner, REGION, &config, settings)
        .await
        .expect("subscribe failed");

    let handler = Arc::new(CountingHandler::default());
    bus.add_message_handler::<OrderPlaced>("orders", handler.clone())
        .await
        .unwrap();
    let publisher = TopicPublisher::provision(&provisioner, topics.clone(), config.publish_endpoint())
        .await
        .unwrap();
    bus.add_message_publisher::<OrderPlaced>("orders", Arc::new(publisher))
        .await
        .unwrap();

    bus.start().await.unwrap();
    for order_id in 0..5 {
        bus.publish(&OrderPlaced { order_id }).await.unwrap();
    }

    let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
    while handler.count.load(Ordering::SeqCst) < 5 {
        assert!(tokio::time::Instant::now() < deadline, "messages not handled in time");
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    bus.stop().await;

    // Acknowledged messages are gone from the queue.
    let leftover = listener
        .queue()
        .receive(10, Duration::from_secs(1))
        .await
        .unwrap();
    assert!(leftover.is_empty());
}
