use std::time::Duration;

use super::*;
use crate::config::{SubscriptionHooks, SubscriptionSettings};
use crate::listener::{ListenerError, ListenerState};
use crate::memory::{InMemoryQueueService, InMemoryTopicService};
use crate::naming::NamingConvention;
use crate::publisher::TopicPublisher;
use crate::test_utils::{
    eventually, fast_settings, memory_queue, OrderCancelled, OrderPlaced, RecordingHandler,
    RecordingMonitor, TEST_REGION,
};

const WAIT: Duration = Duration::from_secs(5);

struct Fixture {
    queues: Arc<InMemoryQueueService>,
    topics: Arc<InMemoryTopicService>,
    provisioner: QueueProvisioner,
    monitor: Arc<RecordingMonitor>,
    bus: MessagingBus,
}

fn fixture() -> Fixture {
    let queues = Arc::new(InMemoryQueueService::new(TEST_REGION));
    let topics = Arc::new(InMemoryTopicService::new(Arc::clone(&queues)));
    let provisioner = QueueProvisioner::new(queues.clone(), topics.clone());
    let monitor = RecordingMonitor::new();
    let bus = MessagingBus::new(Arc::new(SerializationRegistry::new()), monitor.clone());
    Fixture {
        queues,
        topics,
        provisioner,
        monitor,
        bus,
    }
}

fn orders_subscription(max_in_flight: Option<usize>) -> SubscriptionConfig {
    SubscriptionConfig::new(
        SubscriptionSettings {
            max_in_flight,
            ..SubscriptionSettings::for_topic("orders")
        },
        &NamingConvention::default(),
        SubscriptionHooks::default(),
    )
    .unwrap()
}

async fn idle_listener(bus: &MessagingBus, queue: &str) -> Arc<NotificationListener> {
    let (_service, handle) = memory_queue(queue, 30).await;
    Arc::new(
        NotificationListener::new(
            handle,
            Arc::clone(bus.registry()),
            Arc::clone(bus.monitor()),
            fast_settings(),
        )
        .unwrap(),
    )
}

#[tokio::test]
async fn test_publish_then_handle_round_trip() {
    let f = fixture();
    let config = orders_subscription(Some(2));
    f.bus
        .subscribe(&f.provisioner, TEST_REGION, &config, fast_settings())
        .await
        .unwrap();

    let handler = RecordingHandler::<OrderPlaced>::new();
    f.bus
        .add_message_handler::<OrderPlaced>("orders", handler.clone())
        .await
        .unwrap();
    let publisher = TopicPublisher::provision(&f.provisioner, f.topics.clone(), "orders")
        .await
        .unwrap();
    f.bus
        .add_message_publisher::<OrderPlaced>("orders", Arc::new(publisher))
        .await
        .unwrap();

    f.bus.start().await.unwrap();
    assert!(f.bus.is_listening().await);
    for order_id in 0..5 {
        f.bus.publish(&OrderPlaced { order_id }).await.unwrap();
    }
    eventually(WAIT, || f.monitor.processed() == 5).await;
    f.bus.stop().await;

    assert_eq!(handler.received().await.len(), 5);
    assert!(handler.peak_concurrency() <= 2);
    assert_eq!(f.monitor.published(), 5);
    assert_eq!(f.queues.in_flight_count("orders").await, 0);
}

#[tokio::test]
async fn test_publish_unregistered_type_leaves_bus_usable() {
    let f = fixture();

    let result = f.bus.publish(&OrderPlaced { order_id: 1 }).await;

    assert!(matches!(
        result,
        Err(BusError::PublisherNotRegistered(ref t)) if t == "OrderPlaced"
    ));
    assert!(!f.bus.is_listening().await);
    f.bus.start().await.unwrap();
    assert!(f.bus.is_listening().await);
    f.bus.stop().await;
}

#[tokio::test]
async fn test_publish_failure_is_reported() {
    let f = fixture();
    let publisher = TopicPublisher::provision(&f.provisioner, f.topics.clone(), "orders")
        .await
        .unwrap();
    f.bus
        .add_message_publisher::<OrderPlaced>("orders", Arc::new(publisher))
        .await
        .unwrap();
    f.topics.set_fail_publish(true);

    let result = f.bus.publish(&OrderPlaced { order_id: 1 }).await;

    assert!(matches!(result, Err(BusError::Publish { .. })));
    assert_eq!(f.monitor.publish_failures(), 1);
    assert_eq!(f.monitor.published(), 0);
}

#[tokio::test]
async fn test_handler_for_unknown_topic() {
    let f = fixture();

    let result = f
        .bus
        .add_message_handler::<OrderPlaced>("orders", RecordingHandler::<OrderPlaced>::new())
        .await;

    assert!(matches!(result, Err(BusError::UnknownTopic(ref t)) if t == "orders"));
}

#[tokio::test]
async fn test_reregistering_topic_replaces_handlers_and_keeps_queue() {
    let f = fixture();
    let first = idle_listener(&f.bus, "orders-a").await;
    first
        .add_handler::<OrderPlaced>(RecordingHandler::<OrderPlaced>::new())
        .await
        .unwrap();
    f.bus
        .add_notification_topic_subscriber("orders", first.clone())
        .await
        .unwrap();

    let second = idle_listener(&f.bus, "orders-b").await;
    second
        .add_handler::<OrderCancelled>(RecordingHandler::<OrderCancelled>::new())
        .await
        .unwrap();
    let effective = f
        .bus
        .add_notification_topic_subscriber("orders", second)
        .await
        .unwrap();

    assert!(Arc::ptr_eq(&effective, &first));
    assert_eq!(effective.queue().name(), "orders-a");
    assert_eq!(effective.message_types().await, vec!["OrderCancelled"]);
    assert_eq!(f.bus.topics().await, vec!["orders".to_string()]);
}

#[tokio::test]
async fn test_lifecycle_is_not_restartable() {
    let f = fixture();
    let listener = idle_listener(&f.bus, "orders").await;
    f.bus
        .add_notification_topic_subscriber("orders", listener.clone())
        .await
        .unwrap();

    f.bus.start().await.unwrap();
    assert!(matches!(f.bus.start().await, Err(BusError::AlreadyStarted)));
    assert!(matches!(
        f.bus
            .add_message_handler::<OrderPlaced>("orders", RecordingHandler::<OrderPlaced>::new())
            .await,
        Err(BusError::AlreadyStarted)
    ));

    f.bus.stop().await;
    assert_eq!(listener.state(), ListenerState::Stopped);
    assert!(!f.bus.is_listening().await);
    assert!(matches!(f.bus.start().await, Err(BusError::NotRestartable)));

    // Stopping again is harmless.
    f.bus.stop().await;
}

#[tokio::test]
async fn test_start_is_independent_per_listener() {
    let f = fixture();
    let a = idle_listener(&f.bus, "orders-a").await;
    let b = idle_listener(&f.bus, "orders-b").await;
    f.bus
        .add_notification_topic_subscriber("a", a.clone())
        .await
        .unwrap();
    f.bus
        .add_notification_topic_subscriber("b", b.clone())
        .await
        .unwrap();
    b.start().await.unwrap();

    let result = f.bus.start().await;

    assert!(matches!(
        result,
        Err(BusError::ListenerStart {
            ref topic,
            failed: 1,
            total: 2,
            source: ListenerError::AlreadyStarted(_),
        }) if topic == "b"
    ));
    assert_eq!(a.state(), ListenerState::Running);
    assert_eq!(b.state(), ListenerState::Running);
    assert!(f.bus.is_listening().await);
    assert!(matches!(
        f.bus
            .add_message_handler::<OrderPlaced>("a", RecordingHandler::<OrderPlaced>::new())
            .await,
        Err(BusError::AlreadyStarted)
    ));

    f.bus.stop().await;
    assert_eq!(a.state(), ListenerState::Stopped);
    assert_eq!(b.state(), ListenerState::Stopped);
}

#[tokio::test]
async fn test_stopped_listener_does_not_block_the_others() {
    let f = fixture();
    let a = idle_listener(&f.bus, "orders-a").await;
    let b = idle_listener(&f.bus, "orders-b").await;
    f.bus
        .add_notification_topic_subscriber("a", a.clone())
        .await
        .unwrap();
    f.bus
        .add_notification_topic_subscriber("b", b.clone())
        .await
        .unwrap();
    a.stop().await;

    let result = f.bus.start().await;

    assert!(matches!(
        result,
        Err(BusError::ListenerStart {
            ref topic,
            source: ListenerError::NotRestartable(_),
            ..
        }) if topic == "a"
    ));
    assert_eq!(b.state(), ListenerState::Running);
    assert!(f.bus.is_listening().await);
    f.bus.stop().await;
}

#[tokio::test]
async fn test_bus_stays_idle_when_no_listener_starts() {
    let f = fixture();
    let only = idle_listener(&f.bus, "orders").await;
    f.bus
        .add_notification_topic_subscriber("orders", only.clone())
        .await
        .unwrap();
    only.stop().await;

    let result = f.bus.start().await;

    assert!(matches!(result, Err(BusError::ListenerStart { .. })));
    assert!(!f.bus.is_listening().await);
}

#[tokio::test]
async fn test_listener_cannot_serve_two_topics() {
    let f = fixture();
    let listener = idle_listener(&f.bus, "orders").await;
    f.bus
        .add_notification_topic_subscriber("orders", listener.clone())
        .await
        .unwrap();

    let result = f
        .bus
        .add_notification_topic_subscriber("refunds", listener.clone())
        .await;

    assert!(matches!(
        result,
        Err(BusError::ListenerAlreadyRegistered { ref registered_topic, .. })
            if registered_topic == "orders"
    ));
    assert_eq!(f.bus.topics().await, vec!["orders".to_string()]);

    // Registering it again under its own topic is still accepted.
    let same = f
        .bus
        .add_notification_topic_subscriber("orders", listener.clone())
        .await
        .unwrap();
    assert!(Arc::ptr_eq(&same, &listener));
}

#[tokio::test]
async fn test_stop_waits_for_every_listener() {
    let f = fixture();
    let mut handlers = Vec::new();
    for topic in ["orders", "refunds"] {
        let (service, handle) = memory_queue(topic, 30).await;
        let listener = Arc::new(
            NotificationListener::new(
                handle,
                Arc::clone(f.bus.registry()),
                Arc::clone(f.bus.monitor()),
                fast_settings(),
            )
            .unwrap(),
        );
        f.bus
            .add_notification_topic_subscriber(topic, listener)
            .await
            .unwrap();
        let handler = RecordingHandler::<OrderPlaced>::gated();
        f.bus
            .add_message_handler::<OrderPlaced>(topic, handler.clone())
            .await
            .unwrap();
        service
            .send(topic, crate::test_utils::notification(&OrderPlaced { order_id: 1 }))
            .await
            .unwrap();
        handlers.push(handler);
    }

    f.bus.start().await.unwrap();
    for handler in &handlers {
        eventually(WAIT, || handler.running() == 1).await;
    }

    let release = {
        let handlers = handlers.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            for handler in &handlers {
                handler.release(1);
            }
        }
    };
    tokio::join!(f.bus.stop(), release);

    for topic in ["orders", "refunds"] {
        let listener = f.bus.listener(topic).await.unwrap();
        assert_eq!(listener.state(), ListenerState::Stopped);
    }
    for handler in &handlers {
        assert_eq!(handler.received().await.len(), 1);
    }
}

#[tokio::test]
async fn test_subscribe_twice_provisions_once() {
    let f = fixture();
    let config = orders_subscription(None);

    let first = f
        .bus
        .subscribe(&f.provisioner, TEST_REGION, &config, fast_settings())
        .await
        .unwrap();
    let second = f
        .bus
        .subscribe(&f.provisioner, TEST_REGION, &config, fast_settings())
        .await
        .unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(f.queues.create_calls(), 2);
    assert_eq!(f.topics.create_calls(), 1);
}

#[tokio::test]
async fn test_subscribe_rejects_invalid_listener_settings() {
    let f = fixture();
    let settings = ListenerSettings {
        batch_size: 0,
        ..fast_settings()
    };

    let result = f
        .bus
        .subscribe(&f.provisioner, TEST_REGION, &orders_subscription(None), settings)
        .await;

    assert!(matches!(result, Err(BusError::Config(_))));
    assert_eq!(f.queues.create_calls(), 0);
}
