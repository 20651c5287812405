//! Messaging bus.
//!
//! Owns the listeners (one per topic) and the publishers (one per message
//! type) of an application and drives their common lifecycle:
//! `Idle → Running → Stopped`. A stopped bus cannot be started again.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::{ConfigError, ListenerSettings, SubscriptionConfig};
use crate::handlers::MessageHandler;
use crate::interfaces::ServiceError;
use crate::listener::{ListenerError, NotificationListener};
use crate::monitor::MessageMonitor;
use crate::provisioning::{ProvisioningError, QueueProvisioner};
use crate::publisher::MessagePublisher;
use crate::serialization::{Message, SerializationError, SerializationRegistry};

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors that can occur during bus operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Provisioning(#[from] ProvisioningError),

    #[error("No publisher registered for message type '{0}'")]
    PublisherNotRegistered(String),

    #[error(transparent)]
    Serialization(#[from] SerializationError),

    #[error("Failed to publish '{message_type}' to '{endpoint}': {source}")]
    Publish {
        message_type: String,
        endpoint: String,
        #[source]
        source: ServiceError,
    },

    #[error("No subscriber registered for topic '{0}'")]
    UnknownTopic(String),

    #[error("Listener for queue '{queue}' is already registered for topic '{registered_topic}'")]
    ListenerAlreadyRegistered {
        queue: String,
        registered_topic: String,
    },

    #[error("Listener for topic '{topic}' failed to start ({failed} of {total} failed): {source}")]
    ListenerStart {
        topic: String,
        failed: usize,
        total: usize,
        #[source]
        source: ListenerError,
    },

    #[error("Bus has already started")]
    AlreadyStarted,

    #[error("Bus has stopped and cannot be restarted")]
    NotRestartable,
}

impl From<ListenerError> for BusError {
    fn from(error: ListenerError) -> Self {
        match error {
            ListenerError::AlreadyStarted(_) => Self::AlreadyStarted,
            ListenerError::NotRestartable(_) => Self::NotRestartable,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BusState {
    Idle,
    Running,
    Stopped,
}

/// Publisher plus the topic it was registered for.
struct PublisherEntry {
    topic: String,
    publisher: Arc<dyn MessagePublisher>,
}

/// Coordinates the listeners and publishers of one application.
pub struct MessagingBus {
    registry: Arc<SerializationRegistry>,
    monitor: Arc<dyn MessageMonitor>,
    state: Mutex<BusState>,
    listeners: RwLock<HashMap<String, Arc<NotificationListener>>>,
    publishers: RwLock<HashMap<&'static str, PublisherEntry>>,
}

impl MessagingBus {
    pub fn new(registry: Arc<SerializationRegistry>, monitor: Arc<dyn MessageMonitor>) -> Self {
        Self {
            registry,
            monitor,
            state: Mutex::new(BusState::Idle),
            listeners: RwLock::new(HashMap::new()),
            publishers: RwLock::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<SerializationRegistry> {
        &self.registry
    }

    pub fn monitor(&self) -> &Arc<dyn MessageMonitor> {
        &self.monitor
    }

    async fn ensure_idle(&self) -> Result<()> {
        match *self.state.lock().await {
            BusState::Idle => Ok(()),
            BusState::Running => Err(BusError::AlreadyStarted),
            BusState::Stopped => Err(BusError::NotRestartable),
        }
    }

    /// Register the listener for `topic`.
    ///
    /// If the topic already has a listener, that listener (and its queue) is
    /// kept and its handlers are replaced by those of `listener`. Returns the
    /// listener that serves the topic afterwards.
    pub async fn add_notification_topic_subscriber(
        &self,
        topic: &str,
        listener: Arc<NotificationListener>,
    ) -> Result<Arc<NotificationListener>> {
        self.ensure_idle().await?;
        let mut listeners = self.listeners.write().await;
        let elsewhere = listeners
            .iter()
            .find(|(registered, existing)| {
                registered.as_str() != topic && Arc::ptr_eq(existing, &listener)
            })
            .map(|(registered, _)| registered.clone());
        if let Some(registered_topic) = elsewhere {
            return Err(BusError::ListenerAlreadyRegistered {
                queue: listener.queue().name().to_string(),
                registered_topic,
            });
        }
        if let Some(existing) = listeners.get(topic) {
            if !Arc::ptr_eq(existing, &listener) {
                existing.replace_handlers(listener.take_handlers().await).await?;
                debug!(
                    topic = %topic,
                    queue = %existing.queue().name(),
                    "Replaced handlers of existing subscriber"
                );
            }
            return Ok(Arc::clone(existing));
        }
        info!(topic = %topic, queue = %listener.queue().name(), "Subscriber registered");
        listeners.insert(topic.to_string(), Arc::clone(&listener));
        Ok(listener)
    }

    /// Route messages of type `T` to `publisher`. Last registration wins.
    pub async fn add_message_publisher<T: Message>(
        &self,
        topic: &str,
        publisher: Arc<dyn MessagePublisher>,
    ) -> Result<()> {
        self.ensure_idle().await?;
        self.ensure_serializer::<T>();
        let replaced = self.publishers.write().await.insert(
            T::MESSAGE_TYPE,
            PublisherEntry {
                topic: topic.to_string(),
                publisher,
            },
        );
        if let Some(previous) = replaced {
            warn!(
                message_type = T::MESSAGE_TYPE,
                previous_topic = %previous.topic,
                topic = %topic,
                "Publisher replaced"
            );
        }
        Ok(())
    }

    /// Register a handler for messages of type `T` arriving on `topic`.
    pub async fn add_message_handler<T: Message>(
        &self,
        topic: &str,
        handler: Arc<dyn MessageHandler<T>>,
    ) -> Result<()> {
        self.ensure_idle().await?;
        let listener = self
            .listener(topic)
            .await
            .ok_or_else(|| BusError::UnknownTopic(topic.to_string()))?;
        self.ensure_serializer::<T>();
        listener.add_handler(handler).await?;
        Ok(())
    }

    /// Register JSON for `T` unless a serializer is already known.
    fn ensure_serializer<T: Message>(&self) {
        if !self.registry.contains(T::MESSAGE_TYPE) {
            self.registry.add_json::<T>();
        }
    }

    /// Provision the queue of `config` and register a listener for it.
    pub async fn subscribe(
        &self,
        provisioner: &QueueProvisioner,
        region: &str,
        config: &SubscriptionConfig,
        settings: ListenerSettings,
    ) -> Result<Arc<NotificationListener>> {
        self.ensure_idle().await?;
        settings.validate()?;
        let queue = provisioner.verify_or_create_queue(region, config).await?;
        let listener = NotificationListener::for_subscription(
            queue,
            config,
            Arc::clone(&self.registry),
            Arc::clone(&self.monitor),
            settings,
        )?;
        self.add_notification_topic_subscriber(config.topic(), Arc::new(listener))
            .await
    }

    pub async fn listener(&self, topic: &str) -> Option<Arc<NotificationListener>> {
        self.listeners.read().await.get(topic).cloned()
    }

    /// Topics with a registered listener, sorted.
    pub async fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.listeners.read().await.keys().cloned().collect();
        topics.sort();
        topics
    }

    /// Start every listener.
    ///
    /// Each listener is started independently. The bus is running once any
    /// listener runs; the first failure is returned after all were attempted.
    pub async fn start(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        match *state {
            BusState::Idle => {}
            BusState::Running => return Err(BusError::AlreadyStarted),
            BusState::Stopped => return Err(BusError::NotRestartable),
        }

        let mut listeners: Vec<(String, Arc<NotificationListener>)> = self
            .listeners
            .read()
            .await
            .iter()
            .map(|(topic, listener)| (topic.clone(), Arc::clone(listener)))
            .collect();
        listeners.sort_by(|a, b| a.0.cmp(&b.0));

        let mut failures = Vec::new();
        for (topic, listener) in &listeners {
            if let Err(e) = listener.start().await {
                warn!(topic = %topic, error = %e, "Listener failed to start");
                failures.push((topic.clone(), e));
            }
        }

        let running = listeners
            .iter()
            .filter(|(_, listener)| listener.is_listening())
            .count();
        if running > 0 || failures.is_empty() {
            *state = BusState::Running;
        }
        info!(
            listeners = listeners.len(),
            running,
            failed = failures.len(),
            "Messaging bus started"
        );

        let failed = failures.len();
        match failures.into_iter().next() {
            Some((topic, source)) => Err(BusError::ListenerStart {
                topic,
                failed,
                total: listeners.len(),
                source,
            }),
            None => Ok(()),
        }
    }

    /// Stop every listener concurrently and wait until all have stopped.
    ///
    /// Stopping a stopped bus is a no-op.
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        if *state == BusState::Stopped {
            return;
        }
        *state = BusState::Stopped;

        let listeners: Vec<_> = self.listeners.read().await.values().cloned().collect();
        futures::future::join_all(listeners.iter().map(|listener| listener.stop())).await;
        info!(listeners = listeners.len(), "Messaging bus stopped");
    }

    pub async fn is_listening(&self) -> bool {
        *self.state.lock().await == BusState::Running
    }

    /// Serialize `message` and send it through the publisher of its type.
    pub async fn publish<T: Message>(&self, message: &T) -> Result<()> {
        let message_type = T::MESSAGE_TYPE;
        let publisher = self
            .publishers
            .read()
            .await
            .get(message_type)
            .map(|entry| Arc::clone(&entry.publisher))
            .ok_or_else(|| BusError::PublisherNotRegistered(message_type.to_string()))?;

        let payload = self.registry.serialize(message)?;
        let started = Instant::now();
        match publisher.publish(message_type, &payload).await {
            Ok(()) => {
                self.monitor.publish_time(message_type, started.elapsed());
                Ok(())
            }
            Err(source) => {
                self.monitor.publish_failed(message_type, &source.to_string());
                Err(BusError::Publish {
                    message_type: message_type.to_string(),
                    endpoint: publisher.endpoint().to_string(),
                    source,
                })
            }
        }
    }
}

impl fmt::Debug for MessagingBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessagingBus").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests;
