//! Queue listeners.
//!
//! A `NotificationListener` owns one queue and runs its receive loop:
//! admit → receive → spawn dispatch → (decode → route → handle → delete).
//!
//! State machine: `Idle → Running → Stopping → Stopped`. A stopped listener
//! cannot be started again.

mod dispatch;

pub use dispatch::DispatchResult;

use std::sync::Arc;
use std::time::{Duration, Instant};

use backon::{BackoffBuilder, ExponentialBuilder};
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::config::{ConfigError, ListenerSettings, SubscriptionConfig};
use crate::handlers::{HandlerError, HandlerMap, MessageHandler};
use crate::interfaces::{QueueHandle, ReceivedMessage, ServiceError};
use crate::monitor::{ErrorContext, MessageMonitor};
use crate::serialization::{Message, SerializationError, SerializationRegistry};
use crate::strategy::{ProcessingStrategy, Unbounded};
use dispatch::DispatchContext;

/// Callback invoked with every per-message failure and the raw message.
pub type ErrorCallback = Arc<dyn Fn(&DispatchError, &ReceivedMessage) + Send + Sync>;

/// Lifecycle of a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

/// Runtime failures. Reported to the monitor and never fatal to the loop.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Serialization(#[from] SerializationError),

    #[error("No handler registered for message type '{0}'")]
    NoHandler(String),

    #[error("Handler for '{message_type}' failed: {source}")]
    Handler {
        message_type: String,
        #[source]
        source: HandlerError,
    },

    #[error("Failed to acknowledge message: {0}")]
    Acknowledge(#[source] ServiceError),

    #[error("Failed to receive messages: {0}")]
    Receive(#[source] ServiceError),
}

impl DispatchError {
    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Serialization(SerializationError::NotFound(_)) => "serializer_not_found",
            Self::Serialization(SerializationError::Envelope(_)) => "envelope",
            Self::Serialization(_) => "decode",
            Self::NoHandler(_) => "no_handler",
            Self::Handler { .. } => "handler",
            Self::Acknowledge(_) => "acknowledge",
            Self::Receive(_) => "receive",
        }
    }
}

/// Errors from listener lifecycle and registration calls.
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("Listener for queue '{0}' has already started")]
    AlreadyStarted(String),

    #[error("Listener for queue '{0}' has stopped and cannot be restarted")]
    NotRestartable(String),
}

/// Receives from one queue and dispatches to the handlers registered for it.
pub struct NotificationListener {
    queue: QueueHandle,
    registry: Arc<SerializationRegistry>,
    handlers: RwLock<HandlerMap>,
    strategy: Arc<dyn ProcessingStrategy>,
    monitor: Arc<dyn MessageMonitor>,
    error_callback: Option<ErrorCallback>,
    settings: ListenerSettings,
    state: Arc<watch::Sender<ListenerState>>,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl NotificationListener {
    /// Create an idle listener with unbounded processing.
    ///
    /// Fails when `settings` do not pass `ListenerSettings::validate`.
    pub fn new(
        queue: QueueHandle,
        registry: Arc<SerializationRegistry>,
        monitor: Arc<dyn MessageMonitor>,
        settings: ListenerSettings,
    ) -> Result<Self, ConfigError> {
        settings.validate()?;
        let (state, _) = watch::channel(ListenerState::Idle);
        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            queue,
            registry,
            handlers: RwLock::new(HandlerMap::new()),
            strategy: Arc::new(Unbounded),
            monitor,
            error_callback: None,
            settings,
            state: Arc::new(state),
            shutdown,
            task: Mutex::new(None),
        })
    }

    /// Create a listener using the strategy and error callback of a subscription.
    pub fn for_subscription(
        queue: QueueHandle,
        config: &SubscriptionConfig,
        registry: Arc<SerializationRegistry>,
        monitor: Arc<dyn MessageMonitor>,
        settings: ListenerSettings,
    ) -> Result<Self, ConfigError> {
        let mut listener = Self::new(queue, registry, monitor, settings)?
            .with_processing_strategy(config.processing_strategy());
        listener.error_callback = config.error_callback().cloned();
        Ok(listener)
    }

    pub fn with_processing_strategy(mut self, strategy: Arc<dyn ProcessingStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_error_callback(mut self, callback: ErrorCallback) -> Self {
        self.error_callback = Some(callback);
        self
    }

    pub fn queue(&self) -> &QueueHandle {
        &self.queue
    }

    pub fn processing_strategy(&self) -> &Arc<dyn ProcessingStrategy> {
        &self.strategy
    }

    pub fn state(&self) -> ListenerState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ListenerState> {
        self.state.subscribe()
    }

    pub fn is_listening(&self) -> bool {
        self.state() == ListenerState::Running
    }

    /// Register a handler. Only allowed before `start`.
    pub async fn add_handler<T: Message>(
        &self,
        handler: Arc<dyn MessageHandler<T>>,
    ) -> Result<(), ListenerError> {
        let mut handlers = self.handlers.write().await;
        self.ensure_idle()?;
        handlers.add(handler);
        debug!(
            queue = %self.queue.name(),
            message_type = T::MESSAGE_TYPE,
            "Handler registered"
        );
        Ok(())
    }

    /// Replace every registered handler. Only allowed before `start`.
    pub async fn replace_handlers(&self, replacement: HandlerMap) -> Result<(), ListenerError> {
        let mut handlers = self.handlers.write().await;
        self.ensure_idle()?;
        *handlers = replacement;
        Ok(())
    }

    /// Remove and return the registered handlers.
    pub async fn take_handlers(&self) -> HandlerMap {
        std::mem::take(&mut *self.handlers.write().await)
    }

    /// Registered message types, sorted.
    pub async fn message_types(&self) -> Vec<&'static str> {
        self.handlers.read().await.message_types()
    }

    fn ensure_idle(&self) -> Result<(), ListenerError> {
        match self.state() {
            ListenerState::Idle => Ok(()),
            ListenerState::Stopped => Err(ListenerError::NotRestartable(self.queue_name())),
            _ => Err(ListenerError::AlreadyStarted(self.queue_name())),
        }
    }

    fn queue_name(&self) -> String {
        self.queue.name().to_string()
    }

    /// Start the receive loop.
    ///
    /// Handlers registered so far are frozen for the lifetime of the loop.
    pub async fn start(&self) -> Result<(), ListenerError> {
        let mut previous = ListenerState::Idle;
        let transitioned = self.state.send_if_modified(|state| {
            previous = *state;
            if *state == ListenerState::Idle {
                *state = ListenerState::Running;
                true
            } else {
                false
            }
        });
        if !transitioned {
            return Err(match previous {
                ListenerState::Stopped => ListenerError::NotRestartable(self.queue_name()),
                _ => ListenerError::AlreadyStarted(self.queue_name()),
            });
        }

        let handlers = Arc::new(self.handlers.read().await.clone());
        if handlers.is_empty() {
            warn!(queue = %self.queue.name(), "Listener started without handlers");
        }

        let receive_loop = ReceiveLoop {
            dispatch: Arc::new(DispatchContext {
                queue: self.queue.clone(),
                registry: Arc::clone(&self.registry),
                handlers,
                monitor: Arc::clone(&self.monitor),
                error_callback: self.error_callback.clone(),
            }),
            strategy: Arc::clone(&self.strategy),
            settings: self.settings.clone(),
            shutdown: self.shutdown.subscribe(),
            state: Arc::clone(&self.state),
        };

        *self.task.lock().await = Some(tokio::spawn(receive_loop.run()));
        Ok(())
    }

    /// Stop receiving and wait for in-flight messages to finish.
    ///
    /// In-flight handlers are never interrupted. The wait is bounded by the
    /// drain timeout; dispatches still running after it are left to complete
    /// in the background. Returns once the listener is `Stopped`.
    pub async fn stop(&self) {
        let mut previous = ListenerState::Idle;
        self.state.send_if_modified(|state| {
            previous = *state;
            match *state {
                ListenerState::Idle => {
                    *state = ListenerState::Stopped;
                    true
                }
                ListenerState::Running => {
                    *state = ListenerState::Stopping;
                    true
                }
                _ => false,
            }
        });

        match previous {
            ListenerState::Idle | ListenerState::Stopped => return,
            ListenerState::Running | ListenerState::Stopping => {}
        }

        self.shutdown.send_replace(true);

        let task = self.task.lock().await.take();
        match task {
            Some(task) => {
                if let Err(e) = task.await {
                    error!(queue = %self.queue.name(), error = %e, "Receive loop panicked");
                }
                self.state.send_replace(ListenerState::Stopped);
            }
            None => {
                // Another caller is already waiting on the loop.
                let mut state = self.state.subscribe();
                let _ = state.wait_for(|s| *s == ListenerState::Stopped).await;
            }
        }
    }
}

/// Everything the spawned receive loop owns.
struct ReceiveLoop {
    dispatch: Arc<DispatchContext>,
    strategy: Arc<dyn ProcessingStrategy>,
    settings: ListenerSettings,
    shutdown: watch::Receiver<bool>,
    state: Arc<watch::Sender<ListenerState>>,
}

impl ReceiveLoop {
    async fn run(mut self) {
        let queue = self.dispatch.queue.clone();
        let monitor = Arc::clone(&self.dispatch.monitor);
        let mut in_flight: JoinSet<DispatchResult> = JoinSet::new();
        let mut backoff = self.receive_backoff();

        info!(
            queue = %queue.name(),
            region = %queue.region(),
            max_workers = self.strategy.max_workers(),
            "Starting queue listener"
        );

        'receive: loop {
            reap_finished(queue.name(), &mut in_flight);
            if stop_requested(&self.shutdown) {
                break;
            }

            // Hold one slot before pulling messages so nothing is received
            // that cannot be admitted.
            let saturated = self.strategy.available_workers() == 0;
            let waiting_since = Instant::now();
            let first = tokio::select! {
                biased;
                _ = stopped(&mut self.shutdown) => break 'receive,
                permit = self.strategy.admit() => permit,
            };
            if saturated {
                monitor.throttled(queue.name(), waiting_since.elapsed());
            }

            let batch = self
                .settings
                .batch_size
                .min(self.strategy.available_workers().saturating_add(1));

            let receive_started = Instant::now();
            let received = tokio::select! {
                biased;
                _ = stopped(&mut self.shutdown) => break 'receive,
                result = queue.receive(batch, self.settings.wait_time()) => result,
            };
            monitor.receive_time(queue.name(), receive_started.elapsed());

            let messages = match received {
                Ok(messages) => {
                    backoff = self.receive_backoff();
                    messages
                }
                Err(e) => {
                    drop(first);
                    let error = DispatchError::Receive(e);
                    monitor.report_error(&error, &ErrorContext::queue(queue.name()));
                    let delay = backoff
                        .next()
                        .unwrap_or_else(|| self.settings.receive_backoff_max());
                    warn!(
                        queue = %queue.name(),
                        retry_in = ?delay,
                        "Receive failed, backing off"
                    );
                    tokio::select! {
                        biased;
                        _ = stopped(&mut self.shutdown) => break 'receive,
                        _ = tokio::time::sleep(delay) => continue 'receive,
                    }
                }
            };

            let mut first = Some(first);
            for message in messages {
                let permit = match first.take() {
                    Some(permit) => permit,
                    None => tokio::select! {
                        biased;
                        _ = stopped(&mut self.shutdown) => break 'receive,
                        permit = self.strategy.admit() => permit,
                    },
                };
                if stop_requested(&self.shutdown) {
                    // Unadmitted messages become visible again after the
                    // visibility timeout.
                    break 'receive;
                }
                monitor.message_received(queue.name());
                in_flight.spawn(dispatch::dispatch(
                    Arc::clone(&self.dispatch),
                    message,
                    permit,
                ));
            }
        }

        self.drain(in_flight).await;
        self.state.send_replace(ListenerState::Stopped);
        info!(queue = %queue.name(), "Queue listener stopped");
    }

    async fn drain(&self, mut in_flight: JoinSet<DispatchResult>) {
        let queue = self.dispatch.queue.name();
        let drain_timeout = self.settings.drain_timeout();
        debug!(queue = %queue, in_flight = in_flight.len(), "Draining in-flight messages");

        let drained = tokio::time::timeout(drain_timeout, async {
            while let Some(result) = in_flight.join_next().await {
                log_join_error(queue, result);
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                queue = %queue,
                remaining = in_flight.len(),
                drain_timeout_secs = drain_timeout.as_secs(),
                "Drain timeout elapsed, leaving in-flight messages to finish in the background"
            );
            in_flight.detach_all();
        }
    }

    fn receive_backoff(&self) -> impl Iterator<Item = Duration> {
        ExponentialBuilder::default()
            .with_min_delay(self.settings.receive_backoff_min())
            .with_max_delay(self.settings.receive_backoff_max())
            .without_max_times()
            .build()
    }
}

fn reap_finished(queue: &str, in_flight: &mut JoinSet<DispatchResult>) {
    while let Some(result) = in_flight.try_join_next() {
        log_join_error(queue, result);
    }
}

fn log_join_error(queue: &str, result: Result<DispatchResult, tokio::task::JoinError>) {
    if let Err(e) = result {
        error!(queue = %queue, error = %e, "Dispatch task panicked");
    }
}

fn stop_requested(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow()
}

/// Resolves once shutdown is signalled (or its sender is gone).
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}
