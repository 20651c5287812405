//! Herald - pub/sub messaging over SNS topics and SQS queues.
//!
//! Binds application message types to topics and queues, provisions the
//! underlying resources idempotently and dispatches inbound messages to
//! registered handlers under a bounded concurrency policy.

#[cfg(feature = "sns-sqs")]
pub mod aws;
pub mod bus;
pub mod config;
pub mod handlers;
pub mod interfaces;
pub mod listener;
pub mod memory;
pub mod monitor;
pub mod naming;
pub mod provisioning;
pub mod publisher;
pub mod serialization;
pub mod strategy;
pub mod utils;

#[cfg(test)]
pub(crate) mod test_utils;

pub use bus::{BusError, MessagingBus};
pub use config::{SubscriptionConfig, SubscriptionHooks, SubscriptionSettings};
pub use handlers::{HandlerError, MessageHandler};
pub use listener::{ListenerState, NotificationListener};
pub use serialization::{Message, SerializationRegistry};
pub use strategy::{ProcessingStrategy, Throttled, Unbounded, ZeroCapacity};
