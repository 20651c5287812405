//! Monitoring port.
//!
//! Listeners and the bus report message flow and failures through a
//! `MessageMonitor` handed to them at construction. Every method has a no-op
//! default so implementations only override what they record.

#[cfg(feature = "otel")]
mod otel;

#[cfg(feature = "otel")]
pub use otel::OtelMonitor;

use std::time::Duration;

use tracing::{debug, error, trace, warn};

use crate::listener::DispatchError;

/// Where a runtime failure happened.
#[derive(Debug, Clone, Copy)]
pub struct ErrorContext<'a> {
    pub queue: &'a str,
    pub message_id: Option<&'a str>,
    pub message_type: Option<&'a str>,
}

impl<'a> ErrorContext<'a> {
    pub fn queue(queue: &'a str) -> Self {
        Self {
            queue,
            message_id: None,
            message_type: None,
        }
    }
}

/// Observer of message flow.
pub trait MessageMonitor: Send + Sync {
    /// A message was taken off a queue and admitted for dispatch.
    fn message_received(&self, _queue: &str) {}

    /// All handlers succeeded and the message was acknowledged.
    fn message_processed(&self, _queue: &str, _message_type: &str) {}

    /// Time spent in handlers for one message.
    fn handle_time(&self, _queue: &str, _message_type: &str, _elapsed: Duration) {}

    /// A runtime failure. Called once per failure.
    fn report_error(&self, _error: &DispatchError, _context: &ErrorContext<'_>) {}

    /// Duration of one receive call.
    fn receive_time(&self, _queue: &str, _elapsed: Duration) {}

    /// The receive loop waited for a free slot.
    fn throttled(&self, _queue: &str, _waited: Duration) {}

    fn publish_time(&self, _message_type: &str, _elapsed: Duration) {}

    fn publish_failed(&self, _message_type: &str, _error: &str) {}
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullMonitor;

impl MessageMonitor for NullMonitor {}

/// Reports through `tracing` events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingMonitor;

impl MessageMonitor for TracingMonitor {
    fn message_received(&self, queue: &str) {
        trace!(queue = %queue, "Message received");
    }

    fn message_processed(&self, queue: &str, message_type: &str) {
        debug!(queue = %queue, message_type = %message_type, "Message processed");
    }

    fn handle_time(&self, queue: &str, message_type: &str, elapsed: Duration) {
        trace!(
            queue = %queue,
            message_type = %message_type,
            elapsed = ?elapsed,
            "Handlers finished"
        );
    }

    fn report_error(&self, error: &DispatchError, context: &ErrorContext<'_>) {
        error!(
            queue = %context.queue,
            message_id = ?context.message_id,
            message_type = ?context.message_type,
            error = %error,
            "Message dispatch failed"
        );
    }

    fn throttled(&self, queue: &str, waited: Duration) {
        debug!(
            queue = %queue,
            waited = ?waited,
            "Receive loop throttled"
        );
    }

    fn publish_failed(&self, message_type: &str, error: &str) {
        warn!(message_type = %message_type, error = %error, "Publish failed");
    }
}
