//! Per-message dispatch.
//!
//! Handles the complete decode → route → handle → acknowledge cycle for one
//! received message. Runs as its own task, holding the processing permit
//! until it returns.

use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use super::{DispatchError, ErrorCallback};
use crate::handlers::HandlerMap;
use crate::interfaces::{QueueHandle, ReceivedMessage};
use crate::monitor::{ErrorContext, MessageMonitor};
use crate::serialization::{Envelope, SerializationRegistry};
use crate::strategy::Permit;

/// Result of processing a message through handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchResult {
    /// All handlers succeeded and the message was deleted.
    Success,
    /// Envelope, serializer lookup or payload decoding failed.
    DecodeError,
    /// No handler is registered for the decoded type.
    Unhandled,
    /// One or more handlers failed.
    HandlerFailed,
    /// Handlers succeeded but the delete call failed.
    AcknowledgeFailed,
}

impl DispatchResult {
    /// Returns true if the message was removed from the queue.
    ///
    /// Every other outcome leaves the message to reappear after its
    /// visibility timeout and, eventually, to move to the error queue.
    pub fn is_acknowledged(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Shared, read-only state for every dispatch of one listener.
pub(crate) struct DispatchContext {
    pub queue: QueueHandle,
    pub registry: Arc<SerializationRegistry>,
    pub handlers: Arc<HandlerMap>,
    pub monitor: Arc<dyn MessageMonitor>,
    pub error_callback: Option<ErrorCallback>,
}

impl DispatchContext {
    fn report(&self, message: &ReceivedMessage, message_type: Option<&str>, error: DispatchError) {
        let context = ErrorContext {
            queue: self.queue.name(),
            message_id: Some(&message.message_id),
            message_type,
        };
        self.monitor.report_error(&error, &context);
        if let Some(callback) = &self.error_callback {
            callback(&error, message);
        }
    }
}

/// Dispatch one message. The permit is released when this returns.
pub(crate) async fn dispatch(
    ctx: Arc<DispatchContext>,
    message: ReceivedMessage,
    permit: Permit,
) -> DispatchResult {
    let _permit = permit;
    let queue = ctx.queue.name();

    let envelope = match Envelope::parse(&message.body) {
        Ok(envelope) => envelope,
        Err(e) => {
            ctx.report(&message, None, e.into());
            return DispatchResult::DecodeError;
        }
    };
    let message_type = envelope.message_type.as_str();

    let decoded = match ctx.registry.deserialize(&envelope) {
        Ok(decoded) => decoded,
        Err(e) => {
            ctx.report(&message, Some(message_type), e.into());
            return DispatchResult::DecodeError;
        }
    };

    let handlers = ctx.handlers.handlers_for(message_type);
    if handlers.is_empty() {
        ctx.report(
            &message,
            Some(message_type),
            DispatchError::NoHandler(message_type.to_string()),
        );
        return DispatchResult::Unhandled;
    }

    // Every handler runs even if an earlier one fails; a redelivery reaches
    // all of them again.
    let started = Instant::now();
    let mut all_succeeded = true;
    for handler in handlers {
        if let Err(source) = handler.handle(Arc::clone(&decoded)).await {
            all_succeeded = false;
            ctx.report(
                &message,
                Some(message_type),
                DispatchError::Handler {
                    message_type: message_type.to_string(),
                    source,
                },
            );
        }
    }
    ctx.monitor.handle_time(queue, message_type, started.elapsed());

    if !all_succeeded {
        debug!(
            queue = %queue,
            message_id = %message.message_id,
            "Message will be retried after visibility timeout"
        );
        return DispatchResult::HandlerFailed;
    }

    if let Err(e) = ctx.queue.delete(&message.receipt_handle).await {
        ctx.report(&message, Some(message_type), DispatchError::Acknowledge(e));
        return DispatchResult::AcknowledgeFailed;
    }

    ctx.monitor.message_processed(queue, message_type);
    DispatchResult::Success
}
