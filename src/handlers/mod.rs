//! Message handlers and per-topic routing.
//!
//! Application code implements `MessageHandler<T>` for a concrete message type.
//! The bus wraps each handler so it can be stored next to handlers of other
//! types in a `HandlerMap`, keyed by the message type discriminator.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::serialization::{DecodedMessage, Message};

/// Error returned by an application handler.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Handles messages of one concrete type.
#[async_trait]
pub trait MessageHandler<T: Message>: Send + Sync {
    async fn handle(&self, message: &T) -> Result<(), HandlerError>;
}

/// Type-erased handler, as stored by the router.
pub trait ErasedHandler: Send + Sync {
    /// Message type this handler accepts.
    fn message_type(&self) -> &'static str;

    fn handle(&self, message: DecodedMessage) -> BoxFuture<'static, Result<(), HandlerError>>;
}

struct TypedHandler<T: Message> {
    inner: Arc<dyn MessageHandler<T>>,
}

impl<T: Message> ErasedHandler for TypedHandler<T> {
    fn message_type(&self) -> &'static str {
        T::MESSAGE_TYPE
    }

    fn handle(&self, message: DecodedMessage) -> BoxFuture<'static, Result<(), HandlerError>> {
        let inner = Arc::clone(&self.inner);
        Box::pin(async move {
            let message = message.downcast::<T>().map_err(|_| -> HandlerError {
                format!("decoded message is not a {}", T::MESSAGE_TYPE).into()
            })?;
            inner.handle(&message).await
        })
    }
}

/// Wrap a typed handler for storage in a `HandlerMap`.
pub fn erase<T: Message>(handler: Arc<dyn MessageHandler<T>>) -> Arc<dyn ErasedHandler> {
    Arc::new(TypedHandler { inner: handler })
}

/// Routes decoded messages of one topic to their handlers.
///
/// Multiple handlers per type are kept in registration order.
#[derive(Clone, Default)]
pub struct HandlerMap {
    routes: HashMap<&'static str, Vec<Arc<dyn ErasedHandler>>>,
}

impl HandlerMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<T: Message>(&mut self, handler: Arc<dyn MessageHandler<T>>) {
        self.add_erased(erase(handler));
    }

    pub fn add_erased(&mut self, handler: Arc<dyn ErasedHandler>) {
        self.routes
            .entry(handler.message_type())
            .or_default()
            .push(handler);
    }

    /// Handlers for a type, in registration order. Empty when none match.
    pub fn handlers_for(&self, message_type: &str) -> &[Arc<dyn ErasedHandler>] {
        self.routes
            .get(message_type)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Registered message types, sorted.
    pub fn message_types(&self) -> Vec<&'static str> {
        let mut types: Vec<_> = self.routes.keys().copied().collect();
        types.sort_unstable();
        types
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
