//! Message serialization.
//!
//! Messages are identified by an explicit type discriminator
//! (`Message::MESSAGE_TYPE`) chosen when the type is declared. The same key
//! selects the serializer on publish, travels as the SNS `Subject`, and selects
//! serializer and handlers again on receive.

mod envelope;

pub use envelope::{Envelope, SnsNotification};

use std::any::Any;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Arc, PoisonError, RwLock};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

/// Result type for serialization operations.
pub type Result<T> = std::result::Result<T, SerializationError>;

/// A decoded message, typed only by its registry key until a handler downcasts it.
pub type DecodedMessage = Arc<dyn Any + Send + Sync>;

/// Errors that can occur while encoding or decoding messages.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SerializationError {
    #[error("No serializer registered for message type '{0}'")]
    NotFound(String),

    #[error("Failed to decode '{message_type}': {reason}")]
    Decode { message_type: String, reason: String },

    #[error("Failed to encode '{message_type}': {reason}")]
    Encode { message_type: String, reason: String },

    #[error("Malformed envelope: {0}")]
    Envelope(String),
}

/// An application message that can travel over the bus.
pub trait Message: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Type discriminator, unique per bus.
    const MESSAGE_TYPE: &'static str;
}

/// Converts one message type to and from its wire payload.
pub trait MessageSerializer: Send + Sync {
    fn serialize(&self, message: &(dyn Any + Send + Sync)) -> Result<String>;

    fn deserialize(&self, payload: &str) -> Result<DecodedMessage>;
}

/// JSON serializer backed by serde.
pub struct JsonSerializer<T> {
    _message: PhantomData<fn() -> T>,
}

impl<T> JsonSerializer<T> {
    pub fn new() -> Self {
        Self {
            _message: PhantomData,
        }
    }
}

impl<T> Default for JsonSerializer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Message> MessageSerializer for JsonSerializer<T> {
    fn serialize(&self, message: &(dyn Any + Send + Sync)) -> Result<String> {
        let message = message
            .downcast_ref::<T>()
            .ok_or_else(|| SerializationError::Encode {
                message_type: T::MESSAGE_TYPE.to_string(),
                reason: "message is not of the registered type".to_string(),
            })?;
        serde_json::to_string(message).map_err(|e| SerializationError::Encode {
            message_type: T::MESSAGE_TYPE.to_string(),
            reason: e.to_string(),
        })
    }

    fn deserialize(&self, payload: &str) -> Result<DecodedMessage> {
        let message: T =
            serde_json::from_str(payload).map_err(|e| SerializationError::Decode {
                message_type: T::MESSAGE_TYPE.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Arc::new(message))
    }
}

/// Maps message type discriminators to serializers.
///
/// Entries are add-only; registering a type again replaces its serializer.
/// Registration happens during configuration, before any listener starts;
/// lookups afterwards are concurrent reads.
#[derive(Default)]
pub struct SerializationRegistry {
    entries: RwLock<HashMap<String, Arc<dyn MessageSerializer>>>,
}

impl SerializationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a serializer for `T`.
    pub fn add_serializer<T: Message>(&self, serializer: Arc<dyn MessageSerializer>) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries
            .insert(T::MESSAGE_TYPE.to_string(), serializer)
            .is_some()
        {
            debug!(message_type = T::MESSAGE_TYPE, "Replaced serializer");
        }
    }

    /// Register the JSON serializer for `T`.
    pub fn add_json<T: Message>(&self) {
        self.add_serializer::<T>(Arc::new(JsonSerializer::<T>::new()));
    }

    pub fn get_serializer(&self, message_type: &str) -> Result<Arc<dyn MessageSerializer>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(message_type)
            .cloned()
            .ok_or_else(|| SerializationError::NotFound(message_type.to_string()))
    }

    pub fn get_serializer_for<T: Message>(&self) -> Result<Arc<dyn MessageSerializer>> {
        self.get_serializer(T::MESSAGE_TYPE)
    }

    pub fn contains(&self, message_type: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(message_type)
    }

    /// Encode a message for publishing.
    pub fn serialize<T: Message>(&self, message: &T) -> Result<String> {
        self.get_serializer_for::<T>()?.serialize(message)
    }

    /// Decode the payload of an envelope using the serializer for its type.
    pub fn deserialize(&self, envelope: &Envelope) -> Result<DecodedMessage> {
        self.get_serializer(&envelope.message_type)?
            .deserialize(&envelope.payload)
    }
}
