//! Abstract interfaces for herald's external collaborators.
//!
//! These traits define the contracts for:
//! - Queue service (provisioning, receive, acknowledge)
//! - Topic service (existence, creation, fan-out subscription, publish)
//!
//! Implementations live in `crate::aws` (SNS/SQS) and `crate::memory`.

pub mod queue_service;
pub mod topic_service;

pub use queue_service::{
    QueueAttributes, QueueHandle, QueueRef, QueueService, ReceivedMessage, RedrivePolicy,
};
pub use topic_service::TopicService;

/// Result type for collaborator calls.
pub type Result<T> = std::result::Result<T, ServiceError>;

/// Errors returned by queue and topic services.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ServiceError {
    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),
}
