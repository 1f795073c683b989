//! Messaging ports used by the use cases
//!
//! The task service only sees [`EventPublisher`]; the notification service
//! only implements [`EventHandler`]. Neither knows about the broker.

use crate::error::Result;
use crate::events::EventEnvelope;
use async_trait::async_trait;
use std::sync::Arc;

/// Receipt for a message the broker accepted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishAck {
    /// Exchange the message was sent to
    pub exchange: String,
    /// Routing key used
    pub routing_key: String,
    /// Correlation id of the published envelope
    pub correlation_id: String,
    /// Encoded body size in bytes
    pub payload_bytes: usize,
}

/// Publishes envelopes without retrying
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish one envelope, routed by its event type
    async fn publish(&self, envelope: &EventEnvelope) -> Result<PublishAck>;
}

/// Processes one decoded envelope
///
/// Returning `Ok` acknowledges the message; returning `Err` rejects it
/// without requeue.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle one envelope to completion
    async fn handle(&self, envelope: &EventEnvelope) -> Result<()>;
}

/// Shared event publisher
pub type SharedEventPublisher = Arc<dyn EventPublisher>;

/// Shared event handler
pub type SharedEventHandler = Arc<dyn EventHandler>;
