//! Domain Events
//!
//! Events are immutable facts emitted by the task service and consumed by
//! other services through the broker.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`EventEnvelope`] | Wire representation of any event |
//! | [`TaskCreatedEvent`] | Typed view of a `task.created` envelope |

/// Event envelope and wire codec
pub mod envelope;
/// Typed task events
pub mod task_events;

pub use envelope::{AttributeValue, EventEnvelope, EventEnvelopeBuilder};
pub use task_events::TaskCreatedEvent;
