//! # Domain Layer
//!
//! Core types for Taskflow event delivery: the wire envelope, the task and
//! notification entities, the error taxonomy and the port traits that the
//! application layer drives and the providers implement.
//!
//! ## Module Categories
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`events`] | Event envelope and typed task events |
//! | [`entities`] | Task and notification entities |
//! | [`ports`] | Broker and messaging port traits |
//! | [`repositories`] | Task and notification storage ports |
//! | [`error`] | Error taxonomy and `Result` alias |
//! | [`constants`] | Exchange, queue and routing constants |

/// Domain constants (exchange, queue, routing keys)
pub mod constants;
/// Task and notification entities
pub mod entities;
/// Error taxonomy
pub mod error;
/// Event envelope and typed events
pub mod events;
/// Port traits for broker and messaging
pub mod ports;
/// Storage port traits
pub mod repositories;

pub use entities::{
    CreateNotificationData, CreateTaskData, Notification, NotificationKind, Task, TaskStatus,
};
pub use error::{Error, Result};
pub use events::{AttributeValue, EventEnvelope, EventEnvelopeBuilder, TaskCreatedEvent};
