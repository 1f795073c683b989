//! Application Layer - Taskflow
//!
//! Orchestrates event delivery between the task service and its consumers.
//!
//! ## Messaging
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`messaging::supervisor`] | Owns the broker connection and channel, tracks connectivity |
//! | [`messaging::topology`] | Declares the exchange, queue and binding |
//! | [`messaging::publisher`] | Sends envelopes as persistent messages |
//! | [`messaging::consumer`] | Decodes, dispatches and settles deliveries |
//!
//! ## Use Cases
//!
//! - Task creation with best-effort event publication
//! - Notification creation from `task.created` events
//!
//! ## Dependencies
//!
//! This crate depends only on `taskflow-domain` and pure async libraries; the
//! broker itself is reached through the domain's port traits.

pub mod messaging;
pub mod use_cases;

pub use messaging::*;
pub use use_cases::*;
