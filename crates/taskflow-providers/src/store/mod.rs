//! Repository Provider Implementations
//!
//! Process-local storage backing the task and notification services.

pub mod memory;

pub use memory::{InMemoryNotificationRepository, InMemoryTaskRepository};
