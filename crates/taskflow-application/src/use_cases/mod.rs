//! Use case implementations
//!
//! | Use case | Role |
//! |----------|------|
//! | [`TaskService`] | Producer: stores tasks, publishes `task.created` best-effort |
//! | [`NotificationService`] | Consumer: turns task events into user notifications |

/// Notification use cases and the `task.created` handler
pub mod notification_service;
/// Task use cases
pub mod task_service;

pub use notification_service::NotificationService;
pub use task_service::{TaskCreation, TaskService};
