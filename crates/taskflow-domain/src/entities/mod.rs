//! Domain entities owned by the two services

/// Task entity (task service)
pub mod task;
/// Notification entity (notification service)
pub mod notification;

pub use notification::{CreateNotificationData, Notification, NotificationKind};
pub use task::{CreateTaskData, Task, TaskStatus};
