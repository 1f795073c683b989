//! Repository Interfaces
//!
//! | Repository | Description |
//! |------------|-------------|
//! | [`TaskRepository`] | Task storage for the task service |
//! | [`NotificationRepository`] | Notification storage for the notification service |

use crate::entities::{Notification, Task};
use crate::error::Result;
use async_trait::async_trait;

/// Task storage
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Store a task, replacing any task with the same id
    async fn save(&self, task: &Task) -> Result<()>;

    /// Fetch a task by id
    async fn find_by_id(&self, task_id: &str) -> Result<Option<Task>>;

    /// Most recent tasks of a user, newest first
    async fn find_by_user(&self, user_id: &str, limit: usize) -> Result<Vec<Task>>;
}

/// Notification storage
#[async_trait]
pub trait NotificationRepository: Send + Sync {
    /// Store a notification
    async fn save(&self, notification: &Notification) -> Result<()>;

    /// Most recent notifications of a user, newest first
    async fn find_by_user(&self, user_id: &str, limit: usize) -> Result<Vec<Notification>>;

    /// Mark one notification read; `false` if it does not exist
    async fn mark_as_read(&self, notification_id: &str) -> Result<bool>;

    /// Number of unread notifications of a user
    async fn unread_count(&self, user_id: &str) -> Result<usize>;
}
