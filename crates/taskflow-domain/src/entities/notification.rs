use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What a notification is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// A task was created
    TaskCreated,
    /// A task was completed
    TaskCompleted,
    /// A task was cancelled
    TaskCancelled,
}

/// An alert shown to a user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    /// Notification id (uuid v4)
    pub id: String,
    /// Recipient
    pub user_id: String,
    /// Kind
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    /// Short title
    pub title: String,
    /// Body text
    pub message: String,
    /// Whether the user has read it
    pub read: bool,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// Input for creating a notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateNotificationData {
    /// Recipient
    pub user_id: String,
    /// Kind
    pub kind: NotificationKind,
    /// Short title
    pub title: String,
    /// Body text
    pub message: String,
}

impl Notification {
    /// Create an unread notification with a fresh id
    pub fn new(data: CreateNotificationData) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: data.user_id,
            kind: data.kind,
            title: data.title,
            message: data.message,
            read: false,
            created_at: Utc::now(),
        }
    }
}
