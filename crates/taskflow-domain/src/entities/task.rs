use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Created, not yet done
    #[default]
    Pending,
    /// Done
    Completed,
    /// Abandoned
    Cancelled,
}

/// A user's task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Task id (uuid v4)
    pub id: String,
    /// Title
    pub title: String,
    /// Optional free-form description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Owning user
    pub user_id: String,
    /// Current status
    pub status: TaskStatus,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last update time
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskData {
    /// Title
    pub title: String,
    /// Optional description
    #[serde(default)]
    pub description: Option<String>,
    /// Owning user
    pub user_id: String,
}

impl Task {
    /// Create a pending task with a fresh id
    pub fn new(data: CreateTaskData) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            title: data.title,
            description: data.description,
            user_id: data.user_id,
            status: TaskStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }
}
