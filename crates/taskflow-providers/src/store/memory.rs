//! In-memory repositories
//!
//! Contents live for the lifetime of the process.

use async_trait::async_trait;
use std::collections::HashMap;
use taskflow_domain::entities::{Notification, Task};
use taskflow_domain::error::Result;
use taskflow_domain::repositories::{NotificationRepository, TaskRepository};
use tokio::sync::RwLock;

/// Task storage keyed by task id
#[derive(Debug, Default)]
pub struct InMemoryTaskRepository {
    tasks: RwLock<HashMap<String, Task>>,
}

impl InMemoryTaskRepository {
    /// Create an empty repository
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored tasks
    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    /// Whether nothing is stored
    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }
}

#[async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn save(&self, task: &Task) -> Result<()> {
        self.tasks.write().await.insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn find_by_id(&self, task_id: &str) -> Result<Option<Task>> {
        Ok(self.tasks.read().await.get(task_id).cloned())
    }

    async fn find_by_user(&self, user_id: &str, limit: usize) -> Result<Vec<Task>> {
        let mut tasks: Vec<Task> = self
            .tasks
            .read()
            .await
            .values()
            .filter(|task| task.user_id == user_id)
            .cloned()
            .collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        tasks.truncate(limit);
        Ok(tasks)
    }
}

/// Notification storage in insertion order
#[derive(Debug, Default)]
pub struct InMemoryNotificationRepository {
    notifications: RwLock<Vec<Notification>>,
}

impl InMemoryNotificationRepository {
    /// Create an empty repository
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored notifications
    pub async fn len(&self) -> usize {
        self.notifications.read().await.len()
    }

    /// Whether nothing is stored
    pub async fn is_empty(&self) -> bool {
        self.notifications.read().await.is_empty()
    }
}

#[async_trait]
impl NotificationRepository for InMemoryNotificationRepository {
    async fn save(&self, notification: &Notification) -> Result<()> {
        let mut notifications = self.notifications.write().await;
        match notifications.iter_mut().find(|n| n.id == notification.id) {
            Some(existing) => *existing = notification.clone(),
            None => notifications.push(notification.clone()),
        }
        Ok(())
    }

    async fn find_by_user(&self, user_id: &str, limit: usize) -> Result<Vec<Notification>> {
        let mut notifications: Vec<Notification> = self
            .notifications
            .read()
            .await
            .iter()
            .rev()
            .filter(|n| n.user_id == user_id)
            .cloned()
            .collect();
        // Stable sort: ties keep the most recently inserted first
        notifications.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        notifications.truncate(limit);
        Ok(notifications)
    }

    async fn mark_as_read(&self, notification_id: &str) -> Result<bool> {
        let mut notifications = self.notifications.write().await;
        Ok(match notifications.iter_mut().find(|n| n.id == notification_id) {
            Some(notification) => {
                notification.read = true;
                true
            }
            None => false,
        })
    }

    async fn unread_count(&self, user_id: &str) -> Result<usize> {
        Ok(self
            .notifications
            .read()
            .await
            .iter()
            .filter(|n| n.user_id == user_id && !n.read)
            .count())
    }
}
