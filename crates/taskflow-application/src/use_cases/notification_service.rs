//! Notification service
//!
//! Creates user notifications and acts as the consumer's handler for
//! `task.created`.

use async_trait::async_trait;
use std::sync::Arc;
use taskflow_domain::constants::DEFAULT_NOTIFICATION_LIST_LIMIT;
use taskflow_domain::entities::{CreateNotificationData, Notification, NotificationKind};
use taskflow_domain::error::{Error, Result};
use taskflow_domain::events::{EventEnvelope, TaskCreatedEvent};
use taskflow_domain::ports::EventHandler;
use taskflow_domain::repositories::NotificationRepository;
use tracing::info;

/// Title of the notification sent for a new task
pub const TASK_CREATED_TITLE: &str = "New Task Created";

/// Consumer-side use cases
pub struct NotificationService {
    repository: Arc<dyn NotificationRepository>,
}

impl NotificationService {
    /// Create the service
    pub fn new(repository: Arc<dyn NotificationRepository>) -> Self {
        Self { repository }
    }

    /// Store a new unread notification
    pub async fn create_notification(&self, data: CreateNotificationData) -> Result<Notification> {
        let notification = Notification::new(data);
        self.repository.save(&notification).await?;
        info!(
            user_id = %notification.user_id,
            title = %notification.title,
            "Created notification"
        );
        Ok(notification)
    }

    /// Notify the task owner that the task exists
    pub async fn handle_task_created(&self, event: &TaskCreatedEvent) -> Result<Notification> {
        self.create_notification(CreateNotificationData {
            user_id: event.user_id.clone(),
            kind: NotificationKind::TaskCreated,
            title: TASK_CREATED_TITLE.to_string(),
            message: format!("Your task \"{}\" has been created successfully.", event.title),
        })
        .await
    }

    /// A user's notifications, newest first (default limit 50)
    pub async fn get_user_notifications(
        &self,
        user_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Notification>> {
        self.repository
            .find_by_user(user_id, limit.unwrap_or(DEFAULT_NOTIFICATION_LIST_LIMIT))
            .await
    }

    /// Mark a notification read; `false` if it does not exist
    pub async fn mark_as_read(&self, notification_id: &str) -> Result<bool> {
        self.repository.mark_as_read(notification_id).await
    }

    /// Number of unread notifications for a user
    pub async fn get_unread_count(&self, user_id: &str) -> Result<usize> {
        self.repository.unread_count(user_id).await
    }
}

#[async_trait]
impl EventHandler for NotificationService {
    async fn handle(&self, envelope: &EventEnvelope) -> Result<()> {
        let event = TaskCreatedEvent::try_from(envelope)
            .map_err(|e| Error::handler_with_source("unprocessable task.created event", e))?;
        self.handle_task_created(&event)
            .await
            .map_err(|e| Error::handler_with_source("failed to create notification", e))?;
        Ok(())
    }
}
