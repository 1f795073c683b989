//! Task service
//!
//! Task creation succeeds once the task is stored. Publishing the
//! `task.created` event is best-effort: its outcome travels back next to the
//! task in [`TaskCreation`] and a failure never fails the creation.

use std::sync::Arc;
use taskflow_domain::constants::DEFAULT_TASK_LIST_LIMIT;
use taskflow_domain::entities::{CreateTaskData, Task};
use taskflow_domain::error::Result;
use taskflow_domain::events::TaskCreatedEvent;
use taskflow_domain::ports::{PublishAck, SharedEventPublisher};
use taskflow_domain::repositories::TaskRepository;
use tracing::{info, warn};

/// A created task and the outcome of publishing its event
#[derive(Debug)]
pub struct TaskCreation {
    /// The stored task
    pub task: Task,
    /// Publish receipt, or why the event was not delivered to the broker
    pub delivery: Result<PublishAck>,
}

impl TaskCreation {
    /// Whether the broker accepted the `task.created` event
    pub fn is_delivered(&self) -> bool {
        self.delivery.is_ok()
    }
}

/// Producer-side use cases
pub struct TaskService {
    repository: Arc<dyn TaskRepository>,
    publisher: SharedEventPublisher,
}

impl TaskService {
    /// Create the service
    pub fn new(repository: Arc<dyn TaskRepository>, publisher: SharedEventPublisher) -> Self {
        Self {
            repository,
            publisher,
        }
    }

    /// Store a new task and publish `task.created`
    ///
    /// Only a storage failure is an error.
    pub async fn create_task(&self, data: CreateTaskData) -> Result<TaskCreation> {
        let task = Task::new(data);
        self.repository.save(&task).await?;

        let event = TaskCreatedEvent::for_task(&task);
        let delivery = match event.to_envelope() {
            Ok(envelope) => self.publisher.publish(&envelope).await,
            Err(e) => Err(e),
        };

        match &delivery {
            Ok(_) => info!(task_id = %task.id, "Event published for task"),
            Err(e) => warn!(
                task_id = %task.id,
                error = %e,
                "Failed to publish event, task was created without notification"
            ),
        }
        info!(task_id = %task.id, user_id = %task.user_id, "Task created");

        Ok(TaskCreation { task, delivery })
    }

    /// Fetch one task
    pub async fn get_task(&self, task_id: &str) -> Result<Option<Task>> {
        self.repository.find_by_id(task_id).await
    }

    /// A user's tasks, newest first (default limit 20)
    pub async fn get_user_tasks(&self, user_id: &str, limit: Option<usize>) -> Result<Vec<Task>> {
        self.repository
            .find_by_user(user_id, limit.unwrap_or(DEFAULT_TASK_LIST_LIMIT))
            .await
    }
}
