//! Typed task events
//!
//! The task service builds a [`TaskCreatedEvent`] for every created task and
//! ships it as an [`EventEnvelope`]; consumers convert the envelope back with
//! `TryFrom`.

use super::envelope::EventEnvelope;
use crate::constants::TASK_CREATED;
use crate::entities::Task;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};

/// Attribute key for the owning user
pub const USER_ID_ATTRIBUTE: &str = "userId";

/// Attribute key for the task title
pub const TITLE_ATTRIBUTE: &str = "title";

/// Emitted once a task has been stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskCreatedEvent {
    /// Id of the created task
    pub task_id: String,
    /// Owner of the task
    pub user_id: String,
    /// Task title
    pub title: String,
    /// Emission time
    pub timestamp: DateTime<Utc>,
}

impl TaskCreatedEvent {
    /// Build the event for a freshly created task, stamped now
    pub fn for_task(task: &Task) -> Self {
        Self {
            task_id: task.id.clone(),
            user_id: task.user_id.clone(),
            title: task.title.clone(),
            timestamp: Utc::now(),
        }
    }

    /// Convert to the wire envelope
    pub fn to_envelope(&self) -> Result<EventEnvelope> {
        EventEnvelope::builder(TASK_CREATED, self.task_id.as_str())
            .attribute(USER_ID_ATTRIBUTE, self.user_id.as_str())
            .attribute(TITLE_ATTRIBUTE, self.title.as_str())
            .emitted_at(self.timestamp)
            .build()
    }
}

impl TryFrom<&EventEnvelope> for TaskCreatedEvent {
    type Error = Error;

    fn try_from(envelope: &EventEnvelope) -> Result<Self> {
        if envelope.event_type() != TASK_CREATED {
            return Err(Error::invalid_argument(format!(
                "expected '{TASK_CREATED}' event, got '{}'",
                envelope.event_type()
            )));
        }
        let user_id = required_text(envelope, USER_ID_ATTRIBUTE)?;
        let title = required_text(envelope, TITLE_ATTRIBUTE)?;
        Ok(Self {
            task_id: envelope.correlation_id().to_string(),
            user_id,
            title,
            timestamp: envelope.emitted_at(),
        })
    }
}

fn required_text(envelope: &EventEnvelope, key: &str) -> Result<String> {
    envelope
        .attribute(key)
        .map(ToString::to_string)
        .ok_or_else(|| {
            Error::invalid_argument(format!(
                "'{}' event {} is missing '{key}'",
                envelope.event_type(),
                envelope.correlation_id()
            ))
        })
}
