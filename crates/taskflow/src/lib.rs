//! # Taskflow
//!
//! Task events delivered over RabbitMQ: the task service publishes
//! `task.created` on the `task.events` topic exchange and the notification
//! consumer turns each one into a notification for the task's owner.
//!
//! This crate is the public facade. It re-exports the layers and provides the
//! two process entry points used by the `taskflow` binary.
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use taskflow::{AppConfig, CreateTaskData, create_task};
//! use taskflow::infrastructure::bootstrap::amqp_transport;
//! use taskflow::providers::InMemoryTaskRepository;
//!
//! let config = AppConfig::default();
//! let creation = create_task(
//!     &config,
//!     amqp_transport(&config.broker),
//!     Arc::new(InMemoryTaskRepository::new()),
//!     CreateTaskData {
//!         title: "Buy milk".to_string(),
//!         description: None,
//!         user_id: "u1".to_string(),
//!     },
//! )
//! .await?;
//! assert!(creation.is_delivered());
//! ```
//!
//! ## Architecture
//!
//! - `domain` - Envelope, entities, error taxonomy and port traits
//! - `application` - Supervisor, topology, publisher, consumer loop, use cases
//! - `infrastructure` - Configuration, logging, shutdown, runtimes
//! - `providers` - AMQP transport, in-memory broker and stores

use std::sync::Arc;
use taskflow_application::{HandlerRegistry, NotificationService};
use taskflow_domain::constants::TASK_CREATED;
use taskflow_domain::ports::BrokerTransport;
use taskflow_domain::repositories::{NotificationRepository, TaskRepository};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Domain layer - envelope, entities and ports
///
/// Re-exports from the domain crate for convenience
pub mod domain {
    pub use taskflow_domain::*;
}

/// Application layer - messaging components and use cases
///
/// Re-exports from the application crate for convenience
pub mod application {
    pub use taskflow_application::*;
}

/// Infrastructure layer - config, logging, shutdown and runtimes
///
/// Re-exports from the infrastructure crate for convenience
pub mod infrastructure {
    pub use taskflow_infrastructure::*;
}

/// Provider implementations
///
/// Re-exports from the providers crate for convenience
pub mod providers {
    pub use taskflow_providers::*;
}

// Re-export commonly used domain types at the crate root
pub use domain::*;

pub use application::{ConsumerStats, TaskCreation};
pub use infrastructure::{AppConfig, ConfigLoader, ConsumerRuntime, ProducerRuntime};

/// Run the notification consumer until `shutdown` is cancelled
///
/// Fails at startup when the broker is unreachable or the topology cannot be
/// declared, and later when the connection is lost.
pub async fn run_notify(
    config: &AppConfig,
    transport: Arc<dyn BrokerTransport>,
    notifications: Arc<dyn NotificationRepository>,
    shutdown: CancellationToken,
) -> Result<ConsumerStats> {
    let service = Arc::new(NotificationService::new(notifications));
    let registry = HandlerRegistry::new().with_handler(TASK_CREATED, service);

    let runtime = ConsumerRuntime::start(config, transport, registry).await?;
    info!(queue = %runtime.topology().queue, "Notification consumer running");
    runtime.run_until(shutdown).await
}

/// Create one task and publish its `task.created` event
///
/// Only startup failures are errors; a publish failure is reported in the
/// returned [`TaskCreation`].
pub async fn create_task(
    config: &AppConfig,
    transport: Arc<dyn BrokerTransport>,
    tasks: Arc<dyn TaskRepository>,
    data: CreateTaskData,
) -> Result<TaskCreation> {
    let runtime = ProducerRuntime::start(config, transport, tasks).await?;
    let creation = runtime.task_service().create_task(data).await;
    runtime.shutdown().await;
    creation
}
