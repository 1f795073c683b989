//! # Taskflow Providers
//!
//! Implementations of the domain's port traits.
//!
//! | Provider | Port | Description |
//! |----------|------|-------------|
//! | [`AmqpBrokerTransport`] | `BrokerTransport` | RabbitMQ via lapin (feature `broker-amqp`) |
//! | [`InMemoryBroker`] | `BrokerTransport` | In-process broker for tests and local runs |
//! | [`InMemoryTaskRepository`] | `TaskRepository` | Process-local task storage |
//! | [`InMemoryNotificationRepository`] | `NotificationRepository` | Process-local notification storage |

pub mod broker;
pub mod store;

#[cfg(feature = "broker-amqp")]
pub use broker::AmqpBrokerTransport;
pub use broker::{Binding, InMemoryBroker, RejectedMessage};
pub use store::{InMemoryNotificationRepository, InMemoryTaskRepository};
