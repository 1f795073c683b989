//! Broker Provider Implementations
//!
//! ## Provider Selection Guide
//!
//! - **Production**: `AmqpBrokerTransport` against RabbitMQ
//! - **Testing / local runs**: `InMemoryBroker`, which follows the same
//!   declare, route, ack and reject rules in process

#[cfg(feature = "broker-amqp")]
pub mod amqp;
pub mod memory;
pub mod topic;

#[cfg(feature = "broker-amqp")]
pub use amqp::AmqpBrokerTransport;
pub use memory::{Binding, InMemoryBroker, RejectedMessage};
pub use topic::topic_matches;
