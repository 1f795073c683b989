//! Broker-facing components
//!
//! The [`ConnectionHandle`] created by the [`ConnectionSupervisor`] is passed
//! explicitly to the [`BrokerPublisher`] and the [`ConsumerLoop`]; nothing in
//! this module holds a process-wide broker client.

/// Consumer loop and handler registry
pub mod consumer;
/// Envelope publisher
pub mod publisher;
/// Connection and channel lifecycle
pub mod supervisor;
/// Exchange, queue and binding declarations
pub mod topology;

pub use consumer::{ConsumerLoop, ConsumerStats, HandlerRegistry, MessageOutcome};
pub use publisher::BrokerPublisher;
pub use supervisor::{ConnectionHandle, ConnectionSupervisor};
pub use topology::{TopologyHandle, ensure_exchange, ensure_topology};
