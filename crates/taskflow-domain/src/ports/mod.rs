//! Domain Port Interfaces
//!
//! Boundary contracts between the domain and the outer layers.
//!
//! - **infrastructure/** - Broker transport, connection and channel ports
//! - **messaging** - Event handler and event publisher ports used by use cases

/// Infrastructure service ports
pub mod infrastructure;
/// Messaging ports
pub mod messaging;

pub use infrastructure::{
    BrokerChannel, BrokerConnection, BrokerTransport, ConnectionEvent, ConnectionListener,
    Delivery, DeliveryMode, DeliveryStream, ExchangeKind, OutboundMessage, QueueInfo,
};
pub use messaging::{EventHandler, EventPublisher, PublishAck, SharedEventHandler, SharedEventPublisher};
