//! Infrastructure ports

/// Message broker ports (AMQP 0-9-1 semantics)
pub mod broker;

pub use broker::{
    BrokerChannel, BrokerConnection, BrokerTransport, ConnectionEvent, ConnectionListener,
    Delivery, DeliveryMode, DeliveryStream, ExchangeKind, OutboundMessage, QueueInfo,
};
