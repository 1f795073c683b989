//! Message Broker Ports
//!
//! Contracts for talking to a message broker with AMQP 0-9-1 semantics:
//! a transport opens connections, a connection opens channels, and a
//! channel declares topology, publishes, consumes and settles deliveries.
//!
//! ## Implementations
//!
//! | Provider | Description |
//! |----------|-------------|
//! | `AmqpBrokerTransport` | RabbitMQ via lapin |
//! | `InMemoryBroker` | In-process broker for tests and local runs |
//!
//! Declarations are declarative: asserting an existing exchange, queue or
//! binding with identical arguments succeeds and changes nothing.

use crate::error::Result;
use async_trait::async_trait;
use futures::Stream;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

/// Exchange routing type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExchangeKind {
    /// Pattern-matched routing keys (`*` one word, `#` zero or more)
    Topic,
    /// Exact routing key match
    Direct,
    /// Every bound queue
    Fanout,
}

impl ExchangeKind {
    /// AMQP name of the exchange type
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Topic => "topic",
            Self::Direct => "direct",
            Self::Fanout => "fanout",
        }
    }
}

impl fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// AMQP delivery mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryMode {
    /// Lost on broker restart
    Transient,
    /// Written to disk when routed to a durable queue
    #[default]
    Persistent,
}

impl DeliveryMode {
    /// Wire value of the `delivery-mode` property
    pub fn as_u8(&self) -> u8 {
        match self {
            Self::Transient => 1,
            Self::Persistent => 2,
        }
    }
}

/// A message ready to be handed to the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Target exchange
    pub exchange: String,
    /// Routing key
    pub routing_key: String,
    /// Message body
    pub payload: Vec<u8>,
    /// Delivery mode
    pub delivery_mode: DeliveryMode,
    /// MIME content type of the body
    pub content_type: String,
}

/// Result of a queue declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueInfo {
    /// Queue name
    pub name: String,
    /// Ready messages at declaration time
    pub message_count: u32,
    /// Active consumers at declaration time
    pub consumer_count: u32,
}

/// A message delivered to a consumer, awaiting ack or reject
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Channel-scoped tag used to settle the delivery
    pub delivery_tag: u64,
    /// Routing key the message was published with
    pub routing_key: String,
    /// Whether the broker delivered this message before
    pub redelivered: bool,
    /// Raw message body
    pub payload: Vec<u8>,
}

/// Stream of deliveries for one consumer; ends when the channel closes
pub type DeliveryStream = Pin<Box<dyn Stream<Item = Result<Delivery>> + Send + 'static>>;

/// Asynchronous connection-level notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Connection-level error reported by the transport
    Error(String),
    /// Connection closed (by us or by the broker)
    Closed,
}

/// Callback invoked for every [`ConnectionEvent`]
pub type ConnectionListener = Arc<dyn Fn(&ConnectionEvent) + Send + Sync>;

/// Opens broker connections
#[async_trait]
pub trait BrokerTransport: Send + Sync {
    /// Short provider name for logs
    fn name(&self) -> &str;

    /// Open a connection to `url`
    ///
    /// Fails with `Error::Connection` when the broker is unreachable or
    /// refuses the connection.
    async fn connect(&self, url: &str) -> Result<Arc<dyn BrokerConnection>>;
}

/// An open transport connection
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    /// Open a logical channel over this connection
    async fn create_channel(&self) -> Result<Arc<dyn BrokerChannel>>;

    /// Register a listener for connection errors and closure
    ///
    /// Listeners are invoked from the transport's own context and must not
    /// block.
    fn on_event(&self, listener: ConnectionListener);

    /// Whether the transport still reports the connection as usable
    fn is_open(&self) -> bool;

    /// Close the connection and every channel on it
    async fn close(&self) -> Result<()>;
}

/// A logical channel: topology, publish, consume and settle
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    /// Declare an exchange
    async fn declare_exchange(&self, name: &str, kind: ExchangeKind, durable: bool) -> Result<()>;

    /// Declare a queue
    async fn declare_queue(&self, name: &str, durable: bool) -> Result<QueueInfo>;

    /// Bind `queue` to `exchange` under `routing_key`
    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<()>;

    /// Hand a message to the broker
    ///
    /// Succeeds once the broker has accepted the message into its buffer;
    /// says nothing about whether any queue consumes it.
    async fn publish(&self, message: &OutboundMessage) -> Result<()>;

    /// Start consuming `queue` with manual acknowledgement
    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream>;

    /// Positively acknowledge one delivery
    async fn ack(&self, delivery_tag: u64) -> Result<()>;

    /// Reject one delivery, optionally requeueing it
    async fn reject(&self, delivery_tag: u64, requeue: bool) -> Result<()>;

    /// Whether the channel is still usable
    fn is_open(&self) -> bool;

    /// Close the channel
    async fn close(&self) -> Result<()>;
}
