//! AMQP Broker Provider
//!
//! RabbitMQ transport over [lapin](https://docs.rs/lapin).
//!
//! ## Features
//!
//! - Connection naming for the RabbitMQ management UI
//! - Per-channel prefetch, so the broker pushes one unacked delivery at a time
//! - Connection errors fanned out to every registered listener
//!
//! Publisher confirms are not enabled: a publish succeeds once lapin has
//! handed the frames to the connection.

use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
    BasicRejectOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use std::sync::{Arc, Mutex, PoisonError};
use taskflow_domain::error::{Error, Result};
use taskflow_domain::ports::{
    BrokerChannel, BrokerConnection, BrokerTransport, ConnectionEvent, ConnectionListener,
    Delivery, DeliveryStream, ExchangeKind, OutboundMessage, QueueInfo,
};
use tracing::{debug, error, info};

/// Unacked deliveries the broker may push per consumer
const DEFAULT_PREFETCH: u16 = 1;

/// Reply code for a normal close
const REPLY_SUCCESS: u16 = 200;

/// Transport opening lapin connections
#[derive(Debug, Clone)]
pub struct AmqpBrokerTransport {
    connection_name: Option<String>,
    prefetch: u16,
}

impl AmqpBrokerTransport {
    /// Create a transport with default settings
    pub fn new() -> Self {
        Self {
            connection_name: None,
            prefetch: DEFAULT_PREFETCH,
        }
    }

    /// Name shown for connections in the RabbitMQ management UI
    #[must_use]
    pub fn with_connection_name<S: Into<String>>(mut self, name: S) -> Self {
        self.connection_name = Some(name.into());
        self
    }

    /// Override the per-consumer prefetch count
    #[must_use]
    pub fn with_prefetch(mut self, prefetch: u16) -> Self {
        self.prefetch = prefetch;
        self
    }
}

impl Default for AmqpBrokerTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrokerTransport for AmqpBrokerTransport {
    fn name(&self) -> &str {
        "amqp"
    }

    async fn connect(&self, url: &str) -> Result<Arc<dyn BrokerConnection>> {
        let mut properties = ConnectionProperties::default();
        if let Some(name) = &self.connection_name {
            properties = properties.with_connection_name(name.clone().into());
        }

        let connection = Connection::connect(url, properties)
            .await
            .map_err(|e| Error::connection_with_source("failed to open AMQP connection", e))?;
        Ok(Arc::new(AmqpConnection::new(connection, self.prefetch)))
    }
}

/// lapin connection with listener fan-out
pub struct AmqpConnection {
    inner: Connection,
    listeners: Arc<Mutex<Vec<ConnectionListener>>>,
    prefetch: u16,
}

impl AmqpConnection {
    fn new(inner: Connection, prefetch: u16) -> Self {
        let listeners: Arc<Mutex<Vec<ConnectionListener>>> = Arc::new(Mutex::new(Vec::new()));
        let fan_out = Arc::clone(&listeners);
        inner.on_error(move |err| {
            error!(error = %err, "AMQP connection error");
            let event = ConnectionEvent::Error(err.to_string());
            notify(&fan_out, &event);
        });
        Self {
            inner,
            listeners,
            prefetch,
        }
    }
}

fn notify(listeners: &Mutex<Vec<ConnectionListener>>, event: &ConnectionEvent) {
    let listeners = listeners
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();
    for listener in &listeners {
        listener(event);
    }
}

#[async_trait]
impl BrokerConnection for AmqpConnection {
    async fn create_channel(&self) -> Result<Arc<dyn BrokerChannel>> {
        let channel = self
            .inner
            .create_channel()
            .await
            .map_err(|e| Error::connection_with_source("failed to open AMQP channel", e))?;
        debug!(channel_id = channel.id(), "AMQP channel opened");
        Ok(Arc::new(AmqpChannel {
            inner: channel,
            prefetch: self.prefetch,
        }))
    }

    fn on_event(&self, listener: ConnectionListener) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    fn is_open(&self) -> bool {
        self.inner.status().connected()
    }

    async fn close(&self) -> Result<()> {
        if self.inner.status().connected() {
            self.inner
                .close(REPLY_SUCCESS, "Bye")
                .await
                .map_err(|e| Error::connection_with_source("failed to close AMQP connection", e))?;
            info!("AMQP connection closed");
        }
        notify(&self.listeners, &ConnectionEvent::Closed);
        Ok(())
    }
}

/// lapin channel
pub struct AmqpChannel {
    inner: Channel,
    prefetch: u16,
}

fn to_lapin_kind(kind: ExchangeKind) -> lapin::ExchangeKind {
    match kind {
        ExchangeKind::Topic => lapin::ExchangeKind::Topic,
        ExchangeKind::Direct => lapin::ExchangeKind::Direct,
        ExchangeKind::Fanout => lapin::ExchangeKind::Fanout,
    }
}

#[async_trait]
impl BrokerChannel for AmqpChannel {
    async fn declare_exchange(&self, name: &str, kind: ExchangeKind, durable: bool) -> Result<()> {
        self.inner
            .exchange_declare(
                name,
                to_lapin_kind(kind),
                ExchangeDeclareOptions {
                    durable,
                    ..ExchangeDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| Error::topology_with_source(format!("exchange.declare '{name}' failed"), e))
    }

    async fn declare_queue(&self, name: &str, durable: bool) -> Result<QueueInfo> {
        let queue = self
            .inner
            .queue_declare(
                name,
                QueueDeclareOptions {
                    durable,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| Error::topology_with_source(format!("queue.declare '{name}' failed"), e))?;
        Ok(QueueInfo {
            name: queue.name().as_str().to_string(),
            message_count: queue.message_count(),
            consumer_count: queue.consumer_count(),
        })
    }

    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<()> {
        self.inner
            .queue_bind(
                queue,
                exchange,
                routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                Error::topology_with_source(
                    format!("queue.bind '{queue}' -> '{exchange}' ({routing_key}) failed"),
                    e,
                )
            })
    }

    async fn publish(&self, message: &OutboundMessage) -> Result<()> {
        let properties = BasicProperties::default()
            .with_delivery_mode(message.delivery_mode.as_u8())
            .with_content_type(message.content_type.clone().into());

        let confirm = self
            .inner
            .basic_publish(
                &message.exchange,
                &message.routing_key,
                BasicPublishOptions::default(),
                &message.payload,
                properties,
            )
            .await
            .map_err(|e| Error::publish_with_source("basic.publish failed", e))?;
        let confirmation = confirm
            .await
            .map_err(|e| Error::publish_with_source("basic.publish not confirmed", e))?;
        if confirmation.is_nack() {
            return Err(Error::publish("broker nacked the message"));
        }
        Ok(())
    }

    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream> {
        self.inner
            .basic_qos(self.prefetch, BasicQosOptions::default())
            .await
            .map_err(|e| Error::connection_with_source("basic.qos failed", e))?;
        let consumer = self
            .inner
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| Error::connection_with_source(format!("basic.consume '{queue}' failed"), e))?;

        let deliveries = consumer.map(|item| {
            item.map(|delivery| Delivery {
                delivery_tag: delivery.delivery_tag,
                routing_key: delivery.routing_key.as_str().to_string(),
                redelivered: delivery.redelivered,
                payload: delivery.data,
            })
            .map_err(|e| Error::connection_with_source("AMQP delivery failed", e))
        });
        Ok(Box::pin(deliveries))
    }

    async fn ack(&self, delivery_tag: u64) -> Result<()> {
        self.inner
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|e| Error::infrastructure_with_source(format!("basic.ack {delivery_tag} failed"), e))
    }

    async fn reject(&self, delivery_tag: u64, requeue: bool) -> Result<()> {
        self.inner
            .basic_reject(delivery_tag, BasicRejectOptions { requeue })
            .await
            .map_err(|e| {
                Error::infrastructure_with_source(format!("basic.reject {delivery_tag} failed"), e)
            })
    }

    fn is_open(&self) -> bool {
        self.inner.status().connected()
    }

    async fn close(&self) -> Result<()> {
        if self.inner.status().connected() {
            self.inner
                .close(REPLY_SUCCESS, "Bye")
                .await
                .map_err(|e| Error::connection_with_source("failed to close AMQP channel", e))?;
        }
        Ok(())
    }
}
