//! Broker Topology Manager
//!
//! Declares the durable topic exchange, the durable queue and the binding
//! between them. Every step is a declaration, so running it again with the
//! same arguments leaves the same topology and does not fail.

use taskflow_domain::error::{Error, Result};
use taskflow_domain::ports::{BrokerChannel, ExchangeKind};
use tracing::{debug, info};

/// Outcome of a successful topology declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyHandle {
    /// Declared exchange
    pub exchange: String,
    /// Declared queue
    pub queue: String,
    /// Routing key binding the queue to the exchange
    pub routing_key: String,
    /// Ready messages in the queue at declaration time
    pub message_count: u32,
    /// Consumers attached at declaration time
    pub consumer_count: u32,
}

/// Declare the durable topic exchange only
///
/// Used by producers, which never own queues.
pub async fn ensure_exchange(channel: &dyn BrokerChannel, exchange: &str) -> Result<()> {
    channel
        .declare_exchange(exchange, ExchangeKind::Topic, true)
        .await
        .map_err(|e| as_topology_error(format!("failed to declare exchange '{exchange}'"), e))?;
    info!(exchange, kind = %ExchangeKind::Topic, "Exchange ready");
    Ok(())
}

/// Declare exchange, queue and binding; any failure aborts the whole call
pub async fn ensure_topology(
    channel: &dyn BrokerChannel,
    exchange: &str,
    queue: &str,
    routing_key: &str,
) -> Result<TopologyHandle> {
    ensure_exchange(channel, exchange).await?;

    let info = channel
        .declare_queue(queue, true)
        .await
        .map_err(|e| as_topology_error(format!("failed to declare queue '{queue}'"), e))?;
    info!(
        queue = %info.name,
        messages = info.message_count,
        consumers = info.consumer_count,
        "Queue ready"
    );

    channel
        .bind_queue(&info.name, exchange, routing_key)
        .await
        .map_err(|e| {
            as_topology_error(
                format!("failed to bind queue '{queue}' to '{exchange}' with '{routing_key}'"),
                e,
            )
        })?;
    info!(queue = %info.name, exchange, routing_key, "Queue bound to exchange");

    debug!(exchange, queue, routing_key, "Topology ensured");
    Ok(TopologyHandle {
        exchange: exchange.to_string(),
        queue: info.name,
        routing_key: routing_key.to_string(),
        message_count: info.message_count,
        consumer_count: info.consumer_count,
    })
}

fn as_topology_error(context: String, error: Error) -> Error {
    match error {
        Error::Topology { .. } => error,
        other => Error::topology_with_source(context, other),
    }
}
