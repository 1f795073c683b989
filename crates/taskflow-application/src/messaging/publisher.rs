//! Envelope Publisher
//!
//! Encodes an envelope and hands it to the broker as a persistent JSON
//! message. There is no retry: a message the broker does not accept is
//! reported to the caller as `Error::Publish` and nothing else happens.

use async_trait::async_trait;
use taskflow_domain::constants::ENVELOPE_CONTENT_TYPE;
use taskflow_domain::error::{Error, Result};
use taskflow_domain::events::EventEnvelope;
use taskflow_domain::ports::{DeliveryMode, EventPublisher, OutboundMessage, PublishAck};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::supervisor::ConnectionHandle;

/// Publishes envelopes to one exchange over a shared channel
pub struct BrokerPublisher {
    handle: ConnectionHandle,
    exchange: String,
    /// One logical send at a time on the shared channel
    send_lock: Mutex<()>,
}

impl BrokerPublisher {
    /// Create a publisher for `exchange` over `handle`'s channel
    pub fn new<S: Into<String>>(handle: ConnectionHandle, exchange: S) -> Self {
        Self {
            handle,
            exchange: exchange.into(),
            send_lock: Mutex::new(()),
        }
    }

    /// Exchange this publisher sends to
    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    /// Publish `envelope` under an explicit routing key
    pub async fn publish_to(&self, routing_key: &str, envelope: &EventEnvelope) -> Result<PublishAck> {
        let payload = envelope
            .encode()
            .map_err(|e| Error::publish_with_source("failed to encode envelope", e))?;
        let payload_bytes = payload.len();

        let channel = self
            .handle
            .channel()
            .map_err(|e| Error::publish_with_source("broker channel unusable", e))?;

        let message = OutboundMessage {
            exchange: self.exchange.clone(),
            routing_key: routing_key.to_string(),
            payload,
            delivery_mode: DeliveryMode::Persistent,
            content_type: ENVELOPE_CONTENT_TYPE.to_string(),
        };

        let sent = {
            let _guard = self.send_lock.lock().await;
            channel.publish(&message).await
        };

        if let Err(e) = sent {
            warn!(
                exchange = %self.exchange,
                routing_key,
                task_id = envelope.correlation_id(),
                error = %e,
                "Broker did not accept event"
            );
            return Err(match e {
                Error::Publish { .. } => e,
                other => Error::publish_with_source(
                    format!("failed to publish to '{}' with '{routing_key}'", self.exchange),
                    other,
                ),
            });
        }

        debug!(
            exchange = %self.exchange,
            routing_key,
            event_type = envelope.event_type(),
            task_id = envelope.correlation_id(),
            bytes = payload_bytes,
            "Published event"
        );
        Ok(PublishAck {
            exchange: self.exchange.clone(),
            routing_key: routing_key.to_string(),
            correlation_id: envelope.correlation_id().to_string(),
            payload_bytes,
        })
    }
}

#[async_trait]
impl EventPublisher for BrokerPublisher {
    async fn publish(&self, envelope: &EventEnvelope) -> Result<PublishAck> {
        self.publish_to(envelope.event_type(), envelope).await
    }
}

impl std::fmt::Debug for BrokerPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerPublisher")
            .field("exchange", &self.exchange)
            .field("connected", &self.handle.is_connected())
            .finish()
    }
}
