//! Consumer Loop
//!
//! Subscribes to a queue and resolves every delivery to exactly one
//! acknowledgement or rejection:
//!
//! ```text
//! Received ──no string `type`───────────────────────► Rejected (no requeue)
//!    │
//!    ▼
//! Typed ──no handler for event type────────────────► Acknowledged (ignored)
//!    │
//!    ▼
//! Decoded ──invalid envelope───────────────────────► Rejected (no requeue)
//!    │
//!    ▼
//! Dispatched ──handler Ok──────────────────────────► Acknowledged
//!            └─handler Err / panic─────────────────► Rejected (no requeue)
//! ```
//!
//! Deliveries are processed one at a time in delivery order. A failed
//! ack/reject is logged and the loop moves on, unless the channel itself has
//! closed, in which case [`ConsumerLoop::run`] returns `Error::Connection`.

use futures::{FutureExt, StreamExt};
use serde::Serialize;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use taskflow_domain::error::{Error, Result};
use taskflow_domain::events::EventEnvelope;
use taskflow_domain::ports::{BrokerChannel, Delivery, SharedEventHandler};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::supervisor::ConnectionHandle;

/// Default consumer tag announced to the broker
const DEFAULT_CONSUMER_TAG: &str = "taskflow-consumer";

/// Handlers keyed by the event type they process
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, SharedEventHandler>,
}

impl HandlerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `event_type`, replacing any previous one
    pub fn register<S: Into<String>>(&mut self, event_type: S, handler: SharedEventHandler) {
        let event_type = event_type.into();
        if self.handlers.insert(event_type.clone(), handler).is_some() {
            warn!(event_type = %event_type, "Replaced existing event handler");
        }
    }

    /// Builder-style [`register`](Self::register)
    #[must_use]
    pub fn with_handler<S: Into<String>>(mut self, event_type: S, handler: SharedEventHandler) -> Self {
        self.register(event_type, handler);
        self
    }

    /// Handler for `event_type`, if any
    pub fn get(&self, event_type: &str) -> Option<&SharedEventHandler> {
        self.handlers.get(event_type)
    }

    /// Registered event types, sorted
    pub fn event_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    /// Number of registered handlers
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handler is registered
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("event_types", &self.event_types())
            .finish()
    }
}

/// How a single delivery was resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Handler succeeded; acknowledge
    Acknowledged {
        /// Event type of the message
        event_type: String,
    },
    /// No handler for this event type; acknowledge without processing
    Ignored {
        /// Event type of the message
        event_type: String,
    },
    /// Body is not a valid envelope; reject without requeue
    RejectedMalformed {
        /// Decode failure
        reason: String,
    },
    /// Handler failed; reject without requeue
    RejectedByHandler {
        /// Event type of the message
        event_type: String,
        /// Handler failure
        reason: String,
    },
}

impl MessageOutcome {
    /// Whether the delivery should be acknowledged
    pub fn is_ack(&self) -> bool {
        matches!(self, Self::Acknowledged { .. } | Self::Ignored { .. })
    }
}

/// Snapshot of a consumer loop's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerStats {
    /// Deliveries received
    pub received: u64,
    /// Deliveries acknowledged after a successful handler
    pub acknowledged: u64,
    /// Deliveries acknowledged because no handler matched
    pub ignored: u64,
    /// Deliveries rejected because they failed to decode
    pub rejected_malformed: u64,
    /// Deliveries rejected because the handler failed
    pub rejected_by_handler: u64,
    /// Acks or rejects the broker did not take
    pub settle_failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    received: AtomicU64,
    acknowledged: AtomicU64,
    ignored: AtomicU64,
    rejected_malformed: AtomicU64,
    rejected_by_handler: AtomicU64,
    settle_failures: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> ConsumerStats {
        ConsumerStats {
            received: self.received.load(Ordering::Relaxed),
            acknowledged: self.acknowledged.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            rejected_malformed: self.rejected_malformed.load(Ordering::Relaxed),
            rejected_by_handler: self.rejected_by_handler.load(Ordering::Relaxed),
            settle_failures: self.settle_failures.load(Ordering::Relaxed),
        }
    }

    fn record(&self, outcome: &MessageOutcome) {
        let counter = match outcome {
            MessageOutcome::Acknowledged { .. } => &self.acknowledged,
            MessageOutcome::Ignored { .. } => &self.ignored,
            MessageOutcome::RejectedMalformed { .. } => &self.rejected_malformed,
            MessageOutcome::RejectedByHandler { .. } => &self.rejected_by_handler,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Long-lived subscription dispatching envelopes to registered handlers
pub struct ConsumerLoop {
    registry: HandlerRegistry,
    consumer_tag: String,
    counters: Arc<Counters>,
}

impl ConsumerLoop {
    /// Create a loop dispatching to `registry`
    pub fn new(registry: HandlerRegistry) -> Self {
        Self {
            registry,
            consumer_tag: DEFAULT_CONSUMER_TAG.to_string(),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Override the consumer tag announced to the broker
    #[must_use]
    pub fn with_consumer_tag<S: Into<String>>(mut self, consumer_tag: S) -> Self {
        self.consumer_tag = consumer_tag.into();
        self
    }

    /// Current counters
    pub fn stats(&self) -> ConsumerStats {
        self.counters.snapshot()
    }

    /// Decode and dispatch one message body, without settling it
    pub async fn process(&self, payload: &[u8]) -> MessageOutcome {
        self.counters.received.fetch_add(1, Ordering::Relaxed);

        let event_type = match EventEnvelope::peek_event_type(payload) {
            Ok(event_type) => event_type,
            Err(e) => {
                warn!(error = %e, bytes = payload.len(), "Rejecting malformed message");
                return MessageOutcome::RejectedMalformed {
                    reason: e.to_string(),
                };
            }
        };

        let Some(handler) = self.registry.get(&event_type) else {
            info!(event_type = %event_type, "No handler for event type, acknowledging");
            return MessageOutcome::Ignored { event_type };
        };

        let envelope = match EventEnvelope::decode(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(event_type = %event_type, error = %e, bytes = payload.len(), "Rejecting malformed message");
                return MessageOutcome::RejectedMalformed {
                    reason: e.to_string(),
                };
            }
        };
        debug!(event_type = %event_type, task_id = envelope.correlation_id(), "Received event");

        let result = AssertUnwindSafe(handler.handle(&envelope))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(Error::handler("event handler panicked")));

        match result {
            Ok(()) => MessageOutcome::Acknowledged { event_type },
            Err(e) => {
                error!(
                    event_type = %event_type,
                    task_id = envelope.correlation_id(),
                    error = %e,
                    "Event handler failed"
                );
                MessageOutcome::RejectedByHandler {
                    event_type,
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Consume `queue` until `shutdown` is cancelled or the channel closes
    ///
    /// Cancellation is only observed between deliveries, so an in-flight
    /// handler always runs to completion and is settled before returning.
    pub async fn run(
        &self,
        handle: &ConnectionHandle,
        queue: &str,
        shutdown: CancellationToken,
    ) -> Result<ConsumerStats> {
        let channel = handle.channel()?;
        let mut deliveries = channel
            .consume(queue, &self.consumer_tag)
            .await
            .map_err(|e| Error::connection_with_source(format!("failed to consume '{queue}'"), e))?;
        info!(queue, consumer_tag = %self.consumer_tag, handlers = ?self.registry.event_types(), "Started consuming");

        loop {
            let next = tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    info!(queue, "Consumer shutdown requested");
                    break;
                }
                next = deliveries.next() => next,
            };

            let delivery = match next {
                Some(Ok(delivery)) => delivery,
                Some(Err(e)) => {
                    if !channel.is_open() {
                        error!(queue, error = %e, "Broker channel closed, stopping consumer");
                        return Err(Error::connection_with_source(
                            format!("channel closed while consuming '{queue}'"),
                            e,
                        ));
                    }
                    warn!(queue, error = %e, "Delivery error");
                    continue;
                }
                None => {
                    error!(queue, "Delivery stream ended, stopping consumer");
                    return Err(Error::connection(format!(
                        "delivery stream for '{queue}' ended"
                    )));
                }
            };

            let outcome = self.process(&delivery.payload).await;
            if let Err(e) = self.settle(channel.as_ref(), &delivery, &outcome).await
                && !channel.is_open()
            {
                return Err(Error::connection_with_source(
                    format!("channel closed while settling delivery on '{queue}'"),
                    e,
                ));
            }
        }

        let stats = self.stats();
        info!(queue, ?stats, "Stopped consuming");
        Ok(stats)
    }

    async fn settle(
        &self,
        channel: &dyn BrokerChannel,
        delivery: &Delivery,
        outcome: &MessageOutcome,
    ) -> Result<()> {
        let tag = delivery.delivery_tag;
        let settled = if outcome.is_ack() {
            channel.ack(tag).await
        } else {
            channel.reject(tag, false).await
        };

        match settled {
            Ok(()) => {
                self.counters.record(outcome);
                match outcome {
                    MessageOutcome::Acknowledged { event_type } => {
                        info!(delivery_tag = tag, event_type = %event_type, "Event processed");
                    }
                    MessageOutcome::Ignored { .. } => {
                        debug!(delivery_tag = tag, "Unhandled event acknowledged");
                    }
                    MessageOutcome::RejectedMalformed { .. }
                    | MessageOutcome::RejectedByHandler { .. } => {
                        warn!(
                            delivery_tag = tag,
                            redelivered = delivery.redelivered,
                            "Message rejected without requeue"
                        );
                    }
                }
                Ok(())
            }
            Err(e) => {
                self.counters.settle_failures.fetch_add(1, Ordering::Relaxed);
                error!(delivery_tag = tag, ack = outcome.is_ack(), error = %e, "Failed to settle delivery");
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for ConsumerLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerLoop")
            .field("consumer_tag", &self.consumer_tag)
            .field("registry", &self.registry)
            .field("stats", &self.stats())
            .finish()
    }
}
