//! In-Memory Broker Provider
//!
//! Process-local broker with AMQP 0-9-1 semantics, used by tests and by
//! local runs without RabbitMQ.
//!
//! ## Behaviour
//!
//! - Exchange, queue and binding declarations are idempotent; redeclaring
//!   with different arguments fails with `PRECONDITION_FAILED` and closes
//!   the channel
//! - Topic, direct and fanout routing; unroutable messages are dropped
//! - Deliveries stay unacknowledged until acked or rejected; closing the
//!   channel requeues them as redelivered
//! - Rejected messages without requeue are kept for inspection via
//!   [`InMemoryBroker::dead_letters`]
//!
//! ## Fault injection
//!
//! | Method | Effect |
//! |--------|--------|
//! | [`set_reachable`](InMemoryBroker::set_reachable) | `connect` fails with `Error::Connection` |
//! | [`refuse_channels`](InMemoryBroker::refuse_channels) | `create_channel` fails |
//! | [`fail_publishes`](InMemoryBroker::fail_publishes) | `publish` fails with `Error::Publish` |
//! | [`fail_settlements`](InMemoryBroker::fail_settlements) | `ack` / `reject` fail |
//! | [`drop_connections`](InMemoryBroker::drop_connections) | Broker-side close of every connection |

use async_trait::async_trait;
use futures::stream;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use taskflow_domain::error::{Error, Result};
use taskflow_domain::ports::{
    BrokerChannel, BrokerConnection, BrokerTransport, ConnectionEvent, ConnectionListener,
    Delivery, DeliveryStream, ExchangeKind, OutboundMessage, QueueInfo,
};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::topic::topic_matches;

/// Reason reported to connection listeners by [`InMemoryBroker::drop_connections`]
const FORCED_CLOSE_REASON: &str = "CONNECTION_FORCED - broker forced connection closure";

/// A queue bound to an exchange under a routing key
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Binding {
    /// Source exchange
    pub exchange: String,
    /// Destination queue
    pub queue: String,
    /// Binding key
    pub routing_key: String,
}

/// A message rejected without requeue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedMessage {
    /// Routing key it was published with
    pub routing_key: String,
    /// Message body
    pub payload: Vec<u8>,
    /// Whether it had been delivered before the final rejection
    pub redelivered: bool,
}

#[derive(Debug, Clone)]
struct StoredMessage {
    routing_key: String,
    payload: Vec<u8>,
    redelivered: bool,
}

#[derive(Debug, Clone, Copy)]
struct ExchangeDecl {
    kind: ExchangeKind,
    durable: bool,
}

struct ConsumerSlot {
    channel_id: u64,
    tag: String,
    sender: mpsc::UnboundedSender<Result<Delivery>>,
}

struct Unacked {
    channel_id: u64,
    message: StoredMessage,
}

#[derive(Default)]
struct QueueState {
    durable: bool,
    ready: VecDeque<StoredMessage>,
    unacked: BTreeMap<u64, Unacked>,
    consumers: Vec<ConsumerSlot>,
    next_consumer: usize,
    acked: u64,
    dead_letters: Vec<RejectedMessage>,
}

#[derive(Debug, Default)]
struct Faults {
    unreachable: bool,
    refuse_channels: bool,
    fail_publishes: bool,
    fail_settlements: bool,
}

enum Settlement {
    Ack,
    Reject { requeue: bool },
}

#[derive(Default)]
struct BrokerState {
    exchanges: HashMap<String, ExchangeDecl>,
    queues: HashMap<String, QueueState>,
    bindings: BTreeSet<Binding>,
    /// Delivery tag to the queue holding the unacked message
    delivery_queues: HashMap<u64, String>,
    next_delivery_tag: u64,
    next_channel_id: u64,
    next_generated_queue: u64,
    published: u64,
    unroutable: u64,
    faults: Faults,
}

impl BrokerState {
    fn route(&mut self, message: &OutboundMessage) -> Result<usize> {
        let targets: BTreeSet<String> = if message.exchange.is_empty() {
            // Default exchange: routing key names the queue
            self.queues
                .contains_key(&message.routing_key)
                .then(|| message.routing_key.clone())
                .into_iter()
                .collect()
        } else {
            let kind = self
                .exchanges
                .get(&message.exchange)
                .map(|decl| decl.kind)
                .ok_or_else(|| {
                    Error::publish(format!("NOT_FOUND - no exchange '{}'", message.exchange))
                })?;
            self.bindings
                .iter()
                .filter(|binding| binding.exchange == message.exchange)
                .filter(|binding| match kind {
                    ExchangeKind::Topic => topic_matches(&binding.routing_key, &message.routing_key),
                    ExchangeKind::Direct => binding.routing_key == message.routing_key,
                    ExchangeKind::Fanout => true,
                })
                .map(|binding| binding.queue.clone())
                .collect()
        };

        self.published += 1;
        if targets.is_empty() {
            self.unroutable += 1;
            debug!(
                exchange = %message.exchange,
                routing_key = %message.routing_key,
                "Message unroutable, dropped"
            );
            return Ok(0);
        }

        for name in &targets {
            if let Some(queue) = self.queues.get_mut(name) {
                queue.ready.push_back(StoredMessage {
                    routing_key: message.routing_key.clone(),
                    payload: message.payload.clone(),
                    redelivered: false,
                });
            }
            self.dispatch(name);
        }
        Ok(targets.len())
    }

    /// Push ready messages to consumers round-robin
    fn dispatch(&mut self, queue_name: &str) {
        let Some(queue) = self.queues.get_mut(queue_name) else {
            return;
        };
        while !queue.consumers.is_empty() {
            let Some(message) = queue.ready.pop_front() else {
                break;
            };
            let index = queue.next_consumer % queue.consumers.len();
            self.next_delivery_tag += 1;
            let tag = self.next_delivery_tag;
            let delivery = Delivery {
                delivery_tag: tag,
                routing_key: message.routing_key.clone(),
                redelivered: message.redelivered,
                payload: message.payload.clone(),
            };

            let slot = &queue.consumers[index];
            if slot.sender.send(Ok(delivery)).is_err() {
                debug!(queue = queue_name, consumer_tag = %slot.tag, "Consumer gone, removing");
                queue.consumers.remove(index);
                queue.ready.push_front(message);
                continue;
            }
            let channel_id = slot.channel_id;
            queue.unacked.insert(tag, Unacked { channel_id, message });
            self.delivery_queues.insert(tag, queue_name.to_string());
            queue.next_consumer = index + 1;
        }
    }

    fn settle(&mut self, channel_id: u64, tag: u64, settlement: Settlement) -> Result<()> {
        let unknown = || Error::infrastructure(format!("PRECONDITION_FAILED - unknown delivery tag {tag}"));
        let queue_name = self.delivery_queues.get(&tag).cloned().ok_or_else(unknown)?;
        let queue = self.queues.get_mut(&queue_name).ok_or_else(unknown)?;
        if queue.unacked.get(&tag).is_none_or(|entry| entry.channel_id != channel_id) {
            return Err(unknown());
        }
        let Some(entry) = queue.unacked.remove(&tag) else {
            return Err(unknown());
        };
        self.delivery_queues.remove(&tag);

        match settlement {
            Settlement::Ack => queue.acked += 1,
            Settlement::Reject { requeue: true } => {
                let mut message = entry.message;
                message.redelivered = true;
                queue.ready.push_front(message);
                self.dispatch(&queue_name);
            }
            Settlement::Reject { requeue: false } => {
                queue.dead_letters.push(RejectedMessage {
                    routing_key: entry.message.routing_key,
                    payload: entry.message.payload,
                    redelivered: entry.message.redelivered,
                });
            }
        }
        Ok(())
    }

    /// Drop a channel's consumers and requeue its unacked deliveries
    fn release_channel(&mut self, channel_id: u64) {
        let names: Vec<String> = self.queues.keys().cloned().collect();
        for name in names {
            if let Some(queue) = self.queues.get_mut(&name) {
                queue.consumers.retain(|slot| slot.channel_id != channel_id);
                let tags: Vec<u64> = queue
                    .unacked
                    .iter()
                    .filter(|(_, entry)| entry.channel_id == channel_id)
                    .map(|(tag, _)| *tag)
                    .collect();
                for tag in tags.into_iter().rev() {
                    if let Some(entry) = queue.unacked.remove(&tag) {
                        let mut message = entry.message;
                        message.redelivered = true;
                        queue.ready.push_front(message);
                    }
                    self.delivery_queues.remove(&tag);
                }
            }
            self.dispatch(&name);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-process broker; clones share the same state
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    connections: Arc<Mutex<Vec<Arc<InMemoryConnection>>>>,
}

impl InMemoryBroker {
    /// Create an empty, reachable broker
    pub fn new() -> Self {
        Self::default()
    }

    // === Fault injection ===

    /// Make `connect` succeed or fail
    pub fn set_reachable(&self, reachable: bool) {
        lock(&self.state).faults.unreachable = !reachable;
    }

    /// Make `create_channel` fail
    pub fn refuse_channels(&self, refuse: bool) {
        lock(&self.state).faults.refuse_channels = refuse;
    }

    /// Make every publish fail as if the broker's buffer were full
    pub fn fail_publishes(&self, fail: bool) {
        lock(&self.state).faults.fail_publishes = fail;
    }

    /// Make every ack and reject fail, leaving the channel open
    pub fn fail_settlements(&self, fail: bool) {
        lock(&self.state).faults.fail_settlements = fail;
    }

    /// Close every open connection from the broker side
    ///
    /// Listeners receive `ConnectionEvent::Error` followed by
    /// `ConnectionEvent::Closed`; unacked deliveries are requeued.
    pub fn drop_connections(&self) {
        let connections = std::mem::take(&mut *lock(&self.connections));
        warn!(count = connections.len(), "Dropping all broker connections");
        for connection in connections {
            connection.terminate(Some(FORCED_CLOSE_REASON));
        }
    }

    // === Inspection ===

    /// Number of declared exchanges
    pub fn exchange_count(&self) -> usize {
        lock(&self.state).exchanges.len()
    }

    /// Type of a declared exchange
    pub fn exchange_kind(&self, name: &str) -> Option<ExchangeKind> {
        lock(&self.state).exchanges.get(name).map(|decl| decl.kind)
    }

    /// Declared queue names, sorted
    pub fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.state).queues.keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// Whether a declared queue is durable
    pub fn queue_is_durable(&self, name: &str) -> Option<bool> {
        lock(&self.state).queues.get(name).map(|queue| queue.durable)
    }

    /// All bindings, sorted
    pub fn bindings(&self) -> Vec<Binding> {
        lock(&self.state).bindings.iter().cloned().collect()
    }

    /// Number of bindings
    pub fn binding_count(&self) -> usize {
        lock(&self.state).bindings.len()
    }

    /// Messages waiting for a consumer
    pub fn ready_count(&self, queue: &str) -> usize {
        lock(&self.state).queues.get(queue).map_or(0, |q| q.ready.len())
    }

    /// Messages delivered but not yet settled
    pub fn unacked_count(&self, queue: &str) -> usize {
        lock(&self.state).queues.get(queue).map_or(0, |q| q.unacked.len())
    }

    /// Messages positively acknowledged
    pub fn acked_count(&self, queue: &str) -> u64 {
        lock(&self.state).queues.get(queue).map_or(0, |q| q.acked)
    }

    /// Messages rejected without requeue
    pub fn dead_letters(&self, queue: &str) -> Vec<RejectedMessage> {
        lock(&self.state)
            .queues
            .get(queue)
            .map(|q| q.dead_letters.clone())
            .unwrap_or_default()
    }

    /// Active consumers on a queue
    pub fn consumer_count(&self, queue: &str) -> usize {
        lock(&self.state).queues.get(queue).map_or(0, |q| q.consumers.len())
    }

    /// Messages accepted by the broker, routed or not
    pub fn published_count(&self) -> u64 {
        lock(&self.state).published
    }

    /// Accepted messages that matched no binding
    pub fn unroutable_count(&self) -> u64 {
        lock(&self.state).unroutable
    }

    /// Connections the broker still tracks; closed ones are pruned on connect
    pub fn tracked_connection_count(&self) -> usize {
        lock(&self.connections).len()
    }

    /// Connections currently open
    pub fn open_connection_count(&self) -> usize {
        lock(&self.connections)
            .iter()
            .filter(|connection| connection.is_open())
            .count()
    }
}

impl std::fmt::Debug for InMemoryBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("InMemoryBroker")
            .field("exchanges", &state.exchanges.len())
            .field("queues", &state.queues.len())
            .field("bindings", &state.bindings.len())
            .field("faults", &state.faults)
            .finish()
    }
}

#[async_trait]
impl BrokerTransport for InMemoryBroker {
    fn name(&self) -> &str {
        "memory"
    }

    async fn connect(&self, _url: &str) -> Result<Arc<dyn BrokerConnection>> {
        if lock(&self.state).faults.unreachable {
            return Err(Error::connection("connection refused: broker unreachable"));
        }
        let connection = Arc::new(InMemoryConnection {
            state: Arc::clone(&self.state),
            open: Arc::new(AtomicBool::new(true)),
            listeners: Mutex::new(Vec::new()),
            channels: Mutex::new(Vec::new()),
        });
        let mut connections = lock(&self.connections);
        connections.retain(|open| open.is_open());
        connections.push(Arc::clone(&connection));
        drop(connections);
        debug!("In-memory broker connection opened");
        Ok(connection)
    }
}

/// Connection to an [`InMemoryBroker`]
pub struct InMemoryConnection {
    state: Arc<Mutex<BrokerState>>,
    open: Arc<AtomicBool>,
    listeners: Mutex<Vec<ConnectionListener>>,
    channels: Mutex<Vec<Arc<InMemoryChannel>>>,
}

impl InMemoryConnection {
    /// Close channels and notify listeners; only the first call does anything
    fn terminate(&self, reason: Option<&str>) {
        if !self.open.swap(false, Ordering::AcqRel) {
            return;
        }
        let channels = std::mem::take(&mut *lock(&self.channels));
        for channel in channels {
            channel.shutdown();
        }
        let listeners = lock(&self.listeners).clone();
        if let Some(reason) = reason {
            let event = ConnectionEvent::Error(reason.to_string());
            for listener in &listeners {
                listener(&event);
            }
        }
        for listener in &listeners {
            listener(&ConnectionEvent::Closed);
        }
    }
}

#[async_trait]
impl BrokerConnection for InMemoryConnection {
    async fn create_channel(&self) -> Result<Arc<dyn BrokerChannel>> {
        if !self.is_open() {
            return Err(Error::connection("connection is closed"));
        }
        let id = {
            let mut state = lock(&self.state);
            if state.faults.refuse_channels {
                return Err(Error::connection("channel open refused by broker"));
            }
            state.next_channel_id += 1;
            state.next_channel_id
        };
        let channel = Arc::new(InMemoryChannel {
            id,
            state: Arc::clone(&self.state),
            open: AtomicBool::new(true),
            connection_open: Arc::clone(&self.open),
        });
        lock(&self.channels).push(Arc::clone(&channel));
        debug!(channel_id = id, "In-memory channel opened");
        Ok(channel)
    }

    fn on_event(&self, listener: ConnectionListener) {
        lock(&self.listeners).push(listener);
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    async fn close(&self) -> Result<()> {
        self.terminate(None);
        Ok(())
    }
}

/// Channel on an [`InMemoryConnection`]
pub struct InMemoryChannel {
    id: u64,
    state: Arc<Mutex<BrokerState>>,
    open: AtomicBool,
    connection_open: Arc<AtomicBool>,
}

impl InMemoryChannel {
    fn ensure_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(Error::connection(format!("channel {} is closed", self.id)))
        }
    }

    /// Close the channel because of a channel-level protocol error
    fn fail(&self, state: &mut BrokerState, error: Error) -> Error {
        self.open.store(false, Ordering::Release);
        state.release_channel(self.id);
        warn!(channel_id = self.id, error = %error, "Channel closed by broker");
        error
    }

    fn shutdown(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            lock(&self.state).release_channel(self.id);
            debug!(channel_id = self.id, "In-memory channel closed");
        }
    }
}

#[async_trait]
impl BrokerChannel for InMemoryChannel {
    async fn declare_exchange(&self, name: &str, kind: ExchangeKind, durable: bool) -> Result<()> {
        self.ensure_open()?;
        let mut state = lock(&self.state);
        if name.is_empty() {
            let error = Error::topology("ACCESS_REFUSED - the default exchange cannot be declared");
            return Err(self.fail(&mut state, error));
        }
        match state.exchanges.get(name).copied() {
            Some(existing) if existing.kind != kind || existing.durable != durable => {
                let error = Error::topology(format!(
                    "PRECONDITION_FAILED - inequivalent arguments for exchange '{name}': \
                     declared {} durable={}, requested {kind} durable={durable}",
                    existing.kind, existing.durable
                ));
                Err(self.fail(&mut state, error))
            }
            Some(_) => Ok(()),
            None => {
                state.exchanges.insert(name.to_string(), ExchangeDecl { kind, durable });
                Ok(())
            }
        }
    }

    async fn declare_queue(&self, name: &str, durable: bool) -> Result<QueueInfo> {
        self.ensure_open()?;
        let mut state = lock(&self.state);
        let name = if name.is_empty() {
            state.next_generated_queue += 1;
            format!("amq.gen-{}", state.next_generated_queue)
        } else {
            name.to_string()
        };

        if let Some(existing) = state.queues.get(&name).map(|queue| queue.durable)
            && existing != durable
        {
            let error = Error::topology(format!(
                "PRECONDITION_FAILED - inequivalent arg 'durable' for queue '{name}': \
                 declared {existing}, requested {durable}"
            ));
            return Err(self.fail(&mut state, error));
        }

        let queue = state.queues.entry(name.clone()).or_insert_with(|| QueueState {
            durable,
            ..QueueState::default()
        });
        Ok(QueueInfo {
            message_count: u32::try_from(queue.ready.len()).unwrap_or(u32::MAX),
            consumer_count: u32::try_from(queue.consumers.len()).unwrap_or(u32::MAX),
            name,
        })
    }

    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<()> {
        self.ensure_open()?;
        let mut state = lock(&self.state);
        if !state.exchanges.contains_key(exchange) {
            let error = Error::topology(format!("NOT_FOUND - no exchange '{exchange}'"));
            return Err(self.fail(&mut state, error));
        }
        if !state.queues.contains_key(queue) {
            let error = Error::topology(format!("NOT_FOUND - no queue '{queue}'"));
            return Err(self.fail(&mut state, error));
        }
        state.bindings.insert(Binding {
            exchange: exchange.to_string(),
            queue: queue.to_string(),
            routing_key: routing_key.to_string(),
        });
        Ok(())
    }

    async fn publish(&self, message: &OutboundMessage) -> Result<()> {
        self.ensure_open()?;
        let mut state = lock(&self.state);
        if state.faults.fail_publishes {
            return Err(Error::publish("broker refused message: write buffer full"));
        }
        match state.route(message) {
            Ok(queues) => {
                debug!(
                    exchange = %message.exchange,
                    routing_key = %message.routing_key,
                    queues,
                    "Message routed"
                );
                Ok(())
            }
            Err(e) => Err(self.fail(&mut state, e)),
        }
    }

    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream> {
        self.ensure_open()?;
        let mut state = lock(&self.state);
        if !state.queues.contains_key(queue) {
            let error = Error::not_found(format!("queue '{queue}'"));
            return Err(self.fail(&mut state, error));
        }
        let (sender, receiver) = mpsc::unbounded_channel();
        if let Some(entry) = state.queues.get_mut(queue) {
            entry.consumers.push(ConsumerSlot {
                channel_id: self.id,
                tag: consumer_tag.to_string(),
                sender,
            });
        }
        state.dispatch(queue);

        let deliveries = stream::unfold(receiver, |mut rx| async move {
            rx.recv().await.map(|delivery| (delivery, rx))
        });
        Ok(Box::pin(deliveries))
    }

    async fn ack(&self, delivery_tag: u64) -> Result<()> {
        self.ensure_open()?;
        let mut state = lock(&self.state);
        if state.faults.fail_settlements {
            return Err(Error::infrastructure("broker did not take the acknowledgement"));
        }
        state
            .settle(self.id, delivery_tag, Settlement::Ack)
            .map_err(|e| self.fail(&mut state, e))
    }

    async fn reject(&self, delivery_tag: u64, requeue: bool) -> Result<()> {
        self.ensure_open()?;
        let mut state = lock(&self.state);
        if state.faults.fail_settlements {
            return Err(Error::infrastructure("broker did not take the rejection"));
        }
        state
            .settle(self.id, delivery_tag, Settlement::Reject { requeue })
            .map_err(|e| self.fail(&mut state, e))
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && self.connection_open.load(Ordering::Acquire)
    }

    async fn close(&self) -> Result<()> {
        self.shutdown();
        Ok(())
    }
}
