//! Tests for the in-memory broker

use futures::StreamExt;
use std::sync::{Arc, Mutex};
use taskflow_domain::ports::{
    BrokerChannel, BrokerConnection, BrokerTransport, ConnectionEvent, DeliveryMode, ExchangeKind,
    OutboundMessage,
};
use taskflow_domain::Error;
use taskflow_providers::{Binding, InMemoryBroker};

fn message(exchange: &str, routing_key: &str, body: &str) -> OutboundMessage {
    OutboundMessage {
        exchange: exchange.to_string(),
        routing_key: routing_key.to_string(),
        payload: body.as_bytes().to_vec(),
        delivery_mode: DeliveryMode::Persistent,
        content_type: "application/json".to_string(),
    }
}

async fn open_channel(broker: &InMemoryBroker) -> (Arc<dyn BrokerConnection>, Arc<dyn BrokerChannel>) {
    let connection = broker.connect("amqp://localhost").await.unwrap();
    let channel = connection.create_channel().await.unwrap();
    (connection, channel)
}

async fn declare_task_topology(channel: &dyn BrokerChannel) {
    channel
        .declare_exchange("task.events", ExchangeKind::Topic, true)
        .await
        .unwrap();
    channel.declare_queue("notifications", true).await.unwrap();
    channel
        .bind_queue("notifications", "task.events", "task.*")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_declarations_are_idempotent() {
    let broker = InMemoryBroker::new();
    let (_conn, channel) = open_channel(&broker).await;

    declare_task_topology(channel.as_ref()).await;
    declare_task_topology(channel.as_ref()).await;

    assert_eq!(broker.exchange_count(), 1);
    assert_eq!(broker.exchange_kind("task.events"), Some(ExchangeKind::Topic));
    assert_eq!(broker.queue_names(), vec!["notifications".to_string()]);
    assert_eq!(broker.queue_is_durable("notifications"), Some(true));
    assert_eq!(
        broker.bindings(),
        vec![Binding {
            exchange: "task.events".to_string(),
            queue: "notifications".to_string(),
            routing_key: "task.*".to_string(),
        }]
    );
    assert!(channel.is_open());
}

#[tokio::test]
async fn test_inequivalent_redeclare_fails_and_closes_channel() {
    let broker = InMemoryBroker::new();
    let (_conn, channel) = open_channel(&broker).await;
    channel
        .declare_exchange("task.events", ExchangeKind::Topic, true)
        .await
        .unwrap();

    let err = channel
        .declare_exchange("task.events", ExchangeKind::Direct, true)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Topology { .. }));
    assert!(err.to_string().contains("PRECONDITION_FAILED"));
    assert!(!channel.is_open());
    assert_eq!(broker.exchange_kind("task.events"), Some(ExchangeKind::Topic));
}

#[tokio::test]
async fn test_bind_to_missing_exchange_fails() {
    let broker = InMemoryBroker::new();
    let (_conn, channel) = open_channel(&broker).await;
    channel.declare_queue("q", true).await.unwrap();

    let err = channel.bind_queue("q", "nope", "#").await.unwrap_err();

    assert!(matches!(err, Error::Topology { .. }));
    assert_eq!(broker.binding_count(), 0);
}

#[tokio::test]
async fn test_topic_routing_and_unroutable_messages() {
    let broker = InMemoryBroker::new();
    let (_conn, channel) = open_channel(&broker).await;
    declare_task_topology(channel.as_ref()).await;

    channel
        .publish(&message("task.events", "task.created", "{}"))
        .await
        .unwrap();
    channel
        .publish(&message("task.events", "user.created", "{}"))
        .await
        .unwrap();

    assert_eq!(broker.published_count(), 2);
    assert_eq!(broker.unroutable_count(), 1);
    assert_eq!(broker.ready_count("notifications"), 1);
}

#[tokio::test]
async fn test_publish_to_missing_exchange_fails() {
    let broker = InMemoryBroker::new();
    let (_conn, channel) = open_channel(&broker).await;

    let err = channel
        .publish(&message("missing", "task.created", "{}"))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Publish { .. }));
    assert!(!channel.is_open());
}

#[tokio::test]
async fn test_consume_ack_and_reject() {
    let broker = InMemoryBroker::new();
    let (_conn, channel) = open_channel(&broker).await;
    declare_task_topology(channel.as_ref()).await;
    for body in ["one", "two"] {
        channel
            .publish(&message("task.events", "task.created", body))
            .await
            .unwrap();
    }

    let mut deliveries = channel.consume("notifications", "test").await.unwrap();
    let first = deliveries.next().await.unwrap().unwrap();
    let second = deliveries.next().await.unwrap().unwrap();
    assert_eq!(first.payload, b"one");
    assert_eq!(second.payload, b"two");
    assert!(!first.redelivered);
    assert_eq!(broker.unacked_count("notifications"), 2);

    channel.ack(first.delivery_tag).await.unwrap();
    channel.reject(second.delivery_tag, false).await.unwrap();

    assert_eq!(broker.unacked_count("notifications"), 0);
    assert_eq!(broker.acked_count("notifications"), 1);
    let dead = broker.dead_letters("notifications");
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].payload, b"two");
    assert_eq!(dead[0].routing_key, "task.created");
}

#[tokio::test]
async fn test_reject_with_requeue_redelivers() {
    let broker = InMemoryBroker::new();
    let (_conn, channel) = open_channel(&broker).await;
    declare_task_topology(channel.as_ref()).await;
    channel
        .publish(&message("task.events", "task.created", "again"))
        .await
        .unwrap();

    let mut deliveries = channel.consume("notifications", "test").await.unwrap();
    let first = deliveries.next().await.unwrap().unwrap();
    channel.reject(first.delivery_tag, true).await.unwrap();
    let second = deliveries.next().await.unwrap().unwrap();

    assert_eq!(second.payload, b"again");
    assert!(second.redelivered);
    assert_ne!(first.delivery_tag, second.delivery_tag);
}

#[tokio::test]
async fn test_closing_channel_requeues_unacked_and_ends_stream() {
    let broker = InMemoryBroker::new();
    let (connection, channel) = open_channel(&broker).await;
    declare_task_topology(channel.as_ref()).await;
    channel
        .publish(&message("task.events", "task.created", "pending"))
        .await
        .unwrap();

    let mut deliveries = channel.consume("notifications", "test").await.unwrap();
    let _unsettled = deliveries.next().await.unwrap().unwrap();
    channel.close().await.unwrap();

    assert!(deliveries.next().await.is_none());
    assert_eq!(broker.ready_count("notifications"), 1);
    assert_eq!(broker.unacked_count("notifications"), 0);

    let channel = connection.create_channel().await.unwrap();
    let mut deliveries = channel.consume("notifications", "again").await.unwrap();
    let redelivered = deliveries.next().await.unwrap().unwrap();
    assert!(redelivered.redelivered);
}

#[tokio::test]
async fn test_unknown_delivery_tag_closes_channel() {
    let broker = InMemoryBroker::new();
    let (_conn, channel) = open_channel(&broker).await;

    assert!(channel.ack(99).await.is_err());
    assert!(!channel.is_open());
    assert!(matches!(
        channel.ack(100).await.unwrap_err(),
        Error::Connection { .. }
    ));
}

#[tokio::test]
async fn test_drop_connections_notifies_listeners() {
    let broker = InMemoryBroker::new();
    let (connection, channel) = open_channel(&broker).await;
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    connection.on_event(Arc::new(move |event: &ConnectionEvent| {
        sink.lock().unwrap().push(event.clone());
    }));
    assert_eq!(broker.open_connection_count(), 1);

    broker.drop_connections();

    assert!(!connection.is_open());
    assert!(!channel.is_open());
    assert_eq!(broker.open_connection_count(), 0);
    let events = events.lock().unwrap().clone();
    assert_eq!(events.len(), 2);
    assert!(matches!(events[0], ConnectionEvent::Error(_)));
    assert_eq!(events[1], ConnectionEvent::Closed);
}

#[tokio::test]
async fn test_fault_injection() {
    let broker = InMemoryBroker::new();

    broker.set_reachable(false);
    let err = broker.connect("amqp://localhost").await.err().unwrap();
    assert!(err.is_connection());
    broker.set_reachable(true);

    let connection = broker.connect("amqp://localhost").await.unwrap();
    broker.refuse_channels(true);
    assert!(connection.create_channel().await.is_err());
    broker.refuse_channels(false);

    let channel = connection.create_channel().await.unwrap();
    declare_task_topology(channel.as_ref()).await;
    broker.fail_publishes(true);
    let err = channel
        .publish(&message("task.events", "task.created", "{}"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Publish { .. }));
    assert!(channel.is_open());
    assert_eq!(broker.published_count(), 0);
}

#[tokio::test]
async fn test_failed_settlement_keeps_channel_open() {
    let broker = InMemoryBroker::new();
    let (_conn, channel) = open_channel(&broker).await;
    declare_task_topology(channel.as_ref()).await;
    channel
        .publish(&message("task.events", "task.created", "{}"))
        .await
        .unwrap();
    let mut deliveries = channel.consume("notifications", "test").await.unwrap();
    let delivery = deliveries.next().await.unwrap().unwrap();

    broker.fail_settlements(true);
    assert!(channel.ack(delivery.delivery_tag).await.is_err());
    assert!(channel.is_open());
    assert_eq!(broker.unacked_count("notifications"), 1);

    broker.fail_settlements(false);
    channel.ack(delivery.delivery_tag).await.unwrap();
    assert_eq!(broker.acked_count("notifications"), 1);
}

#[tokio::test]
async fn test_closed_connections_are_not_tracked_forever() {
    let broker = InMemoryBroker::new();

    for _ in 0..5 {
        let connection = broker.connect("amqp://localhost").await.unwrap();
        connection.close().await.unwrap();
    }
    assert_eq!(broker.open_connection_count(), 0);

    let (_connection, _channel) = open_channel(&broker).await;
    assert_eq!(broker.tracked_connection_count(), 1);
    assert_eq!(broker.open_connection_count(), 1);
}
