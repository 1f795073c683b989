//! Tests for the consumer loop: decode, dispatch and settlement

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use taskflow_application::{
    BrokerPublisher, ConnectionHandle, ConsumerLoop, ConsumerStats, HandlerRegistry,
    MessageOutcome, NotificationService,
};
use taskflow_domain::ports::{DeliveryMode, EventPublisher, OutboundMessage};
use taskflow_domain::{Error, EventEnvelope, Result};
use taskflow_providers::{InMemoryBroker, InMemoryNotificationRepository};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::test_utils::{
    EXCHANGE, FlakyHandler, PanickingHandler, QUEUE, RecordingHandler, SlowHandler, wait_until,
    with_topology,
};

fn task_created(task_id: &str, title: &str) -> EventEnvelope {
    EventEnvelope::builder("task.created", task_id)
        .attribute("userId", "u1")
        .attribute("title", title)
        .build()
        .unwrap()
}

async fn publish_raw(handle: &ConnectionHandle, routing_key: &str, body: &[u8]) {
    handle
        .channel()
        .unwrap()
        .publish(&OutboundMessage {
            exchange: EXCHANGE.to_string(),
            routing_key: routing_key.to_string(),
            payload: body.to_vec(),
            delivery_mode: DeliveryMode::Persistent,
            content_type: "application/json".to_string(),
        })
        .await
        .unwrap();
}

fn spawn_consumer(
    consumer: &Arc<ConsumerLoop>,
    handle: &ConnectionHandle,
    shutdown: &CancellationToken,
) -> JoinHandle<Result<ConsumerStats>> {
    let consumer = Arc::clone(consumer);
    let handle = handle.clone();
    let shutdown = shutdown.clone();
    tokio::spawn(async move { consumer.run(&handle, QUEUE, shutdown).await })
}

fn settled(broker: &InMemoryBroker) -> usize {
    usize::try_from(broker.acked_count(QUEUE)).unwrap() + broker.dead_letters(QUEUE).len()
}

#[tokio::test]
async fn test_process_resolves_each_outcome() {
    let registry = HandlerRegistry::new()
        .with_handler("task.created", Arc::new(RecordingHandler::default()))
        .with_handler("task.failed", Arc::new(FlakyHandler::failing(usize::MAX)));
    let consumer = ConsumerLoop::new(registry);

    let malformed = consumer.process(b"not json").await;
    assert!(matches!(malformed, MessageOutcome::RejectedMalformed { .. }));
    assert!(!malformed.is_ack());

    let ok = task_created("t1", "Buy milk").encode().unwrap();
    assert_eq!(
        consumer.process(&ok).await,
        MessageOutcome::Acknowledged {
            event_type: "task.created".to_string()
        }
    );

    let unknown = EventEnvelope::builder("user.deleted", "u1").build().unwrap();
    assert_eq!(
        consumer.process(&unknown.encode().unwrap()).await,
        MessageOutcome::Ignored {
            event_type: "user.deleted".to_string()
        }
    );

    let failing = EventEnvelope::builder("task.failed", "t2").build().unwrap();
    let outcome = consumer.process(&failing.encode().unwrap()).await;
    assert!(matches!(outcome, MessageOutcome::RejectedByHandler { .. }));
    assert_eq!(consumer.stats().received, 4);
}

#[tokio::test]
async fn test_panicking_handler_is_rejected() {
    let registry = HandlerRegistry::new().with_handler("task.created", Arc::new(PanickingHandler));
    let consumer = ConsumerLoop::new(registry);

    let outcome = consumer
        .process(&task_created("t1", "boom").encode().unwrap())
        .await;

    match outcome {
        MessageOutcome::RejectedByHandler { reason, .. } => assert!(reason.contains("panicked")),
        other => panic!("unexpected outcome {other:?}"),
    }
}

#[tokio::test]
async fn test_poison_message_then_good_messages_in_order() {
    let (broker, _supervisor, handle) = with_topology().await;
    let recorder = Arc::new(RecordingHandler::default());
    let consumer = Arc::new(ConsumerLoop::new(
        HandlerRegistry::new().with_handler("task.created", recorder.clone()),
    ));
    let publisher = BrokerPublisher::new(handle.clone(), EXCHANGE);

    publish_raw(&handle, "task.created", b"{\"type\":").await;
    publisher.publish(&task_created("t1", "first")).await.unwrap();
    publisher.publish(&task_created("t2", "second")).await.unwrap();

    let shutdown = CancellationToken::new();
    let running = spawn_consumer(&consumer, &handle, &shutdown);
    wait_until(|| settled(&broker) == 3).await;
    shutdown.cancel();
    let stats = running.await.unwrap().unwrap();

    let ids: Vec<String> = recorder
        .seen()
        .iter()
        .map(|e| e.correlation_id().to_string())
        .collect();
    assert_eq!(ids, vec!["t1", "t2"]);
    assert_eq!(stats.rejected_malformed, 1);
    assert_eq!(stats.acknowledged, 2);
    assert_eq!(broker.dead_letters(QUEUE)[0].payload, b"{\"type\":");
    assert_eq!(broker.unacked_count(QUEUE), 0);
}

#[tokio::test]
async fn test_unknown_event_type_is_acked_without_handler() {
    let (broker, _supervisor, handle) = with_topology().await;
    let recorder = Arc::new(RecordingHandler::default());
    let consumer = Arc::new(ConsumerLoop::new(
        HandlerRegistry::new().with_handler("task.created", recorder.clone()),
    ));
    let publisher = BrokerPublisher::new(handle.clone(), EXCHANGE);
    let completed = EventEnvelope::builder("task.completed", "t1").build().unwrap();

    publisher.publish(&completed).await.unwrap();

    let shutdown = CancellationToken::new();
    let running = spawn_consumer(&consumer, &handle, &shutdown);
    wait_until(|| broker.acked_count(QUEUE) == 1).await;
    shutdown.cancel();
    let stats = running.await.unwrap().unwrap();

    assert_eq!(recorder.count(), 0);
    assert_eq!(stats.ignored, 1);
    assert!(broker.dead_letters(QUEUE).is_empty());
}

#[tokio::test]
async fn test_unknown_types_outside_envelope_schema_are_acked() {
    let consumer = ConsumerLoop::new(
        HandlerRegistry::new().with_handler("task.created", Arc::new(RecordingHandler::default())),
    );

    let without_task_id = consumer
        .process(br#"{"type":"user.deleted","userId":"u1"}"#)
        .await;
    assert_eq!(
        without_task_id,
        MessageOutcome::Ignored {
            event_type: "user.deleted".to_string()
        }
    );

    let with_boolean = consumer
        .process(br#"{"type":"task.completed","taskId":"t1","timestamp":"2024-01-01T00:00:00Z","done":true}"#)
        .await;
    assert!(with_boolean.is_ack());
    assert_eq!(consumer.stats().ignored, 2);
    assert_eq!(consumer.stats().rejected_malformed, 0);
}

#[tokio::test]
async fn test_registered_type_still_requires_full_envelope() {
    let recorder = Arc::new(RecordingHandler::default());
    let consumer =
        ConsumerLoop::new(HandlerRegistry::new().with_handler("task.created", recorder.clone()));

    let outcome = consumer
        .process(br#"{"type":"task.created","userId":"u1","title":"Buy milk"}"#)
        .await;

    assert!(matches!(outcome, MessageOutcome::RejectedMalformed { .. }));
    assert_eq!(recorder.count(), 0);
}

#[tokio::test]
async fn test_loose_unknown_event_is_acked_by_running_loop() {
    let (broker, _supervisor, handle) = with_topology().await;
    let consumer = Arc::new(ConsumerLoop::new(
        HandlerRegistry::new().with_handler("task.created", Arc::new(RecordingHandler::default())),
    ));

    publish_raw(
        &handle,
        "task.completed",
        br#"{"type":"task.completed","taskId":"t1","timestamp":"2024-01-01T00:00:00Z","done":true}"#,
    )
    .await;

    let shutdown = CancellationToken::new();
    let running = spawn_consumer(&consumer, &handle, &shutdown);
    wait_until(|| broker.acked_count(QUEUE) == 1).await;
    shutdown.cancel();
    let stats = running.await.unwrap().unwrap();

    assert_eq!(stats.ignored, 1);
    assert!(broker.dead_letters(QUEUE).is_empty());
}

#[tokio::test]
async fn test_buy_milk_creates_one_notification_and_acks_once() {
    let (broker, _supervisor, handle) = with_topology().await;
    let notifications = Arc::new(NotificationService::new(Arc::new(
        InMemoryNotificationRepository::new(),
    )));
    let consumer = Arc::new(ConsumerLoop::new(
        HandlerRegistry::new().with_handler("task.created", notifications.clone()),
    ));
    let publisher = BrokerPublisher::new(handle.clone(), EXCHANGE);

    publisher
        .publish(&task_created("t1", "Buy milk"))
        .await
        .unwrap();

    let shutdown = CancellationToken::new();
    let running = spawn_consumer(&consumer, &handle, &shutdown);
    wait_until(|| broker.acked_count(QUEUE) == 1).await;
    shutdown.cancel();
    let stats = running.await.unwrap().unwrap();

    assert_eq!(stats.received, 1);
    assert_eq!(stats.acknowledged, 1);
    assert_eq!(broker.acked_count(QUEUE), 1);
    let created = notifications.get_user_notifications("u1", None).await.unwrap();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].title, "New Task Created");
    assert!(created[0].message.contains("Buy milk"));
}

#[tokio::test]
async fn test_handler_failure_rejects_without_requeue_and_continues() {
    let (broker, _supervisor, handle) = with_topology().await;
    let handler = Arc::new(FlakyHandler::failing(1));
    let consumer = Arc::new(ConsumerLoop::new(
        HandlerRegistry::new().with_handler("task.created", handler.clone()),
    ));
    let publisher = BrokerPublisher::new(handle.clone(), EXCHANGE);

    let shutdown = CancellationToken::new();
    let running = spawn_consumer(&consumer, &handle, &shutdown);

    publisher.publish(&task_created("t1", "first")).await.unwrap();
    wait_until(|| broker.dead_letters(QUEUE).len() == 1).await;
    assert_eq!(broker.ready_count(QUEUE), 0);
    assert_eq!(broker.unacked_count(QUEUE), 0);

    publisher.publish(&task_created("t2", "second")).await.unwrap();
    wait_until(|| broker.acked_count(QUEUE) == 1).await;
    shutdown.cancel();
    let stats = running.await.unwrap().unwrap();

    assert_eq!(handler.calls(), 2);
    assert_eq!(stats.rejected_by_handler, 1);
    assert_eq!(stats.acknowledged, 1);
    assert!(!broker.dead_letters(QUEUE)[0].redelivered);
}

#[tokio::test]
async fn test_lost_connection_stops_with_connection_error() {
    let (broker, _supervisor, handle) = with_topology().await;
    let consumer = Arc::new(ConsumerLoop::new(HandlerRegistry::new()));

    let shutdown = CancellationToken::new();
    let running = spawn_consumer(&consumer, &handle, &shutdown);
    wait_until(|| broker.consumer_count(QUEUE) == 1).await;
    broker.drop_connections();

    let err = running.await.unwrap().unwrap_err();
    assert!(matches!(err, Error::Connection { .. }));
}

#[tokio::test]
async fn test_run_on_lost_connection_fails_immediately() {
    let (broker, _supervisor, handle) = with_topology().await;
    broker.drop_connections();
    let consumer = ConsumerLoop::new(HandlerRegistry::new());

    let err = consumer
        .run(&handle, QUEUE, CancellationToken::new())
        .await
        .unwrap_err();

    assert!(err.is_connection());
}

#[tokio::test]
async fn test_shutdown_lets_in_flight_handler_finish() {
    let (broker, _supervisor, handle) = with_topology().await;
    let handler = Arc::new(SlowHandler::new(Duration::from_millis(200)));
    let consumer = Arc::new(ConsumerLoop::new(
        HandlerRegistry::new().with_handler("task.created", handler.clone()),
    ));
    let publisher = BrokerPublisher::new(handle.clone(), EXCHANGE);
    publisher.publish(&task_created("t1", "slow")).await.unwrap();

    let shutdown = CancellationToken::new();
    let running = spawn_consumer(&consumer, &handle, &shutdown);
    wait_until(|| handler.started.load(Ordering::SeqCst)).await;
    shutdown.cancel();
    let stats = running.await.unwrap().unwrap();

    assert!(handler.finished.load(Ordering::SeqCst));
    assert_eq!(stats.acknowledged, 1);
    assert_eq!(broker.acked_count(QUEUE), 1);
}

#[tokio::test]
async fn test_cancel_before_any_delivery_returns_empty_stats() {
    let (_broker, _supervisor, handle) = with_topology().await;
    let consumer = ConsumerLoop::new(HandlerRegistry::new());
    let shutdown = CancellationToken::new();
    shutdown.cancel();

    let stats = consumer.run(&handle, QUEUE, shutdown).await.unwrap();

    assert_eq!(stats, ConsumerStats::default());
}

#[tokio::test]
async fn test_settle_failure_is_counted_and_loop_continues() {
    let (broker, _supervisor, handle) = with_topology().await;
    let recorder = Arc::new(RecordingHandler::default());
    let consumer = Arc::new(ConsumerLoop::new(
        HandlerRegistry::new().with_handler("task.created", recorder.clone()),
    ));
    let publisher = BrokerPublisher::new(handle.clone(), EXCHANGE);

    let shutdown = CancellationToken::new();
    let running = spawn_consumer(&consumer, &handle, &shutdown);

    broker.fail_settlements(true);
    publisher.publish(&task_created("t1", "unsettled")).await.unwrap();
    wait_until(|| consumer.stats().settle_failures == 1).await;

    broker.fail_settlements(false);
    publisher.publish(&task_created("t2", "settled")).await.unwrap();
    wait_until(|| broker.acked_count(QUEUE) == 1).await;
    shutdown.cancel();
    let stats = running.await.unwrap().unwrap();

    assert_eq!(recorder.count(), 2);
    assert_eq!(stats.settle_failures, 1);
    assert_eq!(stats.acknowledged, 1);
    assert_eq!(broker.unacked_count(QUEUE), 1);
}

#[tokio::test]
async fn test_registry_lists_event_types() {
    let registry = HandlerRegistry::new()
        .with_handler("task.updated", Arc::new(RecordingHandler::default()))
        .with_handler("task.created", Arc::new(RecordingHandler::default()));

    assert_eq!(registry.event_types(), vec!["task.created", "task.updated"]);
    assert_eq!(registry.len(), 2);
    assert!(registry.get("task.deleted").is_none());
}
