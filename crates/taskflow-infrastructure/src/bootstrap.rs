//! Process bootstrap
//!
//! Wires configuration, transport and use cases into the two process roles:
//!
//! | Runtime | Topology | Owns |
//! |---------|----------|------|
//! | [`ProducerRuntime`] | exchange only | [`TaskService`] publishing `task.created` |
//! | [`ConsumerRuntime`] | exchange, queue, binding | [`ConsumerLoop`] over the notification queue |
//!
//! Connection or topology failures during `start` abort startup; the
//! half-open connection is closed before the error is returned.

use crate::config::{AppConfig, BrokerConfig};
use crate::health::BrokerHealth;
use std::sync::Arc;
use std::time::Duration;
use taskflow_application::{
    BrokerPublisher, ConnectionHandle, ConnectionSupervisor, ConsumerLoop, ConsumerStats,
    HandlerRegistry, TaskService, TopologyHandle, ensure_exchange, ensure_topology,
};
use taskflow_domain::constants::{NOTIFICATION_QUEUE, TASK_CREATED, TASK_EVENTS_EXCHANGE};
use taskflow_domain::error::Result;
use taskflow_domain::ports::BrokerTransport;
use taskflow_domain::repositories::TaskRepository;
use taskflow_providers::AmqpBrokerTransport;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// RabbitMQ transport configured from `config`
pub fn amqp_transport(config: &BrokerConfig) -> Arc<dyn BrokerTransport> {
    Arc::new(
        AmqpBrokerTransport::new()
            .with_connection_name(config.connection_name.as_str())
            .with_prefetch(config.prefetch),
    )
}

/// Producer process: task service plus a publisher on the task exchange
pub struct ProducerRuntime {
    supervisor: ConnectionSupervisor,
    handle: ConnectionHandle,
    task_service: TaskService,
}

impl ProducerRuntime {
    /// Connect, declare the exchange and build the task service
    pub async fn start(
        config: &AppConfig,
        transport: Arc<dyn BrokerTransport>,
        tasks: Arc<dyn TaskRepository>,
    ) -> Result<Self> {
        let supervisor = ConnectionSupervisor::new(transport);
        let handle = supervisor.connect(&config.broker.url).await?;

        let declared = match handle.channel() {
            Ok(channel) => ensure_exchange(channel.as_ref(), TASK_EVENTS_EXCHANGE).await,
            Err(e) => Err(e),
        };
        if let Err(e) = declared {
            error!(error = %e, "Producer startup failed");
            supervisor.close().await;
            return Err(e);
        }

        let publisher = Arc::new(BrokerPublisher::new(handle.clone(), TASK_EVENTS_EXCHANGE));
        let task_service = TaskService::new(tasks, publisher);
        info!(exchange = TASK_EVENTS_EXCHANGE, "Producer ready");

        Ok(Self {
            supervisor,
            handle,
            task_service,
        })
    }

    /// Task use cases
    pub fn task_service(&self) -> &TaskService {
        &self.task_service
    }

    /// Broker connection
    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    /// Broker health reporter
    pub fn health(&self) -> BrokerHealth {
        BrokerHealth::new(self.handle.clone())
    }

    /// Close channel and connection
    pub async fn shutdown(self) {
        self.supervisor.close().await;
        info!("Producer stopped");
    }
}

/// Consumer process: the notification queue's consumer loop
pub struct ConsumerRuntime {
    supervisor: ConnectionSupervisor,
    handle: ConnectionHandle,
    topology: TopologyHandle,
    consumer: ConsumerLoop,
    grace_period: Duration,
}

impl ConsumerRuntime {
    /// Connect and declare the exchange, queue and `task.created` binding
    pub async fn start(
        config: &AppConfig,
        transport: Arc<dyn BrokerTransport>,
        registry: HandlerRegistry,
    ) -> Result<Self> {
        let supervisor = ConnectionSupervisor::new(transport);
        let handle = supervisor.connect(&config.broker.url).await?;

        let declared = match handle.channel() {
            Ok(channel) => {
                ensure_topology(
                    channel.as_ref(),
                    TASK_EVENTS_EXCHANGE,
                    NOTIFICATION_QUEUE,
                    TASK_CREATED,
                )
                .await
            }
            Err(e) => Err(e),
        };
        let topology = match declared {
            Ok(topology) => topology,
            Err(e) => {
                error!(error = %e, "Consumer startup failed");
                supervisor.close().await;
                return Err(e);
            }
        };

        info!(
            queue = %topology.queue,
            backlog = topology.message_count,
            handlers = registry.len(),
            "Consumer ready"
        );
        Ok(Self {
            supervisor,
            handle,
            topology,
            consumer: ConsumerLoop::new(registry),
            grace_period: config.shutdown.grace_period(),
        })
    }

    /// Declared topology
    pub fn topology(&self) -> &TopologyHandle {
        &self.topology
    }

    /// Broker connection
    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    /// Broker health reporter
    pub fn health(&self) -> BrokerHealth {
        BrokerHealth::new(self.handle.clone())
    }

    /// Consumer counters so far
    pub fn stats(&self) -> ConsumerStats {
        self.consumer.stats()
    }

    /// Consume until `shutdown` is cancelled or the connection is lost
    ///
    /// After cancellation the in-flight handler gets at most the grace
    /// period to finish; then channel and connection are closed. Anything
    /// left unacknowledged is redelivered by the broker.
    pub async fn run_until(self, shutdown: CancellationToken) -> Result<ConsumerStats> {
        let run = self
            .consumer
            .run(&self.handle, &self.topology.queue, shutdown.clone());
        tokio::pin!(run);

        let result = tokio::select! {
            result = &mut run => result,
            () = shutdown.cancelled() => {
                if let Ok(result) = tokio::time::timeout(self.grace_period, &mut run).await {
                    result
                } else {
                    warn!(
                        grace_period_secs = self.grace_period.as_secs(),
                        "Grace period elapsed with a handler still running"
                    );
                    Ok(self.consumer.stats())
                }
            }
        };

        self.supervisor.close().await;
        match &result {
            Ok(stats) => info!(?stats, "Consumer stopped"),
            Err(e) => error!(error = %e, "Consumer stopped with error"),
        }
        result
    }
}
