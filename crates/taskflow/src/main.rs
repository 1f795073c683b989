//! Taskflow - Entry Point
//!
//! | Command | Role |
//! |---------|------|
//! | `taskflow notify` | Notification consumer, runs until SIGINT/SIGTERM |
//! | `taskflow create-task --user-id U --title T` | Producer, creates one task |
//!
//! Both commands read the configuration file given with `--config` (or the
//! default locations), then `RABBITMQ_URL` and `TASKFLOW__*` variables.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use taskflow::infrastructure::bootstrap::amqp_transport;
use taskflow::infrastructure::logging::init_logging;
use taskflow::infrastructure::shutdown::cancel_on_signal;
use taskflow::providers::{InMemoryNotificationRepository, InMemoryTaskRepository};
use taskflow::{AppConfig, ConfigLoader, CreateTaskData};
use tokio_util::sync::CancellationToken;

/// Command line interface for Taskflow
#[derive(Parser, Debug)]
#[command(name = "taskflow")]
#[command(about = "Taskflow - Task events over RabbitMQ")]
#[command(version)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Consume task events and create notifications until signalled
    Notify,

    /// Create a task and publish its `task.created` event
    CreateTask {
        /// Owner of the task
        #[arg(long)]
        user_id: String,

        /// Task title
        #[arg(long)]
        title: String,

        /// Optional task description
        #[arg(long)]
        description: Option<String>,
    },
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<AppConfig> {
    let mut loader = ConfigLoader::new();
    if let Some(path) = path {
        loader = loader.with_config_path(path);
    }
    Ok(loader.load()?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;
    init_logging(&config.logging)?;
    let transport = amqp_transport(&config.broker);

    match cli.command {
        Command::Notify => {
            let shutdown = CancellationToken::new();
            let signals = cancel_on_signal(shutdown.clone());
            let result = taskflow::run_notify(
                &config,
                transport,
                Arc::new(InMemoryNotificationRepository::new()),
                shutdown.clone(),
            )
            .await;
            shutdown.cancel();
            signals.await.context("signal listener panicked")?;
            result?;
        }
        Command::CreateTask {
            user_id,
            title,
            description,
        } => {
            let creation = taskflow::create_task(
                &config,
                transport,
                Arc::new(InMemoryTaskRepository::new()),
                CreateTaskData {
                    title,
                    description,
                    user_id,
                },
            )
            .await?;

            println!("{}", serde_json::to_string_pretty(&creation.task)?);
            match &creation.delivery {
                Ok(ack) => println!(
                    "Event published to '{}' with routing key '{}'",
                    ack.exchange, ack.routing_key
                ),
                Err(e) => eprintln!("Task created but its event was not delivered: {e}"),
            }
        }
    }
    Ok(())
}
