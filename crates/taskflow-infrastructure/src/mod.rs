//! # Infrastructure Layer
//!
//! Cross-cutting technical concerns that wire the application layer into a
//! running process.
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`config`] | Figment-layered configuration (defaults, TOML, env) |
//! | [`constants`] | Configuration file names, env prefixes, defaults |
//! | [`logging`] | Structured logging with tracing |
//! | [`error_ext`] | Context helpers for foreign errors |
//! | [`shutdown`] | Ctrl-C / SIGTERM handling |
//! | [`bootstrap`] | Producer and consumer runtimes |
//! | [`health`] | Broker connectivity health check |

pub mod bootstrap;
pub mod config;
pub mod constants;
pub mod error_ext;
pub mod health;
pub mod logging;
pub mod shutdown;

pub use bootstrap::{ConsumerRuntime, ProducerRuntime};
pub use config::{AppConfig, BrokerConfig, ConfigLoader, LoggingConfig, ShutdownConfig};
pub use error_ext::ErrorContext;
pub use health::{BrokerHealth, HealthCheck, HealthStatus};
