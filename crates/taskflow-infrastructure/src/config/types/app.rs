//! Application configuration root

use super::{BrokerConfig, LoggingConfig, ShutdownConfig};
use serde::{Deserialize, Serialize};

/// Root configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Message broker connection
    pub broker: BrokerConfig,

    /// Logging
    pub logging: LoggingConfig,

    /// Process shutdown
    pub shutdown: ShutdownConfig,
}
