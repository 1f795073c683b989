//! Shutdown configuration types

use crate::constants::DEFAULT_SHUTDOWN_GRACE_SECS;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Graceful shutdown settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Seconds an in-flight handler may keep running after shutdown starts
    pub grace_period_secs: u64,
}

impl ShutdownConfig {
    /// Grace period as a [`Duration`]
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_period_secs: DEFAULT_SHUTDOWN_GRACE_SECS,
        }
    }
}
