//! Health checks
//!
//! Broker connectivity is reported from the supervisor's connectivity flag;
//! checking it never touches the network.

use crate::logging::log_health_check;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use taskflow_application::ConnectionHandle;

/// Health status enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Fully operational
    Up,
    /// Operational with reduced capability
    Degraded,
    /// Not operational
    Down,
}

impl HealthStatus {
    /// Check if the status indicates the service is healthy
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Up)
    }

    /// Check if the service is operational (healthy or degraded)
    pub fn is_operational(&self) -> bool {
        matches!(self, Self::Up | Self::Degraded)
    }
}

/// Individual health check result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheck {
    /// Name of the checked component
    pub name: String,
    /// Current status
    pub status: HealthStatus,
    /// When the check ran
    pub timestamp: DateTime<Utc>,
    /// Failure description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HealthCheck {
    /// Create a successful health check
    pub fn healthy<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Up,
            timestamp: Utc::now(),
            error: None,
        }
    }

    /// Create a failed health check
    pub fn failed<S: Into<String>>(name: S, error: Option<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Down,
            timestamp: Utc::now(),
            error,
        }
    }
}

/// Reports whether the broker connection is usable
#[derive(Debug, Clone)]
pub struct BrokerHealth {
    handle: ConnectionHandle,
}

impl BrokerHealth {
    /// Component name used in reports
    pub const NAME: &'static str = "broker";

    /// Watch `handle`
    pub fn new(handle: ConnectionHandle) -> Self {
        Self { handle }
    }

    /// Current broker status
    pub fn check(&self) -> HealthCheck {
        let check = if self.handle.is_connected() {
            HealthCheck::healthy(Self::NAME)
        } else {
            HealthCheck::failed(
                Self::NAME,
                Some(format!("not connected to {}", self.handle.url())),
            )
        };
        log_health_check(Self::NAME, check.status.is_healthy(), check.error.as_deref());
        check
    }
}
