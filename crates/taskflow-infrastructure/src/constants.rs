//! Infrastructure layer constants
//!
//! Contains constants that are part of the process wiring. Wire-level names
//! (exchange, queue, event types) live in `taskflow_domain::constants`.

// ============================================================================
// CONFIGURATION CONSTANTS
// ============================================================================

/// Default configuration file name
pub const DEFAULT_CONFIG_FILENAME: &str = "taskflow.toml";

/// Project-local configuration directory
pub const LOCAL_CONFIG_DIR: &str = "config";

/// Per-user configuration directory name under the platform config dir
pub const USER_CONFIG_DIR: &str = "taskflow";

/// Environment variable prefix for configuration (`TASKFLOW__BROKER__URL`)
pub const CONFIG_ENV_PREFIX: &str = "TASKFLOW";

/// Separator between prefix and nested keys in environment variables
pub const CONFIG_ENV_SEPARATOR: &str = "__";

/// Conventional broker URL variable, honoured below the prefixed variables
pub const BROKER_URL_ENV: &str = "RABBITMQ_URL";

/// URL schemes accepted for the broker
pub const ALLOWED_BROKER_SCHEMES: [&str; 2] = ["amqp", "amqps"];

/// Connection name shown in the RabbitMQ management UI
pub const DEFAULT_CONNECTION_NAME: &str = "taskflow";

/// Default consumer prefetch (one delivery in flight)
pub const DEFAULT_PREFETCH: u16 = 1;

// ============================================================================
// LOGGING CONSTANTS
// ============================================================================

/// Default log level
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Environment variable holding an `EnvFilter` directive
pub const LOG_FILTER_ENV: &str = "TASKFLOW_LOG";

/// File stem used when the log file path has none
pub const DEFAULT_LOG_FILE_STEM: &str = "taskflow";

// ============================================================================
// SHUTDOWN CONSTANTS
// ============================================================================

/// Time an in-flight handler gets to finish after shutdown is requested
pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 10;
