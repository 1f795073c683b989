//! Configuration types module

pub mod app;
pub mod broker;
pub mod logging;
pub mod shutdown;

pub use app::AppConfig;
pub use broker::BrokerConfig;
pub use logging::LoggingConfig;
pub use shutdown::ShutdownConfig;
