//! Configuration
//!
//! [`ConfigLoader`] layers defaults, an optional TOML file and environment
//! variables into an [`AppConfig`].

pub mod loader;
pub mod types;

pub use loader::ConfigLoader;
pub use types::*;
