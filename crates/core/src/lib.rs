//! Shared configuration and logging for the paydesk binaries.

pub mod config;
pub mod logging;

pub use config::{AppConfig, AppConfigTrait, ConfigError, ConfigSource, Environment};
pub use logging::{init_logging, LogFormat, LoggingConfig};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
