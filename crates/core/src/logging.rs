//! # Structured Logging
//!
//! `tracing` subscriber setup shared by the CLI and the probe server,
//! with JSON output for production and pretty output for development.

use std::io;
use std::str::FromStr;

use serde_json::{json, Value};
use tracing_subscriber::{fmt::Layer, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{AppConfig, ConfigError};

/// Output format of the log subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Plain,
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            "plain" | "text" => Ok(LogFormat::Plain),
            _ => Err(ConfigError::invalid_value(
                "log_format",
                s,
                "pretty, json, or plain",
            )),
        }
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            LogFormat::Pretty => "pretty",
            LogFormat::Json => "json",
            LogFormat::Plain => "plain",
        })
    }
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "warn")
    pub level: String,
    pub format: LogFormat,
    /// Include file and line number information
    pub include_location: bool,
    /// Fields logged once at startup
    pub global_fields: serde_json::Map<String, Value>,
    /// Environment filter (supports directives like "paydesk_migrate=debug,sqlx=warn")
    pub env_filter: Option<String>,
    pub service_name: Option<String>,
    pub service_version: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            include_location: false,
            global_fields: serde_json::Map::new(),
            env_filter: None,
            service_name: None,
            service_version: None,
        }
    }
}

impl LoggingConfig {
    /// Derive logging settings from the application configuration.
    ///
    /// sqlx statement logging is capped at `warn` unless the level is `trace`.
    pub fn from_app_config(config: &AppConfig) -> Self {
        let filter = if config.log_level == "trace" {
            "trace".to_string()
        } else {
            format!("{},sqlx=warn", config.log_level)
        };

        Self {
            level: config.log_level.clone(),
            format: config.log_format,
            include_location: config.environment.is_development(),
            env_filter: Some(filter),
            ..Self::default()
        }
        .with_global_field("env", config.environment.to_string())
    }

    /// Add a global field to the startup entry
    pub fn with_global_field<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        self.global_fields.insert(key.into(), value.into());
        self
    }

    /// Set service name and version
    pub fn with_service(mut self, name: &str, version: &str) -> Self {
        self.service_name = Some(name.to_string());
        self.service_version = Some(version.to_string());
        self
    }

    pub fn with_env_filter<S: Into<String>>(mut self, filter: S) -> Self {
        self.env_filter = Some(filter.into());
        self
    }

    /// Filter directives used when `RUST_LOG` is not set
    pub fn filter_directives(&self) -> &str {
        self.env_filter.as_deref().unwrap_or(&self.level)
    }

    fn startup_entry(&self) -> Value {
        let mut entry = json!({
            "level": self.level,
            "format": self.format.to_string(),
        });
        if let Some(name) = &self.service_name {
            entry["service_name"] = json!(name);
        }
        if let Some(version) = &self.service_version {
            entry["service_version"] = json!(version);
        }
        for (key, value) in &self.global_fields {
            entry[key] = value.clone();
        }
        entry
    }
}

/// Install the global subscriber. `RUST_LOG` takes precedence over the
/// configured filter.
pub fn init_logging(config: LoggingConfig) -> Result<(), ConfigError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.filter_directives()))
        .map_err(|e| ConfigError::logging(format!("invalid log filter: {}", e)))?;

    let layer = Layer::new()
        .with_writer(io::stderr)
        .with_file(config.include_location)
        .with_line_number(config.include_location);

    let installed = match config.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(layer.json())
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(layer.pretty())
            .try_init(),
        LogFormat::Plain => tracing_subscriber::registry()
            .with(filter)
            .with(layer)
            .try_init(),
    };
    installed.map_err(|e| ConfigError::logging(e.to_string()))?;

    tracing::debug!(target: "paydesk::logging", "logging initialized: {}", config.startup_entry());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parsing() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("text".parse::<LogFormat>().unwrap(), LogFormat::Plain);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_from_app_config() {
        let config = LoggingConfig::from_app_config(&AppConfig::production());
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.filter_directives(), "info,sqlx=warn");
        assert!(!config.include_location);
        assert_eq!(config.global_fields["env"], json!("production"));

        let mut app = AppConfig::development();
        app.log_level = "trace".to_string();
        let config = LoggingConfig::from_app_config(&app);
        assert_eq!(config.filter_directives(), "trace");
        assert!(config.include_location);
    }

    #[test]
    fn test_startup_entry_fields() {
        let entry = LoggingConfig::default()
            .with_service("paydesk", "0.3.0")
            .with_global_field("region", "eu")
            .startup_entry();
        assert_eq!(entry["service_name"], "paydesk");
        assert_eq!(entry["region"], "eu");
        assert_eq!(entry["format"], "pretty");
    }

    #[test]
    fn test_second_init_is_an_error() {
        let _ = init_logging(LoggingConfig::default().with_env_filter("error"));
        let second = init_logging(LoggingConfig::default().with_env_filter("error"));
        assert!(matches!(second, Err(ConfigError::Logging { .. })));
    }
}
