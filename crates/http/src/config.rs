//! Probe server configuration

use paydesk_core::{AppConfigTrait, ConfigError, ConfigSource};
use std::collections::HashMap;
use std::env;
use std::time::Duration;

pub const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 5;

/// HTTP server specific configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpConfig {
    /// Upper bound for a single dependency probe
    pub probe_timeout_secs: u64,
    /// Wrap the router in a request trace layer
    pub enable_tracing: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            probe_timeout_secs: DEFAULT_PROBE_TIMEOUT_SECS,
            enable_tracing: true,
        }
    }
}

impl HttpConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

impl AppConfigTrait for HttpConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(raw) = env::var("HTTP_PROBE_TIMEOUT_SECS") {
            config.probe_timeout_secs = raw.trim().parse().map_err(|_| {
                ConfigError::invalid_value("probe_timeout_secs", &raw, "whole number of seconds")
            })?;
        }

        if let Ok(raw) = env::var("HTTP_ENABLE_TRACING") {
            config.enable_tracing = raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::invalid_value("enable_tracing", &raw, "true or false"))?;
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.probe_timeout_secs == 0 {
            return Err(ConfigError::validation_failed(
                "Probe timeout must be greater than 0",
            ));
        }
        Ok(())
    }

    fn config_sources(&self) -> HashMap<String, ConfigSource> {
        [
            ("probe_timeout_secs", "HTTP_PROBE_TIMEOUT_SECS", "5"),
            ("enable_tracing", "HTTP_ENABLE_TRACING", "true"),
        ]
        .into_iter()
        .map(|(field, var, default)| {
            let source = if env::var(var).is_ok() {
                ConfigSource::EnvVar(var.to_string())
            } else {
                ConfigSource::Default(default.to_string())
            };
            (field.to_string(), source)
        })
        .collect()
    }
}
