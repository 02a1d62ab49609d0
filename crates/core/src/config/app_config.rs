use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use url::Url;

use crate::config::{ConfigError, ConfigSource};
use crate::logging::LogFormat;

/// Configuration trait for application configuration
pub trait AppConfigTrait: Sized {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self, ConfigError>;

    /// Validate the configuration
    fn validate(&self) -> Result<(), ConfigError>;

    /// Get configuration source information for debugging
    fn config_sources(&self) -> HashMap<String, ConfigSource>;
}

/// Environment enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Testing,
    Production,
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "testing" | "test" => Ok(Environment::Testing),
            "production" | "prod" => Ok(Environment::Production),
            _ => Err(ConfigError::invalid_value(
                "environment",
                s,
                "development, testing, or production",
            )),
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let env_str = match self {
            Environment::Development => "development",
            Environment::Testing => "testing",
            Environment::Production => "production",
        };
        write!(f, "{}", env_str)
    }
}

impl Environment {
    pub fn is_development(&self) -> bool {
        matches!(self, Environment::Development)
    }

    pub fn is_testing(&self) -> bool {
        matches!(self, Environment::Testing)
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }
}

pub const LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];
pub const VERIFY_MODES: [&str; 2] = ["strict", "lenient"];

/// (field, environment variable, default description)
const ENV_FIELDS: &[(&str, &str, &str)] = &[
    ("environment", "ENVIRONMENT", "development"),
    ("host", "HOST", "per environment"),
    ("port", "PORT", "per environment"),
    ("database_url", "DATABASE_URL", "unset"),
    ("db_max_connections", "DB_MAX_CONNECTIONS", "5"),
    ("log_level", "LOG_LEVEL", "per environment"),
    ("log_format", "LOG_FORMAT", "per environment"),
    ("migrations_table", "MIGRATIONS_TABLE", "schema_migrations"),
    ("migration_lock_key", "MIGRATION_LOCK_KEY", "built-in key"),
    ("migration_verify", "MIGRATION_VERIFY", "lenient"),
    (
        "migration_statement_timeout",
        "MIGRATION_STATEMENT_TIMEOUT_SECS",
        "no timeout",
    ),
];

/// Process configuration for the migration tool and the probe server.
///
/// Migration settings left as `None` fall back to the migration engine's
/// own defaults.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: Environment,
    pub host: String,
    pub port: u16,
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub log_level: String,
    pub log_format: LogFormat,
    pub migrations_table: Option<String>,
    pub migration_lock_key: Option<i64>,
    pub migration_verify: Option<String>,
    pub migration_statement_timeout: Option<Duration>,
}

impl AppConfig {
    /// Create a new default configuration
    pub fn new() -> Self {
        Self {
            environment: Environment::Development,
            host: "127.0.0.1".to_string(),
            port: 3000,
            database_url: None,
            db_max_connections: 5,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            migrations_table: None,
            migration_lock_key: None,
            migration_verify: None,
            migration_statement_timeout: None,
        }
    }

    /// Create configuration for development
    pub fn development() -> Self {
        Self {
            database_url: Some("postgres://localhost/paydesk_dev".to_string()),
            log_level: "debug".to_string(),
            ..Self::new()
        }
    }

    /// Create configuration for testing
    pub fn testing() -> Self {
        Self {
            environment: Environment::Testing,
            port: 0,
            database_url: Some("postgres://localhost/paydesk_test".to_string()),
            log_level: "warn".to_string(),
            log_format: LogFormat::Plain,
            ..Self::new()
        }
    }

    /// Create configuration for production
    pub fn production() -> Self {
        Self {
            environment: Environment::Production,
            host: "0.0.0.0".to_string(),
            port: 8080,
            log_format: LogFormat::Json,
            migration_verify: Some("strict".to_string()),
            ..Self::new()
        }
    }

    pub fn for_environment(environment: Environment) -> Self {
        match environment {
            Environment::Development => Self::development(),
            Environment::Testing => Self::testing(),
            Environment::Production => Self::production(),
        }
    }

    /// Get the bind address
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn has_database(&self) -> bool {
        self.database_url.is_some()
    }

    /// Database URL with any password masked, for log output
    pub fn redacted_database_url(&self) -> Option<String> {
        let raw = self.database_url.as_deref()?;
        Some(match Url::parse(raw) {
            Ok(mut url) => {
                if url.password().is_some() {
                    let _ = url.set_password(Some("****"));
                }
                url.to_string()
            }
            Err(_) => "<unparseable>".to_string(),
        })
    }

    /// Database URL, or an error naming the variable to set
    pub fn require_database_url(&self) -> Result<&str, ConfigError> {
        self.database_url.as_deref().ok_or_else(|| {
            ConfigError::missing_required(
                "database_url",
                "Set the DATABASE_URL environment variable",
            )
        })
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn parse_env<T: FromStr>(name: &str, field: &str, expected: &str) -> Result<Option<T>, ConfigError> {
    match env_var(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::invalid_value(field, raw, expected)),
    }
}

impl AppConfigTrait for AppConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let environment = match env_var("ENVIRONMENT") {
            Some(raw) => raw.parse()?,
            None => Environment::Development,
        };
        let mut config = Self::for_environment(environment);

        if let Some(host) = env_var("HOST") {
            config.host = host;
        }
        if let Some(port) = parse_env("PORT", "port", "valid port number (0-65535)")? {
            config.port = port;
        }
        if let Some(url) = env_var("DATABASE_URL") {
            config.database_url = Some(url);
        }
        if let Some(max) = parse_env("DB_MAX_CONNECTIONS", "db_max_connections", "positive integer")? {
            config.db_max_connections = max;
        }
        if let Some(level) = env_var("LOG_LEVEL") {
            config.log_level = level.to_lowercase();
        }
        if let Some(format) = env_var("LOG_FORMAT") {
            config.log_format = format.parse()?;
        }
        if let Some(table) = env_var("MIGRATIONS_TABLE") {
            config.migrations_table = Some(table);
        }
        if let Some(key) = parse_env("MIGRATION_LOCK_KEY", "migration_lock_key", "64-bit integer")? {
            config.migration_lock_key = Some(key);
        }
        if let Some(mode) = env_var("MIGRATION_VERIFY") {
            config.migration_verify = Some(mode.to_lowercase());
        }
        if let Some(secs) = parse_env::<u64>(
            "MIGRATION_STATEMENT_TIMEOUT_SECS",
            "migration_statement_timeout",
            "whole number of seconds",
        )? {
            config.migration_statement_timeout = Some(Duration::from_secs(secs));
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !self.environment.is_testing() && self.port == 0 {
            return Err(ConfigError::invalid_value(
                "port",
                self.port.to_string(),
                "port between 1 and 65535",
            ));
        }

        if !LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(ConfigError::invalid_value(
                "log_level",
                &self.log_level,
                format!("one of: {}", LOG_LEVELS.join(", ")),
            ));
        }

        if self.db_max_connections == 0 {
            return Err(ConfigError::invalid_value(
                "db_max_connections",
                "0",
                "positive integer",
            ));
        }

        if let Some(url) = &self.database_url {
            let parsed = Url::parse(url).map_err(|e| {
                ConfigError::invalid_value("database_url", "<redacted>", format!("valid URL ({})", e))
            })?;
            if !matches!(parsed.scheme(), "postgres" | "postgresql") {
                return Err(ConfigError::invalid_value(
                    "database_url",
                    parsed.scheme(),
                    "postgres:// or postgresql:// scheme",
                ));
            }
        }

        if let Some(table) = &self.migrations_table {
            let valid = table.len() <= 63
                && table.starts_with(|c: char| c.is_ascii_lowercase() || c == '_')
                && table
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
            if !valid {
                return Err(ConfigError::invalid_value(
                    "migrations_table",
                    table,
                    "lowercase SQL identifier of at most 63 characters",
                ));
            }
        }

        if let Some(mode) = &self.migration_verify {
            if !VERIFY_MODES.contains(&mode.as_str()) {
                return Err(ConfigError::invalid_value(
                    "migration_verify",
                    mode,
                    VERIFY_MODES.join(" or "),
                ));
            }
        }

        if self.migration_statement_timeout == Some(Duration::ZERO) {
            return Err(ConfigError::invalid_value(
                "migration_statement_timeout",
                "0",
                "at least one second, or unset for no timeout",
            ));
        }

        if self.environment.is_production() && self.database_url.is_none() {
            return Err(ConfigError::missing_required(
                "database_url",
                "DATABASE_URL environment variable is required in production",
            ));
        }

        Ok(())
    }

    fn config_sources(&self) -> HashMap<String, ConfigSource> {
        ENV_FIELDS
            .iter()
            .map(|(field, var, default)| {
                let source = if env_var(var).is_some() {
                    ConfigSource::EnvVar(var.to_string())
                } else {
                    ConfigSource::Default(default.to_string())
                };
                (field.to_string(), source)
            })
            .collect()
    }
}
