pub mod config;
pub mod migrate;
pub mod serve;
pub mod upload;

use anyhow::Context as _;
use paydesk_core::AppConfig;
use paydesk_migrate::backends::BackendType;
use paydesk_migrate::{MigrationConfig, VerificationMode};

/// Settings shared by every command
pub struct Context {
    pub app: AppConfig,
    pub backend: BackendType,
}

impl Context {
    pub fn new(app: AppConfig, backend: BackendType) -> Self {
        Self { app, backend }
    }

    /// Runner configuration with the process settings laid over the engine defaults
    pub fn migration_config(&self) -> anyhow::Result<MigrationConfig> {
        let mut config = MigrationConfig::default();

        if let Some(table) = &self.app.migrations_table {
            config.migrations_table = table.clone();
        }
        if let Some(key) = self.app.migration_lock_key {
            config.lock_key = key;
        }
        if let Some(mode) = &self.app.migration_verify {
            config.verification = mode
                .parse::<VerificationMode>()
                .context("invalid MIGRATION_VERIFY")?;
        }
        config.statement_timeout = self.app.migration_statement_timeout;

        Ok(config)
    }
}
