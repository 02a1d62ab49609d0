use paydesk_core::AppConfigTrait;

use super::Context;

/// Print the effective configuration with each value's source
pub fn show(context: &Context) -> anyhow::Result<()> {
    for line in render(context)? {
        println!("{}", line);
    }
    Ok(())
}

fn render(context: &Context) -> anyhow::Result<Vec<String>> {
    let app = &context.app;
    let migration = context.migration_config()?;
    let sources = app.config_sources();
    let source = |field: &str| {
        sources
            .get(field)
            .map(|s| s.description())
            .unwrap_or_default()
    };

    let statement_timeout = migration
        .statement_timeout
        .map(|t| format!("{}s", t.as_secs()))
        .unwrap_or_else(|| "none".to_string());

    Ok(vec![
        "Configuration:".to_string(),
        format!("  environment        = {} ({})", app.environment, source("environment")),
        format!("  bind_address       = {}", app.bind_address()),
        format!(
            "  database_url       = {} ({})",
            app.redacted_database_url().unwrap_or_else(|| "<unset>".to_string()),
            source("database_url")
        ),
        format!("  db_max_connections = {}", app.db_max_connections),
        format!("  log_level          = {} ({})", app.log_level, source("log_level")),
        format!("  log_format         = {}", app.log_format),
        format!("  backend            = {}", context.backend),
        "Migrations:".to_string(),
        format!("  table              = {}", migration.migrations_table),
        format!("  lock_key           = {}", migration.lock_key),
        format!("  verification       = {:?}", migration.verification),
        format!("  statement_timeout  = {}", statement_timeout),
    ])
}
