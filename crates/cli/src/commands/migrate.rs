use std::time::Duration;

use anyhow::Context as _;
use paydesk_migrate::backends::BackendType;
use paydesk_migrate::{
    MemoryBackend, MigrationBackend, MigrationConfig, MigrationId, MigrationRunner,
    MigrationStatus, MigrationTarget, PostgresBackend,
};

use super::Context;

/// Apply pending migrations up to `until`, or all of them
pub async fn run(
    context: &Context,
    until: Option<String>,
    lock_timeout: Option<u64>,
) -> anyhow::Result<()> {
    let target = parse_target(until.as_deref())?;
    let mut config = context.migration_config()?;
    if let Some(secs) = lock_timeout {
        config.lock_timeout = Some(Duration::from_secs(secs));
    }

    match context.backend {
        BackendType::Postgres => run_with(connect(context).await?, config, &target).await,
        BackendType::Memory => run_with(MemoryBackend::new(), config, &target).await,
    }
}

async fn run_with<B: MigrationBackend>(
    backend: B,
    config: MigrationConfig,
    target: &MigrationTarget,
) -> anyhow::Result<()> {
    let runner = MigrationRunner::new(backend, paydesk_schema::registry()?).with_config(config);
    let result = runner.run(target).await?;

    if result.applied.is_empty() {
        println!("Nothing to migrate ({} already applied)", result.skipped_count);
        return Ok(());
    }

    for id in &result.applied {
        println!("Applied: {}", id);
    }
    println!(
        "Applied {} migration(s) in batch {} ({} ms)",
        result.applied_count(),
        result.batch.unwrap_or_default(),
        result.execution_time_ms
    );
    Ok(())
}

/// Print every migration with its state
pub async fn status(context: &Context, json: bool) -> anyhow::Result<()> {
    let config = context.migration_config()?;
    match context.backend {
        BackendType::Postgres => status_with(connect(context).await?, config, json).await,
        BackendType::Memory => status_with(MemoryBackend::new(), config, json).await,
    }
}

async fn status_with<B: MigrationBackend>(
    backend: B,
    config: MigrationConfig,
    json: bool,
) -> anyhow::Result<()> {
    let runner = MigrationRunner::new(backend, paydesk_schema::registry()?).with_config(config);
    let entries = runner.status().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    println!("Migration Status:");
    for entry in &entries {
        let state = match &entry.status {
            MigrationStatus::Pending => "pending".to_string(),
            MigrationStatus::Applied { applied_at, batch } => format!(
                "applied {} (batch {})",
                applied_at.format("%Y-%m-%d %H:%M:%S UTC"),
                batch
            ),
        };
        println!("  [{}] {} {}", entry.namespace, entry.id, state);
    }

    let applied = entries.iter().filter(|e| e.is_applied()).count();
    println!("{} applied, {} pending", applied, entries.len() - applied);
    Ok(())
}

/// List what `run` would apply without touching the schema
pub async fn plan(context: &Context, until: Option<String>, sql: bool) -> anyhow::Result<()> {
    let target = parse_target(until.as_deref())?;
    let config = context.migration_config()?;
    match context.backend {
        BackendType::Postgres => plan_with(connect(context).await?, config, &target, sql).await,
        BackendType::Memory => plan_with(MemoryBackend::new(), config, &target, sql).await,
    }
}

async fn plan_with<B: MigrationBackend>(
    backend: B,
    config: MigrationConfig,
    target: &MigrationTarget,
    sql: bool,
) -> anyhow::Result<()> {
    let runner = MigrationRunner::new(backend, paydesk_schema::registry()?).with_config(config);
    let pending = runner.plan(target).await?;

    if pending.is_empty() {
        println!("No pending migrations");
        return Ok(());
    }

    println!("{} pending migration(s):", pending.len());
    for unit in pending {
        println!("  [{}] {} {}", unit.namespace(), unit.id(), unit.description());
        if sql {
            for statement in unit.sql_preview() {
                println!("      {}", statement);
            }
        }
    }
    Ok(())
}

/// Print the SQL one migration renders to. Needs no database.
pub fn sql(id: &str) -> anyhow::Result<()> {
    let id = MigrationId::new(id)?;
    let runner = MigrationRunner::new(MemoryBackend::new(), paydesk_schema::registry()?);
    for statement in runner.sql_for(&id)? {
        println!("{};", statement.trim_end_matches(';'));
    }
    Ok(())
}

/// Print a fresh timestamped id for a new migration
pub fn new_id(slug: &str) -> anyhow::Result<()> {
    println!("{}", MigrationId::generate(slug)?);
    Ok(())
}

fn parse_target(until: Option<&str>) -> anyhow::Result<MigrationTarget> {
    Ok(match until {
        Some(id) => MigrationTarget::Until(
            MigrationId::new(id).with_context(|| format!("invalid --until value '{}'", id))?,
        ),
        None => MigrationTarget::Latest,
    })
}

async fn connect(context: &Context) -> anyhow::Result<PostgresBackend> {
    let url = context.app.require_database_url()?;
    tracing::debug!(
        database = context.app.redacted_database_url().as_deref().unwrap_or_default(),
        "connecting to migration store"
    );
    Ok(PostgresBackend::connect(url, context.app.db_max_connections).await?)
}
