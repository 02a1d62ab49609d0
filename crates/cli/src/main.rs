mod commands;

use clap::{Parser, Subcommand};
use paydesk_core::{init_logging, AppConfig, AppConfigTrait, LoggingConfig};
use paydesk_migrate::backends::BackendType;
use std::path::PathBuf;

use commands::{config, migrate, serve, upload, Context};

#[derive(Parser)]
#[command(name = "paydesk")]
#[command(about = "Schema migrations and operational tooling for the merchant data layer")]
#[command(version)]
struct Cli {
    /// Migration store: postgres, or memory to check the catalog without a database
    #[arg(long, global = true, default_value = "postgres")]
    backend: BackendType,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Schema migration management
    Migrate {
        #[command(subcommand)]
        migrate_command: MigrateCommands,
    },

    /// Serve the liveness and readiness endpoints
    Serve,

    /// Upload a file to the configured blob store
    Upload {
        /// File to upload
        file: PathBuf,

        /// Target container
        #[arg(long)]
        container: String,

        /// Blob name (defaults to the file name)
        #[arg(long)]
        name: Option<String>,
    },

    /// Show the effective configuration and where each value came from
    Config,
}

#[derive(Subcommand)]
enum MigrateCommands {
    /// Apply pending migrations
    Run {
        /// Stop after this migration id
        #[arg(long)]
        until: Option<String>,

        /// Give up if the migration lock is not acquired within this many seconds
        #[arg(long)]
        lock_timeout: Option<u64>,
    },

    /// Show every migration and whether it is applied
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List the migrations `run` would apply
    Plan {
        /// Stop after this migration id
        #[arg(long)]
        until: Option<String>,

        /// Include the SQL of each migration
        #[arg(long)]
        sql: bool,
    },

    /// Print the SQL of one migration
    Sql {
        /// Migration id
        id: String,
    },

    /// Print a fresh migration id for a slug
    NewId {
        /// Lowercase snake_case description, e.g. add_merchant_vat
        slug: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let app_config = AppConfig::from_env()?;
    init_logging(
        LoggingConfig::from_app_config(&app_config)
            .with_service("paydesk", paydesk_core::VERSION),
    )?;

    let context = Context::new(app_config, cli.backend);

    match cli.command {
        Commands::Migrate { migrate_command } => match migrate_command {
            MigrateCommands::Run {
                until,
                lock_timeout,
            } => migrate::run(&context, until, lock_timeout).await?,
            MigrateCommands::Status { json } => migrate::status(&context, json).await?,
            MigrateCommands::Plan { until, sql } => migrate::plan(&context, until, sql).await?,
            MigrateCommands::Sql { id } => migrate::sql(&id)?,
            MigrateCommands::NewId { slug } => migrate::new_id(&slug)?,
        },
        Commands::Serve => serve::run(&context).await?,
        Commands::Upload {
            file,
            container,
            name,
        } => upload::run(&file, &container, name.as_deref()).await?,
        Commands::Config => config::show(&context)?,
    }

    Ok(())
}
