//! # paydesk-migrate: forward-only schema migrations
//!
//! Typed schema change primitives grouped into timestamp-identified units,
//! a dependency resolver that orders units across namespaces, and a runner
//! that applies pending units under an exclusive lock while recording each
//! one as it completes.
//!
//! ```no_run
//! use paydesk_migrate::{
//!     ColumnSpec, MemoryBackend, MigrationRegistry, MigrationRunner, MigrationTarget,
//!     MigrationUnit,
//! };
//!
//! # async fn example() -> paydesk_migrate::MigrationResult<()> {
//! let mut registry = MigrationRegistry::new();
//! registry.register(
//!     MigrationUnit::builder("merchant_data", "20240101_120000_create_merchant", "Create merchant")
//!         .create_table("merchant", |t| {
//!             t.id().column("name", ColumnSpec::varchar(255));
//!         })
//!         .build()?,
//! )?;
//!
//! let runner = MigrationRunner::new(MemoryBackend::new(), registry);
//! let result = runner.run(&MigrationTarget::Latest).await?;
//! assert_eq!(result.applied_count(), 1);
//! # Ok(())
//! # }
//! ```

pub mod backends;
pub mod definitions;
pub mod error;
pub mod executor;
pub mod graph;
pub mod registry;
pub mod runner;
pub mod schema;
pub mod unit;

pub use backends::{
    MemoryBackend, MigrationBackend, MigrationLock, MigrationTransaction, PostgresBackend,
    SchemaEditor,
};
pub use definitions::{
    AppliedMigrationRecord, MigrationConfig, MigrationRunResult, MigrationStatus,
    MigrationStatusEntry, MigrationTarget, VerificationMode,
};
pub use error::{MigrationError, MigrationResult};
pub use executor::SchemaExecutor;
pub use graph::{resolve_order, DependencyGraph};
pub use registry::{MigrationProvider, MigrationRegistry};
pub use runner::MigrationRunner;
pub use schema::{
    ColumnDef, ColumnDefault, ColumnShape, ColumnSpec, ColumnType, DefaultShape, ForeignKey,
    IndexDef, IndexMethod, OnDelete, RawSql, SchemaChange, TableHandle,
};
pub use unit::{
    DataPatch, MigrationId, MigrationUnit, MigrationUnitBuilder, Namespace, SqlPatch, Step,
    TableBuilder,
};
