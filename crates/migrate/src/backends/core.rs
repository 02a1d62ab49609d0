//! Core Migration Backend Traits
//!
//! These traits abstract the store a migration run talks to: the run lock,
//! the history table, and transactional schema editing. PostgreSQL is the
//! production implementation; the in-memory backend mirrors its semantics
//! for tests.

use async_trait::async_trait;
use std::time::Duration;

use crate::definitions::AppliedMigrationRecord;
use crate::error::MigrationResult;
use crate::schema::{ColumnShape, SchemaChange};

/// Applies schema changes and answers introspection questions
#[async_trait]
pub trait SchemaEditor: Send {
    /// Apply exactly one schema change
    async fn apply(&mut self, change: &SchemaChange) -> MigrationResult<()>;

    /// Execute a raw statement and return the number of affected rows
    async fn execute_raw(&mut self, sql: &str) -> MigrationResult<u64>;

    async fn table_exists(&mut self, table: &str) -> MigrationResult<bool>;

    /// Shape of a live column, or `None` if the column is absent
    async fn column_shape(&mut self, table: &str, column: &str)
        -> MigrationResult<Option<ColumnShape>>;

    async fn index_exists(&mut self, name: &str) -> MigrationResult<bool>;

    /// Objects that would block dropping the column: multi-column indexes,
    /// multi-column constraints and foreign keys from other columns
    async fn column_dependents(&mut self, table: &str, column: &str)
        -> MigrationResult<Vec<String>>;

    /// Foreign keys in other tables that reference this table
    async fn table_dependents(&mut self, table: &str) -> MigrationResult<Vec<String>>;
}

/// The scope one unit is applied in
#[async_trait]
pub trait MigrationTransaction: SchemaEditor {
    fn editor(&mut self) -> &mut dyn SchemaEditor;

    /// Write the unit's history row; for atomic units it commits with the
    /// schema changes
    async fn record_applied(
        &mut self,
        table: &str,
        record: &AppliedMigrationRecord,
    ) -> MigrationResult<()>;

    async fn commit(self: Box<Self>) -> MigrationResult<()>;

    async fn rollback(self: Box<Self>) -> MigrationResult<()>;
}

/// Exclusive run lock held for the duration of a run
#[async_trait]
pub trait MigrationLock: Send {
    async fn release(self: Box<Self>) -> MigrationResult<()>;
}

/// A store migrations can be applied to
#[async_trait]
pub trait MigrationBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Block until the run lock is held, or until `timeout` elapses
    async fn acquire_lock(
        &self,
        key: i64,
        timeout: Option<Duration>,
    ) -> MigrationResult<Box<dyn MigrationLock>>;

    async fn ensure_history_table(&self, table: &str) -> MigrationResult<()>;

    /// Applied records in application order
    async fn applied_records(&self, table: &str) -> MigrationResult<Vec<AppliedMigrationRecord>>;

    /// Open the scope for one unit. Non-atomic scopes publish each change
    /// as soon as it is applied.
    async fn begin(
        &self,
        atomic: bool,
        statement_timeout: Option<Duration>,
    ) -> MigrationResult<Box<dyn MigrationTransaction>>;
}
