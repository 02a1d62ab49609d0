//! Migration Definitions - shared types for running and tracking migrations
//!
//! Defines the configuration of the runner, the persisted record of an
//! applied unit, and the results the runner reports back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::error::MigrationError;
use crate::unit::{MigrationId, MigrationUnit, Namespace};

/// How AlterColumn treats its declared previous shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum VerificationMode {
    /// Mismatches fail the unit with `StaleAssumption`
    Strict,
    /// Mismatches are logged and the change proceeds
    #[default]
    Lenient,
}

impl FromStr for VerificationMode {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "strict" => Ok(VerificationMode::Strict),
            "lenient" => Ok(VerificationMode::Lenient),
            other => Err(MigrationError::invalid(format!(
                "unknown verification mode '{}', expected strict or lenient",
                other
            ))),
        }
    }
}

/// Configuration for the migration system
#[derive(Debug, Clone)]
pub struct MigrationConfig {
    /// Table name for tracking applied migrations
    pub migrations_table: String,
    /// Advisory lock key held for the duration of a run
    pub lock_key: i64,
    /// Give up waiting for the run lock after this long
    pub lock_timeout: Option<Duration>,
    /// Per-statement timeout applied inside each unit's transaction
    pub statement_timeout: Option<Duration>,
    pub verification: VerificationMode,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            migrations_table: "schema_migrations".to_string(),
            lock_key: 7_305_220_931,
            lock_timeout: None,
            statement_timeout: None,
            verification: VerificationMode::Lenient,
        }
    }
}

/// Persisted fact that a migration unit was applied
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedMigrationRecord {
    pub id: MigrationId,
    pub namespace: Namespace,
    pub description: String,
    pub applied_at: DateTime<Utc>,
    /// Run number; every unit applied by one run shares a batch
    pub batch: i32,
}

impl AppliedMigrationRecord {
    pub fn for_unit(unit: &MigrationUnit, batch: i32) -> Self {
        Self {
            id: unit.id().clone(),
            namespace: unit.namespace().clone(),
            description: unit.description().to_string(),
            applied_at: Utc::now(),
            batch,
        }
    }
}

/// How far a run should go
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MigrationTarget {
    #[default]
    Latest,
    /// Apply up to and including this unit in resolved order
    Until(MigrationId),
}

/// Result of running migrations
#[derive(Debug, Clone)]
pub struct MigrationRunResult {
    /// IDs of migrations that were applied, in order
    pub applied: Vec<MigrationId>,
    /// Number of migrations that were skipped (already applied)
    pub skipped_count: usize,
    /// Batch number assigned to this run, if anything was applied
    pub batch: Option<i32>,
    /// Total execution time in milliseconds
    pub execution_time_ms: u128,
}

impl MigrationRunResult {
    pub fn applied_count(&self) -> usize {
        self.applied.len()
    }
}

/// Migration status in the system
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum MigrationStatus {
    /// Migration is pending (not yet applied)
    Pending,
    /// Migration has been applied
    Applied {
        applied_at: DateTime<Utc>,
        batch: i32,
    },
}

/// One line of `status()` output
#[derive(Debug, Clone, Serialize)]
pub struct MigrationStatusEntry {
    pub id: MigrationId,
    pub namespace: Namespace,
    pub description: String,
    pub status: MigrationStatus,
}

impl MigrationStatusEntry {
    pub fn is_applied(&self) -> bool {
        matches!(self.status, MigrationStatus::Applied { .. })
    }
}
