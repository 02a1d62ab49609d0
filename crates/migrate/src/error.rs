//! Error types for the migration engine
//!
//! Every failure the engine can surface is a variant of [`MigrationError`].
//! Primitive-level failures abort the enclosing unit; the runner wraps them
//! with the failing unit's id and description before handing them back.

use thiserror::Error;

/// Result type alias for migration operations
pub type MigrationResult<T> = Result<T, MigrationError>;

/// Error types for migration operations
#[derive(Debug, Error)]
pub enum MigrationError {
    /// The object a primitive creates already exists, or the object it
    /// targets is already absent.
    #[error("Schema conflict: {0}")]
    SchemaConflict(String),

    /// A drop is blocked by a foreign key, index or constraint.
    #[error("Dependency violation: {0}")]
    DependencyViolation(String),

    #[error("Circular dependency detected: {cycle}")]
    CycleDetected { cycle: String },

    #[error("Migration {unit} depends on unknown migration {dependency}")]
    UnknownDependency { unit: String, dependency: String },

    #[error("Migration {0} is registered more than once")]
    DuplicateMigration(String),

    #[error("Migration not found: {0}")]
    UnknownMigration(String),

    /// An applied migration depends on one that is not applied.
    #[error("Inconsistent migration history: {applied} is applied but its dependency {dependency} is not")]
    InconsistentHistory { applied: String, dependency: String },

    /// AlterColumn's declared previous shape does not match the live column.
    #[error("Stale assumption on {table}.{column}: {detail}")]
    StaleAssumption {
        table: String,
        column: String,
        detail: String,
    },

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Could not acquire migration lock: {0}")]
    LockUnavailable(String),

    /// Rejected while building a unit, before anything touches the store.
    #[error("Invalid migration definition: {0}")]
    InvalidDefinition(String),

    #[error("Database error: {0}")]
    Database(String),

    /// The first step of a unit failed; nothing was applied.
    #[error("Migration {id} ({description}) failed: {source}")]
    ApplyFailed {
        id: String,
        description: String,
        #[source]
        source: Box<MigrationError>,
    },

    /// A later step of a unit failed after earlier steps ran. The unit's
    /// transaction was rolled back.
    #[error("Migration {id} ({description}) aborted after {completed_steps} step(s): {source}")]
    PartialApplyAborted {
        id: String,
        description: String,
        completed_steps: usize,
        #[source]
        source: Box<MigrationError>,
    },
}

impl MigrationError {
    /// Create an invalid definition error
    pub fn invalid<T: Into<String>>(message: T) -> Self {
        MigrationError::InvalidDefinition(message.into())
    }

    /// Create a schema conflict error
    pub fn conflict<T: Into<String>>(message: T) -> Self {
        MigrationError::SchemaConflict(message.into())
    }

    /// Create a dependency violation error
    pub fn dependency_violation<T: Into<String>>(message: T) -> Self {
        MigrationError::DependencyViolation(message.into())
    }

    /// Wrap a step failure with the identity of the unit it belongs to
    pub fn for_unit(self, id: &str, description: &str, completed_steps: usize) -> Self {
        let source = Box::new(self);
        if completed_steps == 0 {
            MigrationError::ApplyFailed {
                id: id.to_string(),
                description: description.to_string(),
                source,
            }
        } else {
            MigrationError::PartialApplyAborted {
                id: id.to_string(),
                description: description.to_string(),
                completed_steps,
                source,
            }
        }
    }

    /// Errors raised by the resolver before any unit runs
    pub fn is_resolution_error(&self) -> bool {
        matches!(
            self,
            MigrationError::CycleDetected { .. }
                | MigrationError::UnknownDependency { .. }
                | MigrationError::DuplicateMigration(_)
                | MigrationError::InconsistentHistory { .. }
        )
    }

    /// The innermost error, looking through unit wrappers
    pub fn root_cause(&self) -> &MigrationError {
        match self {
            MigrationError::ApplyFailed { source, .. }
            | MigrationError::PartialApplyAborted { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

// Convert from sqlx errors, classifying by SQLSTATE where PostgreSQL reports one
impl From<sqlx::Error> for MigrationError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string()).unwrap_or_default();
                classify_sqlstate(&code, db_err.message())
            }
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => MigrationError::StorageUnavailable(err.to_string()),
            _ => MigrationError::Database(err.to_string()),
        }
    }
}

/// Map a PostgreSQL SQLSTATE code onto the engine's error kinds
pub fn classify_sqlstate(code: &str, message: &str) -> MigrationError {
    match code {
        // duplicate_table, duplicate_column, duplicate_object
        "42P07" | "42701" | "42710" => MigrationError::SchemaConflict(message.to_string()),
        // undefined_table, undefined_column, undefined_object
        "42P01" | "42703" | "42704" => MigrationError::SchemaConflict(message.to_string()),
        // dependent_objects_still_exist, foreign_key_violation
        "2BP01" | "23503" => MigrationError::DependencyViolation(message.to_string()),
        c if c.starts_with("08") => MigrationError::StorageUnavailable(message.to_string()),
        c if c.is_empty() => MigrationError::Database(message.to_string()),
        c => MigrationError::Database(format!("[{}] {}", c, message)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlstate_classification() {
        assert!(matches!(
            classify_sqlstate("42701", "column exists"),
            MigrationError::SchemaConflict(_)
        ));
        assert!(matches!(
            classify_sqlstate("2BP01", "cannot drop"),
            MigrationError::DependencyViolation(_)
        ));
        assert!(matches!(
            classify_sqlstate("08006", "connection failure"),
            MigrationError::StorageUnavailable(_)
        ));
        match classify_sqlstate("57014", "canceling statement due to statement timeout") {
            MigrationError::Database(msg) => assert!(msg.contains("57014")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unit_wrapping_distinguishes_partial_apply() {
        let first = MigrationError::conflict("x").for_unit("20240101_000000_a", "a", 0);
        assert!(matches!(first, MigrationError::ApplyFailed { .. }));

        let later = MigrationError::conflict("x").for_unit("20240101_000000_a", "a", 2);
        assert!(matches!(
            later,
            MigrationError::PartialApplyAborted { completed_steps: 2, .. }
        ));
        assert!(matches!(later.root_cause(), MigrationError::SchemaConflict(_)));
        assert!(later.to_string().contains("20240101_000000_a"));
    }
}
