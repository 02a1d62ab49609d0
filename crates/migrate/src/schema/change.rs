//! Schema Change Primitives
//!
//! One variant per structural operation. Raw SQL is kept apart in the
//! explicitly named [`SchemaChange::Unsafe`] variant so that every other
//! code path stays fully typed.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use super::column::{ColumnSpec, IndexMethod};
use crate::error::{MigrationError, MigrationResult};

/// PostgreSQL truncates identifiers longer than this
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// A named column inside a CreateTable primitive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub spec: ColumnSpec,
}

impl ColumnDef {
    pub fn new(name: &str, spec: ColumnSpec) -> Self {
        Self {
            name: name.to_string(),
            spec,
        }
    }
}

/// A named index over one or more columns
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDef {
    pub name: String,
    pub table: String,
    pub columns: Vec<String>,
    pub unique: bool,
    pub method: Option<IndexMethod>,
}

impl IndexDef {
    pub fn new(name: &str, table: &str, columns: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            table: table.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            unique: false,
            method: None,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn using(mut self, method: IndexMethod) -> Self {
        self.method = Some(method);
        self
    }
}

/// Verbatim SQL executed without any validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawSql {
    pub sql: String,
    pub note: Option<String>,
}

impl RawSql {
    pub fn new<S: Into<String>>(sql: S) -> Self {
        Self {
            sql: sql.into(),
            note: None,
        }
    }

    pub fn with_note<S: Into<String>>(mut self, note: S) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// A single structural schema operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SchemaChange {
    CreateTable {
        table: String,
        columns: Vec<ColumnDef>,
    },
    AddColumn {
        table: String,
        column: String,
        spec: ColumnSpec,
    },
    DropColumn {
        table: String,
        column: String,
    },
    RenameColumn {
        table: String,
        from: String,
        to: String,
    },
    RenameTable {
        from: String,
        to: String,
    },
    DropTable {
        table: String,
    },
    AlterColumn {
        table: String,
        column: String,
        new: ColumnSpec,
        old: ColumnSpec,
    },
    AddIndex(IndexDef),
    DropIndex {
        name: String,
    },
    /// Escape hatch: statements the typed primitives cannot express
    Unsafe(RawSql),
}

impl SchemaChange {
    pub fn create_table(table: &str, columns: Vec<ColumnDef>) -> Self {
        SchemaChange::CreateTable {
            table: table.to_string(),
            columns,
        }
    }

    pub fn add_column(table: &str, column: &str, spec: ColumnSpec) -> Self {
        SchemaChange::AddColumn {
            table: table.to_string(),
            column: column.to_string(),
            spec,
        }
    }

    pub fn drop_column(table: &str, column: &str) -> Self {
        SchemaChange::DropColumn {
            table: table.to_string(),
            column: column.to_string(),
        }
    }

    pub fn rename_column(table: &str, from: &str, to: &str) -> Self {
        SchemaChange::RenameColumn {
            table: table.to_string(),
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    pub fn rename_table(from: &str, to: &str) -> Self {
        SchemaChange::RenameTable {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    pub fn drop_table(table: &str) -> Self {
        SchemaChange::DropTable {
            table: table.to_string(),
        }
    }

    pub fn alter_column(table: &str, column: &str, new: ColumnSpec, old: ColumnSpec) -> Self {
        SchemaChange::AlterColumn {
            table: table.to_string(),
            column: column.to_string(),
            new,
            old,
        }
    }

    pub fn raw_sql<S: Into<String>>(sql: S) -> Self {
        SchemaChange::Unsafe(RawSql::new(sql))
    }

    /// The table this change operates on, if any
    pub fn table(&self) -> Option<&str> {
        match self {
            SchemaChange::CreateTable { table, .. }
            | SchemaChange::AddColumn { table, .. }
            | SchemaChange::DropColumn { table, .. }
            | SchemaChange::RenameColumn { table, .. }
            | SchemaChange::DropTable { table }
            | SchemaChange::AlterColumn { table, .. } => Some(table),
            SchemaChange::RenameTable { from, .. } => Some(from),
            SchemaChange::AddIndex(index) => Some(&index.table),
            SchemaChange::DropIndex { .. } | SchemaChange::Unsafe(_) => None,
        }
    }

    pub fn is_unsafe(&self) -> bool {
        matches!(self, SchemaChange::Unsafe(_))
    }

    /// Check the primitive is well-formed before it ever reaches a store
    pub fn validate(&self) -> MigrationResult<()> {
        match self {
            SchemaChange::CreateTable { table, columns } => {
                validate_identifier(table)?;
                if columns.is_empty() {
                    return Err(MigrationError::invalid(format!(
                        "table '{}' must declare at least one column",
                        table
                    )));
                }
                let mut seen = HashSet::new();
                for column in columns {
                    validate_identifier(&column.name)?;
                    if !seen.insert(column.name.as_str()) {
                        return Err(MigrationError::invalid(format!(
                            "column '{}' declared twice in table '{}'",
                            column.name, table
                        )));
                    }
                    column.spec.validate(&column.name)?;
                    reject_self_reference(table, &column.name, &column.spec)?;
                }
                if columns.iter().filter(|c| c.spec.primary_key).count() > 1 {
                    return Err(MigrationError::invalid(format!(
                        "table '{}' declares more than one primary key column",
                        table
                    )));
                }
                Ok(())
            }
            SchemaChange::AddColumn {
                table,
                column,
                spec,
            } => {
                validate_identifier(table)?;
                validate_identifier(column)?;
                spec.validate(column)?;
                if spec.primary_key {
                    return Err(MigrationError::invalid(format!(
                        "primary key column '{}' can only be declared when creating '{}'",
                        column, table
                    )));
                }
                reject_self_reference(table, column, spec)
            }
            SchemaChange::DropColumn { table, column } => {
                validate_identifier(table)?;
                validate_identifier(column)
            }
            SchemaChange::RenameColumn { table, from, to } => {
                validate_identifier(table)?;
                validate_identifier(from)?;
                validate_identifier(to)?;
                if from == to {
                    return Err(MigrationError::invalid(format!(
                        "renaming '{}.{}' to itself",
                        table, from
                    )));
                }
                Ok(())
            }
            SchemaChange::RenameTable { from, to } => {
                validate_identifier(from)?;
                validate_identifier(to)?;
                if from == to {
                    return Err(MigrationError::invalid(format!(
                        "renaming table '{}' to itself",
                        from
                    )));
                }
                Ok(())
            }
            SchemaChange::DropTable { table } => validate_identifier(table),
            SchemaChange::AlterColumn {
                table,
                column,
                new,
                old,
            } => {
                validate_identifier(table)?;
                validate_identifier(column)?;
                new.validate(column)?;
                old.validate(column)?;
                if new == old {
                    return Err(MigrationError::invalid(format!(
                        "altering '{}.{}' changes nothing",
                        table, column
                    )));
                }
                if new.primary_key != old.primary_key {
                    return Err(MigrationError::invalid(format!(
                        "primary key membership of '{}.{}' cannot be altered",
                        table, column
                    )));
                }
                Ok(())
            }
            SchemaChange::AddIndex(index) => {
                validate_identifier(&index.name)?;
                validate_identifier(&index.table)?;
                if index.columns.is_empty() {
                    return Err(MigrationError::invalid(format!(
                        "index '{}' covers no columns",
                        index.name
                    )));
                }
                let mut seen = HashSet::new();
                for column in &index.columns {
                    validate_identifier(column)?;
                    if !seen.insert(column.as_str()) {
                        return Err(MigrationError::invalid(format!(
                            "index '{}' lists column '{}' twice",
                            index.name, column
                        )));
                    }
                }
                Ok(())
            }
            SchemaChange::DropIndex { name } => validate_identifier(name),
            SchemaChange::Unsafe(raw) => {
                if raw.sql.trim().is_empty() {
                    return Err(MigrationError::invalid("raw SQL block is empty"));
                }
                Ok(())
            }
        }
    }

    /// The structural inverse of this change, where one exists.
    ///
    /// Drops and raw SQL are irreversible and return `None`.
    pub fn reversed(&self) -> Option<SchemaChange> {
        match self {
            SchemaChange::CreateTable { table, .. } => Some(SchemaChange::drop_table(table)),
            SchemaChange::AddColumn { table, column, .. } => {
                Some(SchemaChange::drop_column(table, column))
            }
            SchemaChange::RenameColumn { table, from, to } => {
                Some(SchemaChange::rename_column(table, to, from))
            }
            SchemaChange::RenameTable { from, to } => Some(SchemaChange::rename_table(to, from)),
            SchemaChange::AlterColumn {
                table,
                column,
                new,
                old,
            } => Some(SchemaChange::alter_column(
                table,
                column,
                old.clone(),
                new.clone(),
            )),
            SchemaChange::AddIndex(index) => Some(SchemaChange::DropIndex {
                name: index.name.clone(),
            }),
            SchemaChange::DropColumn { .. }
            | SchemaChange::DropTable { .. }
            | SchemaChange::DropIndex { .. }
            | SchemaChange::Unsafe(_) => None,
        }
    }
}

impl fmt::Display for SchemaChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaChange::CreateTable { table, columns } => {
                write!(f, "create table {} ({} columns)", table, columns.len())
            }
            SchemaChange::AddColumn {
                table,
                column,
                spec,
            } => write!(
                f,
                "add column {}.{} {} (default {})",
                table,
                column,
                spec.column_type,
                spec.describe_default()
            ),
            SchemaChange::DropColumn { table, column } => {
                write!(f, "drop column {}.{}", table, column)
            }
            SchemaChange::RenameColumn { table, from, to } => {
                write!(f, "rename column {}.{} to {}", table, from, to)
            }
            SchemaChange::RenameTable { from, to } => write!(f, "rename table {} to {}", from, to),
            SchemaChange::DropTable { table } => write!(f, "drop table {}", table),
            SchemaChange::AlterColumn { table, column, .. } => {
                write!(f, "alter column {}.{}", table, column)
            }
            SchemaChange::AddIndex(index) => write!(
                f,
                "add {}index {} on {} ({})",
                if index.unique { "unique " } else { "" },
                index.name,
                index.table,
                index.columns.join(", ")
            ),
            SchemaChange::DropIndex { name } => write!(f, "drop index {}", name),
            SchemaChange::Unsafe(raw) => match &raw.note {
                Some(note) => write!(f, "raw SQL: {}", note),
                None => write!(f, "raw SQL"),
            },
        }
    }
}

/// Identifiers are matched exactly, so the only constraints are the ones
/// PostgreSQL itself imposes on quoted names.
pub fn validate_identifier(name: &str) -> MigrationResult<()> {
    if name.is_empty() {
        return Err(MigrationError::invalid("identifier must not be empty"));
    }
    if name.len() > MAX_IDENTIFIER_LEN {
        return Err(MigrationError::invalid(format!(
            "identifier '{}' exceeds {} bytes",
            name, MAX_IDENTIFIER_LEN
        )));
    }
    if name.contains('"') || name.contains('\0') {
        return Err(MigrationError::invalid(format!(
            "identifier '{}' contains a quote or NUL character",
            name
        )));
    }
    Ok(())
}

// A foreign key to its own table must be added nullable first and then
// retargeted with AlterColumn.
fn reject_self_reference(table: &str, column: &str, spec: &ColumnSpec) -> MigrationResult<()> {
    if spec.references_table(table) {
        return Err(MigrationError::invalid(format!(
            "'{}.{}' references its own table; add the column without the reference, \
             then retarget it with AlterColumn",
            table, column
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::column::OnDelete;

    #[test]
    fn test_single_phase_self_reference_rejected() {
        let change = SchemaChange::add_column(
            "location",
            "parent_id",
            ColumnSpec::big_integer()
                .nullable()
                .references("location", "id", OnDelete::Cascade),
        );
        let err = change.validate().unwrap_err();
        assert!(matches!(err, MigrationError::InvalidDefinition(_)));
        assert!(err.to_string().contains("AlterColumn"));

        // retargeting to self through AlterColumn is the supported path
        let alter = SchemaChange::alter_column(
            "location",
            "parent_id",
            ColumnSpec::big_integer()
                .nullable()
                .references("location", "id", OnDelete::Cascade),
            ColumnSpec::big_integer().nullable(),
        );
        assert!(alter.validate().is_ok());
    }

    #[test]
    fn test_create_table_rejects_duplicate_columns() {
        let change = SchemaChange::create_table(
            "plan",
            vec![
                ColumnDef::new("id", ColumnSpec::id()),
                ColumnDef::new("name", ColumnSpec::varchar(50)),
                ColumnDef::new("name", ColumnSpec::text()),
            ],
        );
        assert!(change.validate().is_err());
    }

    #[test]
    fn test_noop_alter_rejected() {
        let spec = ColumnSpec::varchar(20);
        let change = SchemaChange::alter_column("merchant", "name", spec.clone(), spec);
        assert!(change.validate().is_err());
    }

    #[test]
    fn test_identifier_rules() {
        assert!(validate_identifier("Merchant").is_ok());
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("bad\"name").is_err());
        assert!(validate_identifier(&"x".repeat(64)).is_err());
    }

    #[test]
    fn test_reversal() {
        let alter = SchemaChange::alter_column(
            "merchant",
            "name",
            ColumnSpec::varchar(20).nullable(),
            ColumnSpec::varchar(20),
        );
        match alter.reversed() {
            Some(SchemaChange::AlterColumn { new, old, .. }) => {
                assert!(!new.nullable);
                assert!(old.nullable);
            }
            other => panic!("unexpected reversal {:?}", other),
        }
        assert!(SchemaChange::drop_table("merchant").reversed().is_none());
        assert!(SchemaChange::raw_sql("SELECT 1").reversed().is_none());
    }
}
