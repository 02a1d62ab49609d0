//! Schema Change Primitive executor
//!
//! Checks each primitive's preconditions against the live schema so that
//! failures carry a precise error kind, then hands the change to the
//! editor. The store remains the final authority: a change that passes
//! these checks can still be rejected by it.

use crate::backends::SchemaEditor;
use crate::definitions::VerificationMode;
use crate::error::{MigrationError, MigrationResult};
use crate::schema::{ColumnSpec, SchemaChange};

#[derive(Debug, Clone, Copy, Default)]
pub struct SchemaExecutor {
    mode: VerificationMode,
}

impl SchemaExecutor {
    pub fn new(mode: VerificationMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> VerificationMode {
        self.mode
    }

    pub async fn execute(
        &self,
        editor: &mut dyn SchemaEditor,
        change: &SchemaChange,
    ) -> MigrationResult<()> {
        self.check_preconditions(editor, change).await?;
        match change {
            SchemaChange::Unsafe(raw) => {
                tracing::info!(
                    note = raw.note.as_deref().unwrap_or("none"),
                    "executing raw SQL block"
                );
            }
            SchemaChange::AlterColumn {
                table,
                column,
                new,
                old,
            } => {
                let live_old = self
                    .verify_previous_shape(editor, table, column, old, new)
                    .await?;
                if let Some(live_old) = live_old {
                    let reconciled = SchemaChange::AlterColumn {
                        table: table.clone(),
                        column: column.clone(),
                        new: new.clone(),
                        old: live_old,
                    };
                    return editor.apply(&reconciled).await;
                }
            }
            _ => {}
        }
        editor.apply(change).await
    }

    async fn check_preconditions(
        &self,
        editor: &mut dyn SchemaEditor,
        change: &SchemaChange,
    ) -> MigrationResult<()> {
        match change {
            SchemaChange::CreateTable { table, .. } => {
                if editor.table_exists(table).await? {
                    return Err(MigrationError::conflict(format!(
                        "table '{}' already exists",
                        table
                    )));
                }
            }
            SchemaChange::AddColumn { table, column, .. } => {
                require_table(editor, table).await?;
                if editor.column_shape(table, column).await?.is_some() {
                    return Err(MigrationError::conflict(format!(
                        "column '{}.{}' already exists",
                        table, column
                    )));
                }
            }
            SchemaChange::DropColumn { table, column } => {
                require_column(editor, table, column).await?;
                let dependents = editor.column_dependents(table, column).await?;
                if !dependents.is_empty() {
                    return Err(MigrationError::dependency_violation(format!(
                        "column '{}.{}' is still used by {}",
                        table,
                        column,
                        dependents.join(", ")
                    )));
                }
            }
            SchemaChange::RenameColumn { table, from, to } => {
                require_column(editor, table, from).await?;
                if editor.column_shape(table, to).await?.is_some() {
                    return Err(MigrationError::conflict(format!(
                        "cannot rename '{}.{}': column '{}' already exists",
                        table, from, to
                    )));
                }
            }
            SchemaChange::RenameTable { from, to } => {
                require_table(editor, from).await?;
                if editor.table_exists(to).await? {
                    return Err(MigrationError::conflict(format!(
                        "cannot rename '{}': table '{}' already exists",
                        from, to
                    )));
                }
            }
            SchemaChange::DropTable { table } => {
                require_table(editor, table).await?;
                let dependents = editor.table_dependents(table).await?;
                if !dependents.is_empty() {
                    return Err(MigrationError::dependency_violation(format!(
                        "table '{}' is still referenced by {}",
                        table,
                        dependents.join(", ")
                    )));
                }
            }
            SchemaChange::AlterColumn { table, column, .. } => {
                require_column(editor, table, column).await?;
            }
            SchemaChange::AddIndex(index) => {
                if editor.index_exists(&index.name).await? {
                    return Err(MigrationError::conflict(format!(
                        "index '{}' already exists",
                        index.name
                    )));
                }
                for column in &index.columns {
                    require_column(editor, &index.table, column).await?;
                }
            }
            SchemaChange::DropIndex { name } => {
                if !editor.index_exists(name).await? {
                    return Err(MigrationError::conflict(format!(
                        "index '{}' does not exist",
                        name
                    )));
                }
            }
            SchemaChange::Unsafe(_) => {}
        }
        Ok(())
    }

    /// Compare the declared previous state with the live column. In
    /// lenient mode a mismatch yields the previous state rebuilt from the
    /// live column, so the change is rendered against what is really there.
    async fn verify_previous_shape(
        &self,
        editor: &mut dyn SchemaEditor,
        table: &str,
        column: &str,
        old: &ColumnSpec,
        new: &ColumnSpec,
    ) -> MigrationResult<Option<ColumnSpec>> {
        let live = editor
            .column_shape(table, column)
            .await?
            .ok_or_else(|| {
                MigrationError::conflict(format!("column '{}.{}' does not exist", table, column))
            })?;

        let differences = old
            .shape()
            .differences(&live, old.secret || new.secret);
        if differences.is_empty() {
            return Ok(None);
        }

        let detail = format!("declared vs live: {}", differences.join("; "));
        match self.mode {
            VerificationMode::Strict => Err(MigrationError::StaleAssumption {
                table: table.to_string(),
                column: column.to_string(),
                detail,
            }),
            VerificationMode::Lenient => {
                tracing::warn!(
                    table,
                    column,
                    %detail,
                    "previous column shape does not match; altering from the live shape"
                );
                Ok(Some(old.reconciled(new, &live)))
            }
        }
    }
}

async fn require_table(editor: &mut dyn SchemaEditor, table: &str) -> MigrationResult<()> {
    if editor.table_exists(table).await? {
        Ok(())
    } else {
        Err(MigrationError::conflict(format!(
            "table '{}' does not exist",
            table
        )))
    }
}

async fn require_column(
    editor: &mut dyn SchemaEditor,
    table: &str,
    column: &str,
) -> MigrationResult<()> {
    require_table(editor, table).await?;
    if editor.column_shape(table, column).await?.is_some() {
        Ok(())
    } else {
        Err(MigrationError::conflict(format!(
            "column '{}.{}' does not exist",
            table, column
        )))
    }
}
