//! Local table handles for data patches
//!
//! A [`TableHandle`] describes only the columns one migration touches. It is
//! declared next to the patch that uses it, never registered globally, and
//! refuses to render SQL that names a column it does not declare.

use super::sql::quote_ident;
use crate::error::{MigrationError, MigrationResult};

#[derive(Debug, Clone, Copy)]
pub struct TableHandle<'a> {
    table: &'a str,
    columns: &'a [&'a str],
}

impl<'a> TableHandle<'a> {
    pub const fn new(table: &'a str, columns: &'a [&'a str]) -> Self {
        Self { table, columns }
    }

    pub fn table(&self) -> &str {
        self.table
    }

    /// Quoted column name, checked against the declared set
    pub fn column(&self, name: &str) -> MigrationResult<String> {
        if self.columns.contains(&name) {
            Ok(quote_ident(name))
        } else {
            Err(MigrationError::invalid(format!(
                "column '{}' is not declared on handle for '{}'",
                name, self.table
            )))
        }
    }

    /// `UPDATE` with SQL expressions as right-hand sides
    pub fn update(
        &self,
        assignments: &[(&str, &str)],
        predicate: Option<&str>,
    ) -> MigrationResult<String> {
        if assignments.is_empty() {
            return Err(MigrationError::invalid(format!(
                "update of '{}' assigns nothing",
                self.table
            )));
        }
        let mut sets = Vec::with_capacity(assignments.len());
        for (column, expr) in assignments {
            sets.push(format!("{} = {}", self.column(column)?, expr));
        }
        let mut sql = format!("UPDATE {} SET {}", quote_ident(self.table), sets.join(", "));
        if let Some(predicate) = predicate {
            sql.push_str(" WHERE ");
            sql.push_str(predicate);
        }
        sql.push(';');
        Ok(sql)
    }
}
