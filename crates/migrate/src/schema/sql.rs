//! Schema Builder - renders schema change primitives as PostgreSQL statements
//!
//! Constraint and index names follow PostgreSQL's implicit naming
//! (`{table}_{column}_key`, `_fkey`, `_idx`, `{table}_pkey`) but are always
//! spelled out, so later migrations can address them predictably.

use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::tokenizer::{Location, Token, Tokenizer};

use super::change::{ColumnDef, IndexDef, SchemaChange, MAX_IDENTIFIER_LEN};
use super::column::{ColumnSpec, ForeignKey};

/// Quote an identifier for PostgreSQL
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Derived object name, truncated the way PostgreSQL truncates identifiers
pub fn derived_name(table: &str, column: &str, suffix: &str) -> String {
    truncate_identifier(format!("{}_{}_{}", table, column, suffix))
}

pub fn unique_constraint_name(table: &str, column: &str) -> String {
    derived_name(table, column, "key")
}

pub fn foreign_key_name(table: &str, column: &str) -> String {
    derived_name(table, column, "fkey")
}

pub fn index_name(table: &str, column: &str) -> String {
    derived_name(table, column, "idx")
}

pub fn primary_key_name(table: &str) -> String {
    truncate_identifier(format!("{}_pkey", table))
}

fn truncate_identifier(mut name: String) -> String {
    if name.len() > MAX_IDENTIFIER_LEN {
        let mut cut = MAX_IDENTIFIER_LEN;
        while !name.is_char_boundary(cut) {
            cut -= 1;
        }
        name.truncate(cut);
    }
    name
}

/// Accumulates the statements for a sequence of schema changes
pub struct SchemaBuilder {
    statements: Vec<String>,
}

impl SchemaBuilder {
    /// Create a new schema builder
    pub fn new() -> Self {
        Self {
            statements: Vec::new(),
        }
    }

    /// Append the statements for one change
    pub fn push(&mut self, change: &SchemaChange) -> &mut Self {
        match change {
            SchemaChange::CreateTable { table, columns } => self.create_table(table, columns),
            SchemaChange::AddColumn {
                table,
                column,
                spec,
            } => self.add_column(table, column, spec),
            SchemaChange::DropColumn { table, column } => self.drop_column(table, column),
            SchemaChange::RenameColumn { table, from, to } => self.rename_column(table, from, to),
            SchemaChange::RenameTable { from, to } => self.rename_table(from, to),
            SchemaChange::DropTable { table } => self.drop_table(table),
            SchemaChange::AlterColumn {
                table,
                column,
                new,
                old,
            } => self.alter_column(table, column, new, old),
            SchemaChange::AddIndex(index) => self.create_index(index),
            SchemaChange::DropIndex { name } => self.drop_index(name),
            SchemaChange::Unsafe(raw) => {
                self.statements.extend(split_sql_statements(&raw.sql));
                self
            }
        }
    }

    /// Create a new table, with per-column indexes as separate statements
    pub fn create_table(&mut self, table: &str, columns: &[ColumnDef]) -> &mut Self {
        let mut parts: Vec<String> = columns
            .iter()
            .map(|c| column_definition(table, &c.name, &c.spec))
            .collect();

        let pk: Vec<&ColumnDef> = columns.iter().filter(|c| c.spec.primary_key).collect();
        if let Some(pk) = pk.first() {
            parts.push(format!(
                "CONSTRAINT {} PRIMARY KEY ({})",
                quote_ident(&primary_key_name(table)),
                quote_ident(&pk.name)
            ));
        }

        self.statements.push(format!(
            "CREATE TABLE {} (\n    {}\n);",
            quote_ident(table),
            parts.join(",\n    ")
        ));

        for column in columns.iter().filter(|c| c.spec.indexed) {
            self.statements
                .push(create_column_index_sql(table, &column.name, &column.spec));
        }
        self
    }

    /// Drop a table
    pub fn drop_table(&mut self, table: &str) -> &mut Self {
        self.statements
            .push(format!("DROP TABLE {};", quote_ident(table)));
        self
    }

    /// Add a column to an existing table
    pub fn add_column(&mut self, table: &str, column: &str, spec: &ColumnSpec) -> &mut Self {
        self.statements.push(format!(
            "ALTER TABLE {} ADD COLUMN {};",
            quote_ident(table),
            column_definition(table, column, spec)
        ));
        if spec.indexed {
            self.statements
                .push(create_column_index_sql(table, column, spec));
        }
        self
    }

    /// Drop a column from an existing table
    pub fn drop_column(&mut self, table: &str, column: &str) -> &mut Self {
        self.statements.push(format!(
            "ALTER TABLE {} DROP COLUMN {};",
            quote_ident(table),
            quote_ident(column)
        ));
        self
    }

    pub fn rename_column(&mut self, table: &str, from: &str, to: &str) -> &mut Self {
        self.statements.push(format!(
            "ALTER TABLE {} RENAME COLUMN {} TO {};",
            quote_ident(table),
            quote_ident(from),
            quote_ident(to)
        ));
        self
    }

    pub fn rename_table(&mut self, from: &str, to: &str) -> &mut Self {
        self.statements.push(format!(
            "ALTER TABLE {} RENAME TO {};",
            quote_ident(from),
            quote_ident(to)
        ));
        self
    }

    /// Emit only the statements for attributes that differ between `old`
    /// and `new`. Constraints are dropped before the column is retyped and
    /// re-added afterwards; drops tolerate objects that are already gone.
    pub fn alter_column(
        &mut self,
        table: &str,
        column: &str,
        new: &ColumnSpec,
        old: &ColumnSpec,
    ) -> &mut Self {
        let t = quote_ident(table);
        let c = quote_ident(column);

        if old.references.is_some() && old.references != new.references {
            self.statements.push(format!(
                "ALTER TABLE {} DROP CONSTRAINT IF EXISTS {};",
                t,
                quote_ident(&foreign_key_name(table, column))
            ));
        }
        if old.unique && !new.unique {
            self.statements.push(format!(
                "ALTER TABLE {} DROP CONSTRAINT IF EXISTS {};",
                t,
                quote_ident(&unique_constraint_name(table, column))
            ));
        }
        let index_changed = old.indexed != new.indexed || old.index_method != new.index_method;
        if old.indexed && index_changed {
            self.statements.push(format!(
                "DROP INDEX IF EXISTS {};",
                quote_ident(&index_name(table, column))
            ));
        }

        if old.column_type != new.column_type {
            let ty = new.column_type.alter_sql();
            self.statements.push(format!(
                "ALTER TABLE {} ALTER COLUMN {} TYPE {} USING {}::{};",
                t, c, ty, c, ty
            ));
        }
        if old.nullable != new.nullable {
            self.statements.push(format!(
                "ALTER TABLE {} ALTER COLUMN {} {} NOT NULL;",
                t,
                c,
                if new.nullable { "DROP" } else { "SET" }
            ));
        }
        if old.default != new.default {
            match &new.default {
                Some(default) => self.statements.push(format!(
                    "ALTER TABLE {} ALTER COLUMN {} SET DEFAULT {};",
                    t,
                    c,
                    default.sql()
                )),
                None => self.statements.push(format!(
                    "ALTER TABLE {} ALTER COLUMN {} DROP DEFAULT;",
                    t, c
                )),
            }
        }

        if new.unique && !old.unique {
            self.statements.push(format!(
                "ALTER TABLE {} ADD CONSTRAINT {} UNIQUE ({});",
                t,
                quote_ident(&unique_constraint_name(table, column)),
                c
            ));
        }
        if new.indexed && index_changed {
            self.statements
                .push(create_column_index_sql(table, column, new));
        }
        if let Some(fk) = &new.references {
            if old.references.as_ref() != Some(fk) {
                self.statements.push(format!(
                    "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) {};",
                    t,
                    quote_ident(&foreign_key_name(table, column)),
                    c,
                    references_clause(fk)
                ));
            }
        }
        self
    }

    /// Create a named index
    pub fn create_index(&mut self, index: &IndexDef) -> &mut Self {
        let columns: Vec<String> = index.columns.iter().map(|c| quote_ident(c)).collect();
        let using = index
            .method
            .map(|m| format!(" USING {}", m.sql()))
            .unwrap_or_default();
        self.statements.push(format!(
            "CREATE {}INDEX {} ON {}{} ({});",
            if index.unique { "UNIQUE " } else { "" },
            quote_ident(&index.name),
            quote_ident(&index.table),
            using,
            columns.join(", ")
        ));
        self
    }

    /// Drop an index
    pub fn drop_index(&mut self, name: &str) -> &mut Self {
        self.statements
            .push(format!("DROP INDEX {};", quote_ident(name)));
        self
    }

    /// Get all SQL statements
    pub fn to_sql(&self) -> Vec<String> {
        self.statements.clone()
    }

    pub fn into_statements(self) -> Vec<String> {
        self.statements
    }

    /// All statements as a single SQL string
    pub fn build(&self) -> String {
        self.statements.join("\n")
    }
}

impl Default for SchemaBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Statements for a single change
pub fn render(change: &SchemaChange) -> Vec<String> {
    let mut builder = SchemaBuilder::new();
    builder.push(change);
    builder.into_statements()
}

fn column_definition(table: &str, column: &str, spec: &ColumnSpec) -> String {
    let mut def = format!("{} {}", quote_ident(column), spec.column_type.sql());
    if !spec.nullable {
        def.push_str(" NOT NULL");
    }
    if let Some(default) = &spec.default {
        def.push_str(&format!(" DEFAULT {}", default.sql()));
    }
    if spec.unique && !spec.primary_key {
        def.push_str(&format!(
            " CONSTRAINT {} UNIQUE",
            quote_ident(&unique_constraint_name(table, column))
        ));
    }
    if let Some(fk) = &spec.references {
        def.push_str(&format!(
            " CONSTRAINT {} {}",
            quote_ident(&foreign_key_name(table, column)),
            references_clause(fk)
        ));
    }
    def
}

fn references_clause(fk: &ForeignKey) -> String {
    format!(
        "REFERENCES {} ({}) ON DELETE {} DEFERRABLE INITIALLY DEFERRED",
        quote_ident(&fk.table),
        quote_ident(&fk.column),
        fk.on_delete.sql()
    )
}

fn create_column_index_sql(table: &str, column: &str, spec: &ColumnSpec) -> String {
    let using = spec
        .index_method
        .map(|m| format!(" USING {}", m.sql()))
        .unwrap_or_default();
    format!(
        "CREATE INDEX {} ON {}{} ({});",
        quote_ident(&index_name(table, column)),
        quote_ident(table),
        using,
        quote_ident(column)
    )
}

/// Split a block of SQL into statements on top-level semicolons.
///
/// Statements are sliced out of the source text unchanged, so quoted
/// literals and dollar-quoted bodies survive. Segments holding only
/// whitespace or comments are dropped.
pub fn split_sql_statements(sql: &str) -> Vec<String> {
    let dialect = PostgreSqlDialect {};
    let tokens = match Tokenizer::new(&dialect, sql).tokenize_with_location() {
        Ok(tokens) => tokens,
        Err(e) => {
            tracing::warn!("SQL tokenizing failed, keeping the block whole: {}", e);
            let whole = sql.trim();
            return if whole.is_empty() {
                Vec::new()
            } else {
                vec![whole.to_string()]
            };
        }
    };

    let line_starts: Vec<usize> = std::iter::once(0)
        .chain(sql.match_indices('\n').map(|(i, _)| i + 1))
        .collect();
    let byte_offset = |location: &Location| -> Option<usize> {
        let line_start = *line_starts.get((location.line as usize).checked_sub(1)?)?;
        let column = (location.column as usize).checked_sub(1)?;
        sql[line_start..]
            .char_indices()
            .nth(column)
            .map(|(i, _)| line_start + i)
    };

    let mut statements = Vec::new();
    let mut start = 0;
    let mut has_content = false;
    // start of the whitespace and comments after the last real token
    let mut trailing = None;
    for token in &tokens {
        match token.token {
            Token::SemiColon => {
                let Some(end) = byte_offset(&token.location) else {
                    continue;
                };
                if has_content {
                    statements.push(sql[start..=end].trim().to_string());
                }
                start = end + 1;
                has_content = false;
                trailing = None;
            }
            Token::Whitespace(_) | Token::EOF => {
                if has_content && trailing.is_none() {
                    trailing = byte_offset(&token.location);
                }
            }
            _ => {
                has_content = true;
                trailing = None;
            }
        }
    }
    let rest = sql[start..trailing.unwrap_or(sql.len())].trim();
    if has_content && !rest.is_empty() {
        statements.push(format!("{};", rest));
    }
    statements
}
