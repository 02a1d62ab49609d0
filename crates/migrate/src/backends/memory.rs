//! In-memory migration backend
//!
//! Models tables, columns, indexes and foreign keys closely enough to
//! reproduce the failures PostgreSQL would raise: conflicts on existing or
//! absent objects, blocked drops, and NOT NULL columns added over existing
//! rows. Raw SQL is recorded but not interpreted.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use super::core::{MigrationBackend, MigrationLock, MigrationTransaction, SchemaEditor};
use crate::definitions::AppliedMigrationRecord;
use crate::error::{classify_sqlstate, MigrationError, MigrationResult};
use crate::schema::sql::index_name;
use crate::schema::{ColumnDef, ColumnShape, ColumnSpec, IndexDef, SchemaChange};

/// A table as tracked by [`SchemaState`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryTable {
    columns: Vec<(String, ColumnSpec)>,
    rows: usize,
}

impl MemoryTable {
    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns
            .iter()
            .find(|(column, _)| column == name)
            .map(|(_, spec)| spec)
    }

    fn column_mut(&mut self, name: &str) -> Option<&mut ColumnSpec> {
        self.columns
            .iter_mut()
            .find(|(column, _)| column == name)
            .map(|(_, spec)| spec)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn row_count(&self) -> usize {
        self.rows
    }
}

/// Schema snapshot held by the in-memory backend
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaState {
    tables: BTreeMap<String, MemoryTable>,
    indexes: BTreeMap<String, IndexDef>,
}

impl SchemaState {
    pub fn table(&self, name: &str) -> Option<&MemoryTable> {
        self.tables.get(name)
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.tables.keys().map(String::as_str).collect()
    }

    pub fn column(&self, table: &str, column: &str) -> Option<&ColumnSpec> {
        self.tables.get(table).and_then(|t| t.column(column))
    }

    pub fn has_index(&self, name: &str) -> bool {
        if self.indexes.contains_key(name) {
            return true;
        }
        self.tables.iter().any(|(table, t)| {
            t.columns
                .iter()
                .any(|(column, spec)| spec.indexed && index_name(table, column) == name)
        })
    }

    pub fn column_shape(&self, table: &str, column: &str) -> Option<ColumnShape> {
        let spec = self.column(table, column)?;
        let mut shape = spec.shape();
        // a single-column unique index counts as uniqueness on the column
        shape.unique |= self.indexes.values().any(|index| {
            index.unique && index.table == table && index.columns == [column.to_string()]
        });
        Some(shape)
    }

    pub fn column_dependents(&self, table: &str, column: &str) -> Vec<String> {
        let mut dependents: Vec<String> = self
            .indexes
            .values()
            .filter(|index| {
                index.table == table
                    && index.columns.len() > 1
                    && index.columns.iter().any(|c| c == column)
            })
            .map(|index| format!("index {}", index.name))
            .collect();

        for (other_table, t) in &self.tables {
            for (other_column, spec) in &t.columns {
                if other_table == table && other_column == column {
                    continue;
                }
                if let Some(fk) = &spec.references {
                    if fk.table == table && fk.column == column {
                        dependents.push(format!("foreign key {}.{}", other_table, other_column));
                    }
                }
            }
        }
        dependents
    }

    pub fn table_dependents(&self, table: &str) -> Vec<String> {
        self.tables
            .iter()
            .filter(|(other_table, _)| other_table.as_str() != table)
            .flat_map(|(other_table, t)| {
                t.columns
                    .iter()
                    .filter(|(_, spec)| spec.references_table(table))
                    .map(move |(column, _)| format!("foreign key {}.{}", other_table, column))
            })
            .collect()
    }

    fn table_mut(&mut self, table: &str) -> MigrationResult<&mut MemoryTable> {
        self.tables
            .get_mut(table)
            .ok_or_else(|| undefined_table(table))
    }

    fn check_reference(&self, spec: &ColumnSpec) -> MigrationResult<()> {
        if let Some(fk) = &spec.references {
            match self.tables.get(&fk.table) {
                None => return Err(undefined_table(&fk.table)),
                Some(target) if target.column(&fk.column).is_none() => {
                    return Err(undefined_column(&fk.table, &fk.column))
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// Apply one change, failing the way PostgreSQL would
    pub fn apply(&mut self, change: &SchemaChange) -> MigrationResult<()> {
        match change {
            SchemaChange::CreateTable { table, columns } => self.create_table(table, columns),
            SchemaChange::AddColumn {
                table,
                column,
                spec,
            } => {
                self.check_reference(spec)?;
                let t = self.table_mut(table)?;
                if t.column(column).is_some() {
                    return Err(classify_sqlstate(
                        "42701",
                        &format!("column \"{}\" of relation \"{}\" already exists", column, table),
                    ));
                }
                let fills_rows = spec.nullable || spec.default.is_some() || spec.column_type.is_serial();
                if t.rows > 0 && !fills_rows {
                    return Err(classify_sqlstate(
                        "23502",
                        &format!("column \"{}\" of relation \"{}\" contains null values", column, table),
                    ));
                }
                t.columns.push((column.clone(), spec.clone()));
                Ok(())
            }
            SchemaChange::DropColumn { table, column } => {
                if self.column(table, column).is_none() {
                    return Err(undefined_column(table, column));
                }
                let dependents = self.column_dependents(table, column);
                if !dependents.is_empty() {
                    return Err(MigrationError::dependency_violation(format!(
                        "cannot drop column {} of table {} because {} depend(s) on it",
                        column,
                        table,
                        dependents.join(", ")
                    )));
                }
                self.indexes
                    .retain(|_, index| !(index.table == *table && index.columns.contains(column)));
                self.table_mut(table)?.columns.retain(|(name, _)| name != column);
                Ok(())
            }
            SchemaChange::RenameColumn { table, from, to } => {
                let t = self.table_mut(table)?;
                if t.column(to).is_some() {
                    return Err(classify_sqlstate(
                        "42701",
                        &format!("column \"{}\" of relation \"{}\" already exists", to, table),
                    ));
                }
                match t.columns.iter_mut().find(|(name, _)| name == from) {
                    Some(entry) => entry.0 = to.clone(),
                    None => return Err(undefined_column(table, from)),
                }
                for t in self.tables.values_mut() {
                    for (_, spec) in t.columns.iter_mut() {
                        if let Some(fk) = spec.references.as_mut() {
                            if fk.table == *table && fk.column == *from {
                                fk.column = to.clone();
                            }
                        }
                    }
                }
                for index in self.indexes.values_mut().filter(|i| i.table == *table) {
                    for column in index.columns.iter_mut().filter(|c| *c == from) {
                        *column = to.clone();
                    }
                }
                Ok(())
            }
            SchemaChange::RenameTable { from, to } => {
                if self.tables.contains_key(to) {
                    return Err(duplicate_table(to));
                }
                let t = self.tables.remove(from).ok_or_else(|| undefined_table(from))?;
                self.tables.insert(to.clone(), t);
                for t in self.tables.values_mut() {
                    for (_, spec) in t.columns.iter_mut() {
                        if let Some(fk) = spec.references.as_mut() {
                            if fk.table == *from {
                                fk.table = to.clone();
                            }
                        }
                    }
                }
                for index in self.indexes.values_mut().filter(|i| i.table == *from) {
                    index.table = to.clone();
                }
                Ok(())
            }
            SchemaChange::DropTable { table } => {
                if !self.tables.contains_key(table) {
                    return Err(undefined_table(table));
                }
                let dependents = self.table_dependents(table);
                if !dependents.is_empty() {
                    return Err(MigrationError::dependency_violation(format!(
                        "cannot drop table {} because {} depend(s) on it",
                        table,
                        dependents.join(", ")
                    )));
                }
                self.tables.remove(table);
                self.indexes.retain(|_, index| index.table != *table);
                Ok(())
            }
            SchemaChange::AlterColumn {
                table,
                column,
                new,
                old,
            } => {
                self.check_reference(new)?;
                let spec = self
                    .table_mut(table)?
                    .column_mut(column)
                    .ok_or_else(|| undefined_column(table, column))?;
                transition(spec, old, new);
                Ok(())
            }
            SchemaChange::AddIndex(index) => {
                if self.has_index(&index.name) {
                    return Err(classify_sqlstate(
                        "42P07",
                        &format!("relation \"{}\" already exists", index.name),
                    ));
                }
                let t = self
                    .tables
                    .get(&index.table)
                    .ok_or_else(|| undefined_table(&index.table))?;
                if let Some(missing) = index.columns.iter().find(|c| t.column(c).is_none()) {
                    return Err(undefined_column(&index.table, missing));
                }
                self.indexes.insert(index.name.clone(), index.clone());
                Ok(())
            }
            SchemaChange::DropIndex { name } => {
                if self.indexes.remove(name).is_some() {
                    return Ok(());
                }
                // a column-level index is dropped by clearing the column's flag
                for (table, t) in self.tables.iter_mut() {
                    for (column, spec) in t.columns.iter_mut() {
                        if spec.indexed && index_name(table, column) == *name {
                            spec.indexed = false;
                            spec.index_method = None;
                            return Ok(());
                        }
                    }
                }
                Err(classify_sqlstate(
                    "42704",
                    &format!("index \"{}\" does not exist", name),
                ))
            }
            // raw SQL is opaque to the model
            SchemaChange::Unsafe(_) => Ok(()),
        }
    }

    fn create_table(&mut self, table: &str, columns: &[ColumnDef]) -> MigrationResult<()> {
        if self.tables.contains_key(table) {
            return Err(duplicate_table(table));
        }
        for column in columns {
            self.check_reference(&column.spec)?;
        }
        self.tables.insert(
            table.to_string(),
            MemoryTable {
                columns: columns
                    .iter()
                    .map(|c| (c.name.clone(), c.spec.clone()))
                    .collect(),
                rows: 0,
            },
        );
        Ok(())
    }
}

/// Move the attributes that differ between `old` and `new`, as the
/// rendered ALTER statements do; every other attribute keeps its live value
fn transition(live: &mut ColumnSpec, old: &ColumnSpec, new: &ColumnSpec) {
    if old.column_type != new.column_type {
        live.column_type = new.column_type.clone();
    }
    if old.nullable != new.nullable {
        live.nullable = new.nullable;
    }
    if old.unique != new.unique {
        live.unique = new.unique;
    }
    if old.default != new.default {
        live.default = new.default.clone();
    }
    if old.indexed != new.indexed || old.index_method != new.index_method {
        live.indexed = new.indexed;
        live.index_method = new.index_method;
    }
    if old.references != new.references {
        live.references = new.references.clone();
    }
    live.choices = new.choices.clone();
    live.secret = new.secret;
}

fn duplicate_table(table: &str) -> MigrationError {
    classify_sqlstate("42P07", &format!("relation \"{}\" already exists", table))
}

fn undefined_table(table: &str) -> MigrationError {
    classify_sqlstate("42P01", &format!("relation \"{}\" does not exist", table))
}

fn undefined_column(table: &str, column: &str) -> MigrationError {
    classify_sqlstate(
        "42703",
        &format!("column \"{}\" of relation \"{}\" does not exist", column, table),
    )
}

#[derive(Debug, Default)]
struct MemoryStore {
    schema: SchemaState,
    history: BTreeMap<String, Vec<AppliedMigrationRecord>>,
    raw_log: Vec<String>,
    failures: Vec<String>,
    unavailable: bool,
}

impl MemoryStore {
    fn check_available(&self) -> MigrationResult<()> {
        if self.unavailable {
            return Err(MigrationError::StorageUnavailable(
                "in-memory store marked unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

/// Migration backend keeping all state in process memory
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    store: Arc<Mutex<MemoryStore>>,
    run_lock: Arc<tokio::sync::Mutex<()>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed schema
    pub fn schema(&self) -> SchemaState {
        self.store.lock().schema.clone()
    }

    /// Committed records of a history table
    pub fn records(&self, table: &str) -> Vec<AppliedMigrationRecord> {
        self.store
            .lock()
            .history
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    /// Raw statements executed by committed scopes
    pub fn raw_log(&self) -> Vec<String> {
        self.store.lock().raw_log.clone()
    }

    /// Pretend `count` rows exist in `table`
    pub fn insert_rows(&self, table: &str, count: usize) -> MigrationResult<()> {
        let mut store = self.store.lock();
        let t = store.schema.table_mut(table)?;
        t.rows += count;
        Ok(())
    }

    /// Make every raw statement containing `pattern` fail
    pub fn fail_raw_sql_matching(&self, pattern: &str) {
        self.store.lock().failures.push(pattern.to_string());
    }

    pub fn clear_failures(&self) {
        self.store.lock().failures.clear();
    }

    /// Make every store operation fail as if the connection were lost
    pub fn set_unavailable(&self, unavailable: bool) {
        self.store.lock().unavailable = unavailable;
    }
}

struct MemoryLock {
    _guard: tokio::sync::OwnedMutexGuard<()>,
}

#[async_trait]
impl MigrationLock for MemoryLock {
    async fn release(self: Box<Self>) -> MigrationResult<()> {
        Ok(())
    }
}

#[async_trait]
impl MigrationBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn acquire_lock(
        &self,
        _key: i64,
        timeout: Option<Duration>,
    ) -> MigrationResult<Box<dyn MigrationLock>> {
        self.store.lock().check_available()?;
        let acquire = self.run_lock.clone().lock_owned();
        let guard = match timeout {
            Some(limit) => tokio::time::timeout(limit, acquire).await.map_err(|_| {
                MigrationError::LockUnavailable(format!("timed out after {:?}", limit))
            })?,
            None => acquire.await,
        };
        Ok(Box::new(MemoryLock { _guard: guard }))
    }

    async fn ensure_history_table(&self, table: &str) -> MigrationResult<()> {
        let mut store = self.store.lock();
        store.check_available()?;
        store.history.entry(table.to_string()).or_default();
        Ok(())
    }

    async fn applied_records(&self, table: &str) -> MigrationResult<Vec<AppliedMigrationRecord>> {
        let store = self.store.lock();
        store.check_available()?;
        Ok(store.history.get(table).cloned().unwrap_or_default())
    }

    async fn begin(
        &self,
        atomic: bool,
        _statement_timeout: Option<Duration>,
    ) -> MigrationResult<Box<dyn MigrationTransaction>> {
        let store = self.store.lock();
        store.check_available()?;
        let snapshot = atomic.then(|| store.schema.clone());
        Ok(Box::new(MemoryTransaction {
            store: self.store.clone(),
            snapshot,
            raw_log: Vec::new(),
            records: Vec::new(),
        }))
    }
}

/// One unit's scope. Atomic scopes work on a snapshot that replaces the
/// committed schema on commit; non-atomic scopes write through.
struct MemoryTransaction {
    store: Arc<Mutex<MemoryStore>>,
    snapshot: Option<SchemaState>,
    raw_log: Vec<String>,
    records: Vec<(String, AppliedMigrationRecord)>,
}

impl MemoryTransaction {
    fn with_schema<R>(&mut self, f: impl FnOnce(&mut SchemaState) -> R) -> R {
        match self.snapshot.as_mut() {
            Some(snapshot) => f(snapshot),
            None => f(&mut self.store.lock().schema),
        }
    }

    fn read_schema<R>(&self, f: impl FnOnce(&SchemaState) -> R) -> R {
        match self.snapshot.as_ref() {
            Some(snapshot) => f(snapshot),
            None => f(&self.store.lock().schema),
        }
    }
}

#[async_trait]
impl SchemaEditor for MemoryTransaction {
    async fn apply(&mut self, change: &SchemaChange) -> MigrationResult<()> {
        if let SchemaChange::Unsafe(raw) = change {
            self.execute_raw(&raw.sql).await?;
            return Ok(());
        }
        self.store.lock().check_available()?;
        self.with_schema(|schema| schema.apply(change))
    }

    async fn execute_raw(&mut self, sql: &str) -> MigrationResult<u64> {
        {
            let store = self.store.lock();
            store.check_available()?;
            if store.failures.iter().any(|pattern| sql.contains(pattern.as_str())) {
                return Err(classify_sqlstate(
                    "P0001",
                    &format!("injected failure for statement: {}", sql),
                ));
            }
        }
        if self.snapshot.is_some() {
            self.raw_log.push(sql.to_string());
        } else {
            self.store.lock().raw_log.push(sql.to_string());
        }
        Ok(0)
    }

    async fn table_exists(&mut self, table: &str) -> MigrationResult<bool> {
        Ok(self.read_schema(|schema| schema.table(table).is_some()))
    }

    async fn column_shape(
        &mut self,
        table: &str,
        column: &str,
    ) -> MigrationResult<Option<ColumnShape>> {
        Ok(self.read_schema(|schema| schema.column_shape(table, column)))
    }

    async fn index_exists(&mut self, name: &str) -> MigrationResult<bool> {
        Ok(self.read_schema(|schema| schema.has_index(name)))
    }

    async fn column_dependents(
        &mut self,
        table: &str,
        column: &str,
    ) -> MigrationResult<Vec<String>> {
        Ok(self.read_schema(|schema| schema.column_dependents(table, column)))
    }

    async fn table_dependents(&mut self, table: &str) -> MigrationResult<Vec<String>> {
        Ok(self.read_schema(|schema| schema.table_dependents(table)))
    }
}

#[async_trait]
impl MigrationTransaction for MemoryTransaction {
    fn editor(&mut self) -> &mut dyn SchemaEditor {
        self
    }

    async fn record_applied(
        &mut self,
        table: &str,
        record: &AppliedMigrationRecord,
    ) -> MigrationResult<()> {
        if self.snapshot.is_some() {
            self.records.push((table.to_string(), record.clone()));
        } else {
            let mut store = self.store.lock();
            store.check_available()?;
            store
                .history
                .entry(table.to_string())
                .or_default()
                .push(record.clone());
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> MigrationResult<()> {
        let this = *self;
        let mut store = this.store.lock();
        store.check_available()?;
        if let Some(snapshot) = this.snapshot {
            store.schema = snapshot;
        }
        store.raw_log.extend(this.raw_log);
        for (table, record) in this.records {
            store.history.entry(table).or_default().push(record);
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> MigrationResult<()> {
        if self.snapshot.is_none() {
            tracing::warn!("rolling back a non-atomic scope; applied changes remain");
        }
        Ok(())
    }
}
