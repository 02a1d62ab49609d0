//! Migration Units - named, timestamp-identified bundles of schema changes
//!
//! A [`MigrationUnit`] owns an ordered list of [`Step`]s. A step is either a
//! typed [`SchemaChange`] or a [`DataPatch`] callable; declaration order is
//! preserved across both kinds. Units are assembled through
//! [`MigrationUnitBuilder`], which rejects invalid definitions before any of
//! them can reach a store.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use crate::backends::SchemaEditor;
use crate::error::{MigrationError, MigrationResult};
use crate::executor::SchemaExecutor;
use crate::schema::{
    render, split_sql_statements, ColumnDef, ColumnSpec, IndexDef, RawSql, SchemaChange,
};

const ID_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
const ID_TIMESTAMP_LEN: usize = 15;

fn is_snake_case(s: &str) -> bool {
    !s.is_empty()
        && !s.starts_with('_')
        && s.chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// Schema-ownership grouping, e.g. `merchant_data`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Namespace(String);

impl Namespace {
    pub fn new(name: &str) -> MigrationResult<Self> {
        let starts_with_letter = name
            .chars()
            .next()
            .map_or(false, |c| c.is_ascii_lowercase());
        if !starts_with_letter || !is_snake_case(name) {
            return Err(MigrationError::invalid(format!(
                "namespace '{}' must be lowercase snake_case starting with a letter",
                name
            )));
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Namespace {
    type Error = MigrationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Namespace::new(&value)
    }
}

impl From<Namespace> for String {
    fn from(value: Namespace) -> Self {
        value.0
    }
}

/// Globally unique unit identifier of the form `YYYYMMDD_HHMMSS_slug`.
///
/// Lexicographic order is chronological order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MigrationId(String);

impl MigrationId {
    pub fn new(id: &str) -> MigrationResult<Self> {
        let invalid = |reason: &str| {
            Err(MigrationError::invalid(format!(
                "migration id '{}' {}",
                id, reason
            )))
        };

        if !id.is_ascii() || id.len() <= ID_TIMESTAMP_LEN + 1 {
            return invalid("must look like YYYYMMDD_HHMMSS_slug");
        }
        let (stamp, rest) = id.split_at(ID_TIMESTAMP_LEN);
        if NaiveDateTime::parse_from_str(stamp, ID_TIMESTAMP_FORMAT).is_err() {
            return invalid("does not start with a valid YYYYMMDD_HHMMSS timestamp");
        }
        match rest.strip_prefix('_') {
            Some(slug) if is_snake_case(slug) => Ok(Self(id.to_string())),
            _ => invalid("must end in a lowercase snake_case slug"),
        }
    }

    /// New id stamped with the current UTC time
    pub fn generate(slug: &str) -> MigrationResult<Self> {
        let stamp = Utc::now().format(ID_TIMESTAMP_FORMAT);
        Self::new(&format!("{}_{}", stamp, slug))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn slug(&self) -> &str {
        &self.0[ID_TIMESTAMP_LEN + 1..]
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        NaiveDateTime::parse_from_str(&self.0[..ID_TIMESTAMP_LEN], ID_TIMESTAMP_FORMAT)
            .map(|naive| naive.and_utc())
            .unwrap_or_default()
    }
}

impl fmt::Display for MigrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for MigrationId {
    type Error = MigrationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        MigrationId::new(&value)
    }
}

impl From<MigrationId> for String {
    fn from(value: MigrationId) -> Self {
        value.0
    }
}

/// A data-patch callable run inside the unit's transaction
#[async_trait]
pub trait DataPatch: Send + Sync {
    fn describe(&self) -> String;

    async fn run(&self, editor: &mut dyn SchemaEditor) -> MigrationResult<()>;

    /// Statements shown by `plan`/`sql` output, if the patch can tell
    fn sql_preview(&self) -> Option<Vec<String>> {
        None
    }
}

/// Backfill made of plain SQL. Each block goes to the database as written,
/// so it may hold several statements or a dollar-quoted body.
#[derive(Debug, Clone)]
pub struct SqlPatch {
    description: String,
    blocks: Vec<String>,
}

impl SqlPatch {
    pub fn new(description: &str, sql: &str) -> Self {
        Self {
            description: description.to_string(),
            blocks: vec![sql.trim().to_string()],
        }
    }

    pub fn from_statements(description: &str, statements: Vec<String>) -> Self {
        Self {
            description: description.to_string(),
            blocks: statements,
        }
    }
}

#[async_trait]
impl DataPatch for SqlPatch {
    fn describe(&self) -> String {
        self.description.clone()
    }

    async fn run(&self, editor: &mut dyn SchemaEditor) -> MigrationResult<()> {
        for block in &self.blocks {
            let rows = editor.execute_raw(block).await?;
            tracing::debug!(patch = %self.description, rows, "backfill block executed");
        }
        Ok(())
    }

    fn sql_preview(&self) -> Option<Vec<String>> {
        Some(
            self.blocks
                .iter()
                .flat_map(|block| split_sql_statements(block))
                .collect(),
        )
    }
}

/// One entry in a unit's ordered step list
#[derive(Clone)]
pub enum Step {
    Change(SchemaChange),
    Patch(Arc<dyn DataPatch>),
}

impl Step {
    pub fn describe(&self) -> String {
        match self {
            Step::Change(change) => change.to_string(),
            Step::Patch(patch) => format!("data patch: {}", patch.describe()),
        }
    }

    /// SQL this step would run, with opaque patches shown as comments
    pub fn sql_preview(&self) -> Vec<String> {
        match self {
            Step::Change(change) => render(change),
            Step::Patch(patch) => patch
                .sql_preview()
                .unwrap_or_else(|| vec![format!("-- data patch: {}", patch.describe())]),
        }
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Change(change) => f.debug_tuple("Change").field(change).finish(),
            Step::Patch(patch) => f.debug_tuple("Patch").field(&patch.describe()).finish(),
        }
    }
}

/// A versioned, atomically applied bundle of schema changes
#[derive(Debug, Clone)]
pub struct MigrationUnit {
    id: MigrationId,
    namespace: Namespace,
    description: String,
    version: Option<String>,
    steps: Vec<Step>,
    dependencies: Vec<MigrationId>,
    atomic: bool,
}

impl MigrationUnit {
    pub fn builder(namespace: &str, id: &str, description: &str) -> MigrationUnitBuilder {
        MigrationUnitBuilder::new(namespace, id, description)
    }

    pub fn id(&self) -> &MigrationId {
        &self.id
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Explicitly declared dependencies; the implicit same-namespace
    /// predecessor is added by the resolver
    pub fn dependencies(&self) -> &[MigrationId] {
        &self.dependencies
    }

    pub fn is_atomic(&self) -> bool {
        self.atomic
    }

    pub fn changes(&self) -> impl Iterator<Item = &SchemaChange> {
        self.steps.iter().filter_map(|step| match step {
            Step::Change(change) => Some(change),
            Step::Patch(_) => None,
        })
    }

    pub fn has_unsafe_steps(&self) -> bool {
        self.changes().any(SchemaChange::is_unsafe)
    }

    /// Every statement the unit would run, in order
    pub fn sql_preview(&self) -> Vec<String> {
        self.steps.iter().flat_map(Step::sql_preview).collect()
    }

    /// Run every step in declaration order.
    ///
    /// The first failure stops the unit; the error names the unit and how
    /// many steps had already completed.
    pub async fn apply(
        &self,
        editor: &mut dyn SchemaEditor,
        executor: &SchemaExecutor,
    ) -> MigrationResult<()> {
        for (index, step) in self.steps.iter().enumerate() {
            let result = match step {
                Step::Change(change) => executor.execute(editor, change).await,
                Step::Patch(patch) => patch.run(editor).await,
            };
            if let Err(err) = result {
                return Err(err.for_unit(self.id.as_str(), &self.description, index));
            }
            tracing::debug!(
                migration = %self.id,
                step = index + 1,
                total = self.steps.len(),
                "{}",
                step.describe()
            );
        }
        Ok(())
    }
}

/// Column list collector for `MigrationUnitBuilder::create_table`
#[derive(Debug, Default)]
pub struct TableBuilder {
    columns: Vec<ColumnDef>,
}

impl TableBuilder {
    /// Add the conventional `id` BIGSERIAL primary key
    pub fn id(&mut self) -> &mut Self {
        self.column("id", ColumnSpec::id())
    }

    pub fn column(&mut self, name: &str, spec: ColumnSpec) -> &mut Self {
        self.columns.push(ColumnDef::new(name, spec));
        self
    }

    /// `created_at`/`updated_at` columns defaulting to `now()`
    pub fn timestamps(&mut self) -> &mut Self {
        let stamp = ColumnSpec::timestamp_tz()
            .with_default(crate::schema::ColumnDefault::Expression("now()".to_string()));
        self.column("created_at", stamp.clone());
        self.column("updated_at", stamp)
    }
}

/// Fluent constructor for [`MigrationUnit`]
pub struct MigrationUnitBuilder {
    namespace: String,
    id: String,
    description: String,
    version: Option<String>,
    steps: Vec<Step>,
    dependencies: Vec<String>,
    atomic: bool,
}

impl MigrationUnitBuilder {
    pub fn new(namespace: &str, id: &str, description: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            id: id.to_string(),
            description: description.to_string(),
            version: None,
            steps: Vec::new(),
            dependencies: Vec::new(),
            atomic: true,
        }
    }

    /// Declare an explicit dependency, typically on another namespace
    pub fn depends_on(mut self, id: &str) -> Self {
        self.dependencies.push(id.to_string());
        self
    }

    pub fn version(mut self, version: &str) -> Self {
        self.version = Some(version.to_string());
        self
    }

    /// Run the steps without a surrounding transaction
    pub fn non_atomic(mut self) -> Self {
        self.atomic = false;
        self
    }

    pub fn change(mut self, change: SchemaChange) -> Self {
        self.steps.push(Step::Change(change));
        self
    }

    pub fn create_table<F>(self, table: &str, define: F) -> Self
    where
        F: FnOnce(&mut TableBuilder),
    {
        let mut builder = TableBuilder::default();
        define(&mut builder);
        self.change(SchemaChange::create_table(table, builder.columns))
    }

    pub fn add_column(self, table: &str, column: &str, spec: ColumnSpec) -> Self {
        self.change(SchemaChange::add_column(table, column, spec))
    }

    pub fn drop_column(self, table: &str, column: &str) -> Self {
        self.change(SchemaChange::drop_column(table, column))
    }

    pub fn rename_column(self, table: &str, from: &str, to: &str) -> Self {
        self.change(SchemaChange::rename_column(table, from, to))
    }

    pub fn rename_table(self, from: &str, to: &str) -> Self {
        self.change(SchemaChange::rename_table(from, to))
    }

    pub fn drop_table(self, table: &str) -> Self {
        self.change(SchemaChange::drop_table(table))
    }

    pub fn alter_column(self, table: &str, column: &str, new: ColumnSpec, old: ColumnSpec) -> Self {
        self.change(SchemaChange::alter_column(table, column, new, old))
    }

    pub fn add_index(self, index: IndexDef) -> Self {
        self.change(SchemaChange::AddIndex(index))
    }

    pub fn drop_index(self, name: &str) -> Self {
        self.change(SchemaChange::DropIndex {
            name: name.to_string(),
        })
    }

    /// Verbatim SQL; `note` says what the statements do
    pub fn unsafe_sql(self, sql: &str, note: &str) -> Self {
        self.change(SchemaChange::Unsafe(RawSql::new(sql).with_note(note)))
    }

    pub fn run_patch<P: DataPatch + 'static>(mut self, patch: P) -> Self {
        self.steps.push(Step::Patch(Arc::new(patch)));
        self
    }

    pub fn backfill(self, description: &str, sql: &str) -> Self {
        self.run_patch(SqlPatch::new(description, sql))
    }

    pub fn build(self) -> MigrationResult<MigrationUnit> {
        let namespace = Namespace::new(&self.namespace)?;
        let id = MigrationId::new(&self.id)?;
        if self.description.trim().is_empty() {
            return Err(MigrationError::invalid(format!(
                "migration {} has no description",
                id
            )));
        }

        let mut seen = HashSet::new();
        let mut dependencies = Vec::with_capacity(self.dependencies.len());
        for dependency in &self.dependencies {
            let dependency = MigrationId::new(dependency)?;
            if dependency == id {
                return Err(MigrationError::invalid(format!(
                    "migration {} depends on itself",
                    id
                )));
            }
            if seen.insert(dependency.clone()) {
                dependencies.push(dependency);
            }
        }

        for step in &self.steps {
            if let Step::Change(change) = step {
                change.validate().map_err(|err| match err {
                    MigrationError::InvalidDefinition(msg) => {
                        MigrationError::invalid(format!("migration {}: {}", id, msg))
                    }
                    other => other,
                })?;
            }
        }

        Ok(MigrationUnit {
            id,
            namespace,
            description: self.description,
            version: self.version,
            steps: self.steps,
            dependencies,
            atomic: self.atomic,
        })
    }
}
