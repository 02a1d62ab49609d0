//! Column Specifications - semantic column definitions used by primitives
//!
//! A [`ColumnSpec`] describes one column's logical type and attributes. It
//! is used both as the shape a column is created with and, in AlterColumn,
//! as the explicit "before" and "after" of a transition.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{MigrationError, MigrationResult};

/// Logical column types, rendered for PostgreSQL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    SmallInt,
    Integer,
    BigInt,
    Serial,
    BigSerial,
    Boolean,
    Varchar(u32),
    Text,
    Decimal { precision: u8, scale: u8 },
    Date,
    Timestamp,
    TimestampTz,
    Uuid,
    Json,
    Jsonb,
}

impl ColumnType {
    /// SQL type name
    pub fn sql(&self) -> String {
        match self {
            ColumnType::SmallInt => "SMALLINT".to_string(),
            ColumnType::Integer => "INTEGER".to_string(),
            ColumnType::BigInt => "BIGINT".to_string(),
            ColumnType::Serial => "SERIAL".to_string(),
            ColumnType::BigSerial => "BIGSERIAL".to_string(),
            ColumnType::Boolean => "BOOLEAN".to_string(),
            ColumnType::Varchar(len) => format!("VARCHAR({})", len),
            ColumnType::Text => "TEXT".to_string(),
            ColumnType::Decimal { precision, scale } => {
                format!("NUMERIC({}, {})", precision, scale)
            }
            ColumnType::Date => "DATE".to_string(),
            ColumnType::Timestamp => "TIMESTAMP".to_string(),
            ColumnType::TimestampTz => "TIMESTAMPTZ".to_string(),
            ColumnType::Uuid => "UUID".to_string(),
            ColumnType::Json => "JSON".to_string(),
            ColumnType::Jsonb => "JSONB".to_string(),
        }
    }

    /// Type used when the column is the target of an `ALTER COLUMN ... TYPE`.
    /// Serial pseudo-types only exist at creation time.
    pub fn alter_sql(&self) -> String {
        match self {
            ColumnType::Serial => "INTEGER".to_string(),
            ColumnType::BigSerial => "BIGINT".to_string(),
            other => other.sql(),
        }
    }

    pub fn is_textual(&self) -> bool {
        matches!(self, ColumnType::Varchar(_) | ColumnType::Text)
    }

    /// Serial columns carry an implicit sequence default
    pub fn is_serial(&self) -> bool {
        matches!(self, ColumnType::Serial | ColumnType::BigSerial)
    }

    /// The type a live column of this type reports
    pub fn comparable(&self) -> ColumnType {
        match self {
            ColumnType::Serial => ColumnType::Integer,
            ColumnType::BigSerial => ColumnType::BigInt,
            other => other.clone(),
        }
    }

    /// Map an `information_schema.columns` type description back to a
    /// column type
    pub fn from_catalog(
        data_type: &str,
        max_length: Option<i32>,
        precision: Option<i32>,
        scale: Option<i32>,
    ) -> Option<ColumnType> {
        Some(match data_type {
            "smallint" => ColumnType::SmallInt,
            "integer" => ColumnType::Integer,
            "bigint" => ColumnType::BigInt,
            "boolean" => ColumnType::Boolean,
            "character varying" => ColumnType::Varchar(u32::try_from(max_length?).ok()?),
            "text" => ColumnType::Text,
            "numeric" => ColumnType::Decimal {
                precision: u8::try_from(precision?).ok()?,
                scale: u8::try_from(scale?).ok()?,
            },
            "date" => ColumnType::Date,
            "timestamp without time zone" => ColumnType::Timestamp,
            "timestamp with time zone" => ColumnType::TimestampTz,
            "uuid" => ColumnType::Uuid,
            "json" => ColumnType::Json,
            "jsonb" => ColumnType::Jsonb,
            _ => return None,
        })
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.sql())
    }
}

/// Column default value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ColumnDefault {
    Bool(bool),
    Int(i64),
    /// Exact numeric literal, kept as text to avoid float rounding
    Numeric(String),
    Text(String),
    /// A server-side expression such as `now()` or `gen_random_uuid()`
    Expression(String),
}

impl ColumnDefault {
    pub fn sql(&self) -> String {
        match self {
            ColumnDefault::Bool(true) => "TRUE".to_string(),
            ColumnDefault::Bool(false) => "FALSE".to_string(),
            ColumnDefault::Int(i) => i.to_string(),
            ColumnDefault::Numeric(n) => n.clone(),
            ColumnDefault::Text(s) => format!("'{}'", s.replace('\'', "''")),
            ColumnDefault::Expression(expr) => expr.clone(),
        }
    }
}

impl From<bool> for ColumnDefault {
    fn from(value: bool) -> Self {
        ColumnDefault::Bool(value)
    }
}

impl From<i64> for ColumnDefault {
    fn from(value: i64) -> Self {
        ColumnDefault::Int(value)
    }
}

impl From<i32> for ColumnDefault {
    fn from(value: i32) -> Self {
        ColumnDefault::Int(value as i64)
    }
}

impl From<&str> for ColumnDefault {
    fn from(value: &str) -> Self {
        ColumnDefault::Text(value.to_string())
    }
}

impl From<String> for ColumnDefault {
    fn from(value: String) -> Self {
        ColumnDefault::Text(value)
    }
}

/// Index access methods supported by PostgreSQL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexMethod {
    BTree,
    Hash,
    Gin,
    Gist,
    Brin,
}

impl IndexMethod {
    pub fn sql(&self) -> &'static str {
        match self {
            IndexMethod::BTree => "btree",
            IndexMethod::Hash => "hash",
            IndexMethod::Gin => "gin",
            IndexMethod::Gist => "gist",
            IndexMethod::Brin => "brin",
        }
    }
}

/// Referential action when the referenced row is deleted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OnDelete {
    Cascade,
    Restrict,
    SetNull,
    NoAction,
}

impl OnDelete {
    pub fn sql(&self) -> &'static str {
        match self {
            OnDelete::Cascade => "CASCADE",
            OnDelete::Restrict => "RESTRICT",
            OnDelete::SetNull => "SET NULL",
            OnDelete::NoAction => "NO ACTION",
        }
    }
}

/// Foreign key target of a column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub table: String,
    pub column: String,
    pub on_delete: OnDelete,
}

/// Semantic column definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub column_type: ColumnType,
    pub nullable: bool,
    pub unique: bool,
    pub primary_key: bool,
    pub default: Option<ColumnDefault>,
    pub indexed: bool,
    pub index_method: Option<IndexMethod>,
    /// Enumerated value set; enforced by the application, recorded here so
    /// transitions are auditable.
    pub choices: Option<Vec<String>>,
    /// Secret columns never have their default written to logs.
    pub secret: bool,
    pub references: Option<ForeignKey>,
}

impl ColumnSpec {
    /// A NOT NULL column of the given type with no other attributes
    pub fn new(column_type: ColumnType) -> Self {
        Self {
            column_type,
            nullable: false,
            unique: false,
            primary_key: false,
            default: None,
            indexed: false,
            index_method: None,
            choices: None,
            secret: false,
            references: None,
        }
    }

    /// Auto-incrementing primary key
    pub fn id() -> Self {
        Self::new(ColumnType::BigSerial).primary_key()
    }

    pub fn varchar(length: u32) -> Self {
        Self::new(ColumnType::Varchar(length))
    }

    pub fn text() -> Self {
        Self::new(ColumnType::Text)
    }

    pub fn integer() -> Self {
        Self::new(ColumnType::Integer)
    }

    pub fn big_integer() -> Self {
        Self::new(ColumnType::BigInt)
    }

    pub fn boolean() -> Self {
        Self::new(ColumnType::Boolean)
    }

    pub fn uuid() -> Self {
        Self::new(ColumnType::Uuid)
    }

    pub fn decimal(precision: u8, scale: u8) -> Self {
        Self::new(ColumnType::Decimal { precision, scale })
    }

    pub fn date() -> Self {
        Self::new(ColumnType::Date)
    }

    pub fn timestamp_tz() -> Self {
        Self::new(ColumnType::TimestampTz)
    }

    pub fn jsonb() -> Self {
        Self::new(ColumnType::Jsonb)
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    pub fn nullable(self) -> Self {
        self.with_nullable(true)
    }

    pub fn unique(self) -> Self {
        self.with_unique(true)
    }

    pub fn indexed(self) -> Self {
        self.with_index(true)
    }

    pub fn secret(mut self) -> Self {
        self.secret = true;
        self
    }

    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    pub fn with_unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }

    pub fn with_index(mut self, indexed: bool) -> Self {
        self.indexed = indexed;
        if !indexed {
            self.index_method = None;
        }
        self
    }

    pub fn with_index_method(mut self, method: IndexMethod) -> Self {
        self.indexed = true;
        self.index_method = Some(method);
        self
    }

    pub fn with_default<D: Into<ColumnDefault>>(mut self, default: D) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn without_default(mut self) -> Self {
        self.default = None;
        self
    }

    pub fn with_choices<I, S>(mut self, choices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.choices = Some(choices.into_iter().map(Into::into).collect());
        self
    }

    pub fn references(mut self, table: &str, column: &str, on_delete: OnDelete) -> Self {
        self.references = Some(ForeignKey {
            table: table.to_string(),
            column: column.to_string(),
            on_delete,
        });
        self
    }

    pub fn without_reference(mut self) -> Self {
        self.references = None;
        self
    }

    /// Whether the column is a foreign key into `table`
    pub fn references_table(&self, table: &str) -> bool {
        self.references
            .as_ref()
            .map_or(false, |fk| fk.table == table)
    }

    /// Default value as it may appear in log output
    pub fn describe_default(&self) -> String {
        match (&self.default, self.secret) {
            (None, _) => "none".to_string(),
            (Some(_), true) => "<redacted>".to_string(),
            (Some(d), false) => d.sql(),
        }
    }

    /// Reject attribute combinations that cannot be represented
    pub fn validate(&self, column: &str) -> MigrationResult<()> {
        let fail = |reason: &str| {
            Err(MigrationError::invalid(format!(
                "column '{}': {}",
                column, reason
            )))
        };

        if self.index_method.is_some() && !self.indexed {
            return fail("an index method requires the column to be indexed");
        }
        if self.primary_key && self.nullable {
            return fail("a primary key cannot be nullable");
        }
        if self.secret && (self.indexed || self.unique) {
            return fail("a secret column cannot be indexed or unique");
        }
        if let ColumnType::Varchar(0) = self.column_type {
            return fail("VARCHAR length must be positive");
        }
        if let ColumnType::Decimal { precision, scale } = self.column_type {
            if precision == 0 || scale > precision {
                return fail("decimal scale must not exceed a positive precision");
            }
        }
        if self.column_type.is_serial() && self.default.is_some() {
            return fail("serial columns cannot declare a default");
        }
        if let Some(choices) = &self.choices {
            if !self.column_type.is_textual() {
                return fail("choices require a textual column type");
            }
            if choices.is_empty() {
                return fail("choices must not be empty");
            }
            if let Some(ColumnDefault::Text(default)) = &self.default {
                if !choices.iter().any(|c| c == default) {
                    return fail("default must be one of the declared choices");
                }
            }
        }
        if let Some(fk) = &self.references {
            if fk.table.is_empty() || fk.column.is_empty() {
                return fail("foreign key target must name a table and a column");
            }
            if fk.on_delete == OnDelete::SetNull && !self.nullable {
                return fail("ON DELETE SET NULL requires a nullable column");
            }
        }
        Ok(())
    }

    /// The attributes of this spec that can be observed on a live column
    pub fn shape(&self) -> ColumnShape {
        let default = match &self.default {
            Some(default) => Some(DefaultShape::from_sql(&default.sql())),
            None if self.column_type.is_serial() => Some(DefaultShape::Sequence),
            None => None,
        };
        ColumnShape {
            column_type: Some(self.column_type.comparable()),
            nullable: self.nullable,
            unique: self.unique || self.primary_key,
            default,
            indexed: self.indexed,
            references: self
                .references
                .as_ref()
                .map(|fk| (fk.table.clone(), fk.column.clone())),
        }
    }

    /// This spec with every observable attribute replaced by its live
    /// value. Attributes already at `target` take the target's value, so
    /// diffing the result against `target` yields only the statements the
    /// live column still needs.
    pub fn reconciled(&self, target: &ColumnSpec, live: &ColumnShape) -> ColumnSpec {
        let declared = self.shape();
        let wanted = target.shape();
        let mut spec = self.clone();

        spec.column_type = match &live.column_type {
            Some(t) if wanted.column_type.as_ref() == Some(t) => target.column_type.clone(),
            Some(t) if declared.column_type.as_ref() != Some(t) => t.clone(),
            _ => self.column_type.clone(),
        };
        spec.nullable = live.nullable;
        if !self.primary_key {
            spec.unique = live.unique;
        }

        if live.indexed != self.indexed {
            spec.indexed = live.indexed;
            spec.index_method = None;
        }

        spec.default = if live.default == wanted.default {
            target.default.clone()
        } else if live.default == declared.default {
            self.default.clone()
        } else {
            match &live.default {
                None | Some(DefaultShape::Sequence) => None,
                Some(DefaultShape::Value(value)) => Some(ColumnDefault::Expression(value.clone())),
            }
        };

        spec.references = match &live.references {
            None => None,
            Some(target_ref) if wanted.references.as_ref() == Some(target_ref) => {
                target.references.clone()
            }
            Some(target_ref) if declared.references.as_ref() == Some(target_ref) => {
                self.references.clone()
            }
            Some((table, column)) => Some(ForeignKey {
                table: table.clone(),
                column: column.clone(),
                on_delete: OnDelete::NoAction,
            }),
        };
        spec
    }
}

/// A column default as far as it can be compared with a live one
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DefaultShape {
    /// `nextval(...)` from a serial column's sequence
    Sequence,
    /// Normalised default expression
    Value(String),
}

impl DefaultShape {
    /// Parse a default expression as written in DDL or as stored by the
    /// catalog: `'pending'::character varying` and `'pending'` are equal.
    pub fn from_sql(expr: &str) -> Self {
        let expr = expr.trim();
        if expr.starts_with("nextval(") {
            return DefaultShape::Sequence;
        }
        if let Some(rest) = expr.strip_prefix('\'') {
            let mut value = String::new();
            let mut chars = rest.chars().peekable();
            while let Some(c) = chars.next() {
                if c != '\'' {
                    value.push(c);
                } else if chars.peek() == Some(&'\'') {
                    chars.next();
                    value.push('\'');
                } else {
                    let tail: String = chars.by_ref().collect();
                    if tail.is_empty() || tail.starts_with("::") {
                        return DefaultShape::Value(value);
                    }
                    break;
                }
            }
        }
        DefaultShape::Value(expr.to_lowercase())
    }

    fn describe(&self, redact: bool) -> String {
        match self {
            DefaultShape::Sequence => "sequence".to_string(),
            DefaultShape::Value(_) if redact => "<redacted>".to_string(),
            DefaultShape::Value(value) => format!("'{}'", value),
        }
    }
}

/// Observable shape of a live column, used to verify AlterColumn's
/// declared previous state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnShape {
    /// `None` when the live type has no [`ColumnType`] equivalent
    pub column_type: Option<ColumnType>,
    pub nullable: bool,
    pub unique: bool,
    pub default: Option<DefaultShape>,
    pub indexed: bool,
    /// Target `(table, column)` of a single-column foreign key
    pub references: Option<(String, String)>,
}

impl ColumnShape {
    /// Human-readable list of attributes that differ from `live`. Default
    /// values are hidden when `redact_defaults` is set.
    pub fn differences(&self, live: &ColumnShape, redact_defaults: bool) -> Vec<String> {
        let mut diffs = Vec::new();
        if let (Some(declared), Some(actual)) = (&self.column_type, &live.column_type) {
            if declared != actual {
                diffs.push(format!("type {} vs {}", declared, actual));
            }
        }
        if self.nullable != live.nullable {
            diffs.push(format!("nullable {} vs {}", self.nullable, live.nullable));
        }
        if self.unique != live.unique {
            diffs.push(format!("unique {} vs {}", self.unique, live.unique));
        }
        if self.default != live.default {
            let describe = |default: &Option<DefaultShape>| match default {
                Some(default) => default.describe(redact_defaults),
                None => "none".to_string(),
            };
            diffs.push(format!(
                "default {} vs {}",
                describe(&self.default),
                describe(&live.default)
            ));
        }
        if self.indexed != live.indexed {
            diffs.push(format!("indexed {} vs {}", self.indexed, live.indexed));
        }
        if self.references != live.references {
            let describe = |fk: &Option<(String, String)>| match fk {
                Some((table, column)) => format!("{}.{}", table, column),
                None => "none".to_string(),
            };
            diffs.push(format!(
                "references {} vs {}",
                describe(&self.references),
                describe(&live.references)
            ));
        }
        diffs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_rendering_escapes_quotes() {
        assert_eq!(ColumnDefault::from("o'hara").sql(), "'o''hara'");
        assert_eq!(ColumnDefault::from(true).sql(), "TRUE");
        assert_eq!(ColumnDefault::Expression("now()".into()).sql(), "now()");
    }

    #[test]
    fn test_index_method_requires_index() {
        let mut spec = ColumnSpec::varchar(20);
        spec.index_method = Some(IndexMethod::Hash);
        assert!(spec.validate("code").is_err());

        let spec = ColumnSpec::varchar(20).with_index_method(IndexMethod::Hash);
        assert!(spec.validate("code").is_ok());
    }

    #[test]
    fn test_choices_rules() {
        let spec = ColumnSpec::integer().with_choices(["a"]);
        assert!(spec.validate("status").is_err());

        let spec = ColumnSpec::varchar(10)
            .with_choices(["active", "closed"])
            .with_default("pending");
        assert!(spec.validate("status").is_err());

        let spec = ColumnSpec::varchar(10)
            .with_choices(["active", "closed"])
            .with_default("active");
        assert!(spec.validate("status").is_ok());
    }

    #[test]
    fn test_secret_columns() {
        let spec = ColumnSpec::varchar(64).secret().unique();
        assert!(spec.validate("api_key").is_err());

        let spec = ColumnSpec::varchar(64).secret().with_default("hunter2");
        assert!(spec.validate("api_key").is_ok());
        assert_eq!(spec.describe_default(), "<redacted>");
    }

    #[test]
    fn test_set_null_requires_nullable() {
        let spec = ColumnSpec::big_integer().references("merchant", "id", OnDelete::SetNull);
        assert!(spec.validate("merchant_id").is_err());
        assert!(spec.nullable().validate("merchant_id").is_ok());
    }

    #[test]
    fn test_shape_reflects_primary_key_and_serial() {
        let shape = ColumnSpec::id().shape();
        assert!(shape.unique);
        assert_eq!(shape.default, Some(DefaultShape::Sequence));
        assert_eq!(shape.column_type, Some(ColumnType::BigInt));
        assert!(!shape.nullable);

        let a = ColumnSpec::text().shape();
        let b = ColumnSpec::text().nullable().unique().shape();
        assert_eq!(a.differences(&b, false).len(), 2);
    }

    #[test]
    fn test_catalog_defaults_compare_equal() {
        assert_eq!(
            DefaultShape::from_sql("'pending'::character varying"),
            ColumnSpec::varchar(20).with_default("pending").shape().default.unwrap()
        );
        assert_eq!(
            DefaultShape::from_sql("'-1'::integer"),
            ColumnSpec::integer().with_default(-1).shape().default.unwrap()
        );
        assert_eq!(
            DefaultShape::from_sql("false"),
            ColumnSpec::boolean().with_default(false).shape().default.unwrap()
        );
        assert_eq!(
            DefaultShape::from_sql("'{}'::jsonb"),
            ColumnSpec::jsonb()
                .with_default(ColumnDefault::Expression("'{}'::jsonb".to_string()))
                .shape()
                .default
                .unwrap()
        );
        assert_eq!(
            DefaultShape::from_sql("'o''hara'::text"),
            DefaultShape::Value("o'hara".to_string())
        );
        assert_eq!(
            DefaultShape::from_sql("nextval('merchant_id_seq'::regclass)"),
            DefaultShape::Sequence
        );
        assert_ne!(
            DefaultShape::from_sql("'active'::character varying"),
            DefaultShape::from_sql("'pending'")
        );
    }

    #[test]
    fn test_differences_report_type_and_default() {
        let declared = ColumnSpec::varchar(20).with_default("pending").shape();
        let live = ColumnSpec::varchar(32).with_default("active").shape();
        let diffs = declared.differences(&live, false);
        assert_eq!(diffs.len(), 2);
        assert!(diffs[0].contains("VARCHAR(20) vs VARCHAR(32)"));
        assert!(diffs[1].contains("'pending' vs 'active'"));

        let redacted = declared.differences(&live, true);
        assert!(redacted[1].contains("<redacted>"));
        assert!(!redacted[1].contains("pending"));
    }

    #[test]
    fn test_catalog_types() {
        assert_eq!(
            ColumnType::from_catalog("character varying", Some(255), None, None),
            Some(ColumnType::Varchar(255))
        );
        assert_eq!(
            ColumnType::from_catalog("numeric", None, Some(12), Some(2)),
            Some(ColumnType::Decimal { precision: 12, scale: 2 })
        );
        assert_eq!(ColumnType::from_catalog("numeric", None, None, None), None);
        assert_eq!(ColumnType::from_catalog("tsvector", None, None, None), None);
    }

    #[test]
    fn test_reconciled_follows_live_column() {
        let declared = ColumnSpec::varchar(20).unique().with_default("pending");
        let target = ColumnSpec::varchar(20).with_default("pending");
        // the live column never got its unique constraint and carries another default
        let live = ColumnSpec::varchar(20).with_default("active").shape();

        let effective = declared.reconciled(&target, &live);
        assert!(!effective.unique);
        assert_eq!(effective.default, Some(ColumnDefault::Expression("active".to_string())));
        assert_eq!(effective.column_type, ColumnType::Varchar(20));

        let live = target.shape();
        assert_eq!(declared.reconciled(&target, &live), target);
    }
}
