//! Schema change primitives, column specifications and their SQL rendering

pub mod change;
pub mod column;
pub mod handle;
pub mod sql;

pub use change::{ColumnDef, IndexDef, RawSql, SchemaChange};
pub use column::{
    ColumnDefault, ColumnShape, ColumnSpec, ColumnType, DefaultShape, ForeignKey, IndexMethod,
    OnDelete,
};
pub use handle::TableHandle;
pub use sql::{render, split_sql_statements, SchemaBuilder};
