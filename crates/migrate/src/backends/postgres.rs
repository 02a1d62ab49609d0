//! PostgreSQL Backend Implementation
//!
//! DDL runs inside ordinary transactions, so an atomic unit either commits
//! completely or leaves nothing behind. The run lock is a session-level
//! advisory lock held on a connection detached from the pool; if the
//! process dies the session ends and the lock goes with it.

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions};
use sqlx::{Connection, Executor, Postgres, Row, Transaction};
use std::time::Duration;

use super::core::{MigrationBackend, MigrationLock, MigrationTransaction, SchemaEditor};
use crate::definitions::AppliedMigrationRecord;
use crate::error::{MigrationError, MigrationResult};
use crate::schema::sql::{derived_name, index_name, primary_key_name, quote_ident};
use crate::schema::{render, ColumnShape, ColumnType, DefaultShape, SchemaChange};
use crate::unit::{MigrationId, Namespace};

/// PostgreSQL migration backend
#[derive(Debug, Clone)]
pub struct PostgresBackend {
    pool: PgPool,
}

impl PostgresBackend {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect a dedicated pool
    pub async fn connect(database_url: &str, max_connections: u32) -> MigrationResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await
            .map_err(|e| {
                MigrationError::StorageUnavailable(format!("Failed to connect to database: {}", e))
            })?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl MigrationBackend for PostgresBackend {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn acquire_lock(
        &self,
        key: i64,
        timeout: Option<Duration>,
    ) -> MigrationResult<Box<dyn MigrationLock>> {
        let mut conn = self.pool.acquire().await?.detach();

        let locked = match timeout {
            Some(limit) => {
                let attempt = sqlx::query("SELECT pg_advisory_lock($1)")
                    .bind(key)
                    .execute(&mut conn);
                match tokio::time::timeout(limit, attempt).await {
                    Ok(result) => result.map(|_| ()).map_err(MigrationError::from),
                    Err(_) => Err(MigrationError::LockUnavailable(format!(
                        "advisory lock {} still held by another session after {:?}",
                        key, limit
                    ))),
                }
            }
            None => sqlx::query("SELECT pg_advisory_lock($1)")
                .bind(key)
                .execute(&mut conn)
                .await
                .map(|_| ())
                .map_err(MigrationError::from),
        };

        if let Err(err) = locked {
            // closing the session cancels a pending lock request
            if let Err(close_err) = conn.close().await {
                tracing::debug!("closing lock connection failed: {}", close_err);
            }
            return Err(err);
        }

        tracing::debug!(key, "advisory lock acquired");
        Ok(Box::new(PostgresLock { conn, key }))
    }

    async fn ensure_history_table(&self, table: &str) -> MigrationResult<()> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (
    id VARCHAR(255) PRIMARY KEY,
    namespace VARCHAR(63) NOT NULL,
    description TEXT NOT NULL,
    applied_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    batch INTEGER NOT NULL
)",
            quote_ident(table)
        );
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }

    async fn applied_records(&self, table: &str) -> MigrationResult<Vec<AppliedMigrationRecord>> {
        let sql = format!(
            "SELECT id, namespace, description, applied_at, batch FROM {} \
             ORDER BY batch, applied_at, id",
            quote_ident(table)
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.try_get("id")?;
            let namespace: String = row.try_get("namespace")?;
            let malformed = |e: MigrationError| {
                MigrationError::Database(format!("history table {} holds a malformed row: {}", table, e))
            };
            records.push(AppliedMigrationRecord {
                id: MigrationId::new(&id).map_err(malformed)?,
                namespace: Namespace::new(&namespace).map_err(malformed)?,
                description: row.try_get("description")?,
                applied_at: row.try_get("applied_at")?,
                batch: row.try_get("batch")?,
            });
        }
        Ok(records)
    }

    async fn begin(
        &self,
        atomic: bool,
        statement_timeout: Option<Duration>,
    ) -> MigrationResult<Box<dyn MigrationTransaction>> {
        let inner = if atomic {
            Inner::Atomic(self.pool.begin().await?)
        } else {
            Inner::Direct(self.pool.acquire().await?)
        };
        let mut tx = PostgresTransaction {
            inner,
            session_timeout: false,
        };

        if let Some(timeout) = statement_timeout {
            let millis = timeout.as_millis();
            if atomic {
                tx.execute_raw(&format!("SET LOCAL statement_timeout = {}", millis))
                    .await?;
            } else {
                tx.execute_raw(&format!("SET statement_timeout = {}", millis))
                    .await?;
                tx.session_timeout = true;
            }
        }

        Ok(Box::new(tx))
    }
}

struct PostgresLock {
    conn: PgConnection,
    key: i64,
}

#[async_trait]
impl MigrationLock for PostgresLock {
    async fn release(self: Box<Self>) -> MigrationResult<()> {
        let PostgresLock { mut conn, key } = *self;
        let unlocked = sqlx::query("SELECT pg_advisory_unlock($1)")
            .bind(key)
            .execute(&mut conn)
            .await;
        let closed = conn.close().await;
        unlocked?;
        closed?;
        tracing::debug!(key, "advisory lock released");
        Ok(())
    }
}

enum Inner {
    Atomic(Transaction<'static, Postgres>),
    Direct(PoolConnection<Postgres>),
}

/// Scope for one unit: a transaction, or a plain pooled connection for
/// non-atomic units
pub struct PostgresTransaction {
    inner: Inner,
    session_timeout: bool,
}

impl PostgresTransaction {
    fn conn(&mut self) -> &mut PgConnection {
        match &mut self.inner {
            Inner::Atomic(tx) => &mut **tx,
            Inner::Direct(conn) => &mut **conn,
        }
    }

    async fn constraint_exists(&mut self, table: &str, name: &str) -> MigrationResult<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (
                SELECT 1 FROM pg_constraint
                WHERE conrelid = format('%I', $1::text)::regclass AND conname = $2
            )",
        )
        .bind(table)
        .bind(name)
        .fetch_one(self.conn())
        .await?;
        Ok(exists)
    }

    async fn column_names(&mut self, table: &str) -> MigrationResult<Vec<String>> {
        let names = sqlx::query_scalar::<_, String>(
            "SELECT column_name::text FROM information_schema.columns
             WHERE table_schema = current_schema() AND table_name = $1
             ORDER BY ordinal_position",
        )
        .bind(table)
        .fetch_all(self.conn())
        .await?;
        Ok(names)
    }

    /// Statements renaming the derived constraint and index names of one
    /// column, for whichever of them exist
    async fn derived_renames(
        &mut self,
        old_table: &str,
        old_column: &str,
        new_table: &str,
        new_column: &str,
    ) -> MigrationResult<Vec<String>> {
        let mut statements = Vec::new();
        for suffix in ["key", "fkey"] {
            let old = derived_name(old_table, old_column, suffix);
            if self.constraint_exists(old_table, &old).await? {
                statements.push(format!(
                    "ALTER TABLE {} RENAME CONSTRAINT {} TO {};",
                    quote_ident(new_table),
                    quote_ident(&old),
                    quote_ident(&derived_name(new_table, new_column, suffix))
                ));
            }
        }
        let old_index = index_name(old_table, old_column);
        if self.index_exists(&old_index).await? {
            statements.push(format!(
                "ALTER INDEX {} RENAME TO {};",
                quote_ident(&old_index),
                quote_ident(&index_name(new_table, new_column))
            ));
        }
        Ok(statements)
    }

    /// Full statement list for a change, including renames of derived names
    async fn statements_for(&mut self, change: &SchemaChange) -> MigrationResult<Vec<String>> {
        let mut statements = render(change);
        match change {
            SchemaChange::RenameColumn { table, from, to } => {
                let renames = self.derived_renames(table, from, table, to).await?;
                statements.extend(renames);
            }
            SchemaChange::RenameTable { from, to } => {
                let pkey = primary_key_name(from);
                if self.constraint_exists(from, &pkey).await? {
                    statements.push(format!(
                        "ALTER TABLE {} RENAME CONSTRAINT {} TO {};",
                        quote_ident(to),
                        quote_ident(&pkey),
                        quote_ident(&primary_key_name(to))
                    ));
                }
                for column in self.column_names(from).await? {
                    let renames = self.derived_renames(from, &column, to, &column).await?;
                    statements.extend(renames);
                }
            }
            _ => {}
        }
        Ok(statements)
    }
}

/// nullable, unique, indexed, data_type, character length, precision, scale,
/// default expression, referenced table, referenced column
type ShapeRow = (
    bool,
    bool,
    bool,
    String,
    Option<i32>,
    Option<i32>,
    Option<i32>,
    Option<String>,
    Option<String>,
    Option<String>,
);

#[async_trait]
impl SchemaEditor for PostgresTransaction {
    async fn apply(&mut self, change: &SchemaChange) -> MigrationResult<()> {
        if let SchemaChange::Unsafe(raw) = change {
            self.execute_raw(&raw.sql).await?;
            return Ok(());
        }
        for statement in self.statements_for(change).await? {
            tracing::trace!(sql = %statement, "executing");
            sqlx::query(&statement).execute(self.conn()).await?;
        }
        Ok(())
    }

    /// Sent as one simple query so multi-statement blocks and dollar-quoted
    /// bodies reach the server untouched
    async fn execute_raw(&mut self, sql: &str) -> MigrationResult<u64> {
        tracing::trace!(sql = %sql, "executing raw block");
        let result = self.conn().execute(sql).await?;
        Ok(result.rows_affected())
    }

    async fn table_exists(&mut self, table: &str) -> MigrationResult<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (
                SELECT 1 FROM information_schema.tables
                WHERE table_schema = current_schema() AND table_name = $1
            )",
        )
        .bind(table)
        .fetch_one(self.conn())
        .await?;
        Ok(exists)
    }

    async fn column_shape(
        &mut self,
        table: &str,
        column: &str,
    ) -> MigrationResult<Option<ColumnShape>> {
        let row = sqlx::query_as::<_, ShapeRow>(
            "SELECT
                c.is_nullable = 'YES',
                EXISTS (
                    SELECT 1 FROM pg_index i
                    JOIN pg_attribute a ON a.attrelid = i.indrelid AND a.attnum = ANY(i.indkey)
                    WHERE i.indrelid = format('%I', c.table_name)::regclass
                      AND i.indisunique AND i.indnatts = 1 AND a.attname = c.column_name
                ),
                EXISTS (
                    SELECT 1 FROM pg_index i
                    JOIN pg_attribute a ON a.attrelid = i.indrelid AND a.attnum = ANY(i.indkey)
                    WHERE i.indrelid = format('%I', c.table_name)::regclass
                      AND NOT i.indisunique AND i.indnatts = 1 AND a.attname = c.column_name
                ),
                c.data_type::text,
                c.character_maximum_length::int4,
                c.numeric_precision::int4,
                c.numeric_scale::int4,
                c.column_default::text,
                fk.ref_table,
                fk.ref_column
             FROM information_schema.columns c
             LEFT JOIN LATERAL (
                SELECT ft.relname::text AS ref_table, fa.attname::text AS ref_column
                FROM pg_constraint con
                JOIN pg_class ft ON ft.oid = con.confrelid
                JOIN pg_attribute fa ON fa.attrelid = con.confrelid AND fa.attnum = con.confkey[1]
                JOIN pg_attribute la ON la.attrelid = con.conrelid AND la.attnum = con.conkey[1]
                WHERE con.contype = 'f'
                  AND con.conrelid = format('%I', c.table_name)::regclass
                  AND array_length(con.conkey, 1) = 1
                  AND la.attname = c.column_name
                LIMIT 1
             ) fk ON TRUE
             WHERE c.table_schema = current_schema() AND c.table_name = $1 AND c.column_name = $2",
        )
        .bind(table)
        .bind(column)
        .fetch_optional(self.conn())
        .await?;

        Ok(row.map(
            |(
                nullable,
                unique,
                indexed,
                data_type,
                max_length,
                precision,
                scale,
                column_default,
                ref_table,
                ref_column,
            )| ColumnShape {
                column_type: ColumnType::from_catalog(&data_type, max_length, precision, scale),
                nullable,
                unique,
                default: column_default.as_deref().map(DefaultShape::from_sql),
                indexed,
                references: ref_table.zip(ref_column),
            },
        ))
    }

    async fn index_exists(&mut self, name: &str) -> MigrationResult<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (
                SELECT 1 FROM pg_indexes
                WHERE schemaname = current_schema() AND indexname = $1
            )",
        )
        .bind(name)
        .fetch_one(self.conn())
        .await?;
        Ok(exists)
    }

    async fn column_dependents(
        &mut self,
        table: &str,
        column: &str,
    ) -> MigrationResult<Vec<String>> {
        let dependents = sqlx::query_scalar::<_, String>(
            "SELECT 'index ' || ic.relname::text
             FROM pg_index i
             JOIN pg_class ic ON ic.oid = i.indexrelid
             JOIN pg_attribute a ON a.attrelid = i.indrelid AND a.attnum = ANY(i.indkey)
             WHERE i.indrelid = format('%I', $1::text)::regclass
               AND a.attname = $2 AND i.indnatts > 1
             UNION ALL
             SELECT 'foreign key ' || con.conname::text || ' on ' || con.conrelid::regclass::text
             FROM pg_constraint con
             JOIN pg_attribute a ON a.attrelid = con.confrelid AND a.attnum = ANY(con.confkey)
             WHERE con.contype = 'f'
               AND con.confrelid = format('%I', $1::text)::regclass
               AND a.attname = $2",
        )
        .bind(table)
        .bind(column)
        .fetch_all(self.conn())
        .await?;
        Ok(dependents)
    }

    async fn table_dependents(&mut self, table: &str) -> MigrationResult<Vec<String>> {
        let dependents = sqlx::query_scalar::<_, String>(
            "SELECT 'foreign key ' || conname::text || ' on ' || conrelid::regclass::text
             FROM pg_constraint
             WHERE contype = 'f'
               AND confrelid = format('%I', $1::text)::regclass
               AND conrelid <> confrelid",
        )
        .bind(table)
        .fetch_all(self.conn())
        .await?;
        Ok(dependents)
    }
}

#[async_trait]
impl MigrationTransaction for PostgresTransaction {
    fn editor(&mut self) -> &mut dyn SchemaEditor {
        self
    }

    async fn record_applied(
        &mut self,
        table: &str,
        record: &AppliedMigrationRecord,
    ) -> MigrationResult<()> {
        let sql = format!(
            "INSERT INTO {} (id, namespace, description, applied_at, batch) \
             VALUES ($1, $2, $3, $4, $5)",
            quote_ident(table)
        );
        sqlx::query(&sql)
            .bind(record.id.as_str())
            .bind(record.namespace.as_str())
            .bind(&record.description)
            .bind(record.applied_at)
            .bind(record.batch)
            .execute(self.conn())
            .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> MigrationResult<()> {
        let mut this = *self;
        if this.session_timeout {
            this.execute_raw("RESET statement_timeout").await?;
        }
        match this.inner {
            Inner::Atomic(tx) => tx.commit().await?,
            Inner::Direct(_) => {}
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> MigrationResult<()> {
        let mut this = *self;
        if this.session_timeout {
            this.execute_raw("RESET statement_timeout").await?;
        }
        match this.inner {
            Inner::Atomic(tx) => tx.rollback().await?,
            Inner::Direct(_) => {
                tracing::warn!("rolling back a non-atomic scope; applied changes remain")
            }
        }
        Ok(())
    }
}
