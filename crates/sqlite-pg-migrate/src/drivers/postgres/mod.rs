//! PostgreSQL adapter (the migration target).
//!
//! Uses deadpool-postgres with a single pooled connection. Batches are loaded
//! with text-format COPY inside a transaction; introspection reads
//! `information_schema` and `pg_catalog` for the configured schema.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, PoolError, RecyclingMethod};
use futures::{SinkExt, TryStreamExt};
use tokio::sync::mpsc;
use tokio_postgres::Config as PgConfig;
use tracing::{debug, info, warn};

use crate::config::{MigrationConfig, PostgresSpec};
use crate::core::identifier::{qualify, quote_ident, quote_literal};
use crate::core::schema::{CheckConstraint, Column, ColumnProfile, ForeignKey, Index, Table, TargetType};
use crate::core::traits::{DatabaseAdapter, Engine};
use crate::core::value::{Batch, Row, SqlValue};
use crate::drivers::common::{retry_transient, RetryPolicy, SslMode, TlsBuilder};
use crate::error::{MigrateError, Result};

/// Batches buffered between the reader task and the consumer.
const READ_AHEAD_BATCHES: usize = 4;

/// Connection handling shared by the adapter and its reader tasks.
#[derive(Clone)]
struct Acquirer {
    pool: Pool,
    timeout: Duration,
    retry: RetryPolicy,
}

impl Acquirer {
    async fn get(&self) -> Result<Object> {
        let this = self;
        retry_transient(self.retry, "acquiring PostgreSQL connection", move || async move {
            match tokio::time::timeout(this.timeout, this.pool.get()).await {
                Ok(Ok(client)) => Ok(client),
                Ok(Err(e)) => Err(pool_error(e, "acquiring PostgreSQL connection")),
                Err(_) => Err(MigrateError::Timeout {
                    context: "acquiring PostgreSQL connection".to_string(),
                    seconds: this.timeout.as_secs(),
                }),
            }
        })
        .await
    }
}

fn pool_error(e: PoolError, context: &str) -> MigrateError {
    match &e {
        PoolError::Backend(pg) if pg.as_db_error().is_some() => MigrateError::connection(&e, context),
        PoolError::Backend(_) | PoolError::Timeout(_) => MigrateError::transient(&e, context),
        _ => MigrateError::connection(&e, context),
    }
}

/// PostgreSQL target adapter.
pub struct PostgresAdapter {
    acquirer: Acquirer,
    spec: PostgresSpec,
}

impl PostgresAdapter {
    /// Connect to the target and verify the connection.
    pub async fn connect(spec: &PostgresSpec, migration: &MigrationConfig) -> Result<Self> {
        let mut pg_config = PgConfig::new();
        pg_config.host(&spec.host);
        pg_config.port(spec.port);
        pg_config.dbname(&spec.database);
        pg_config.user(&spec.user);
        pg_config.password(&spec.password);
        pg_config.application_name("sqlite-pg-migrate");

        // Connection options for reliability
        pg_config.keepalives(true);
        pg_config.keepalives_idle(Duration::from_secs(30));
        pg_config.connect_timeout(Duration::from_secs(migration.connect_timeout_secs));
        pg_config.options(&format!(
            "-c statement_timeout={}",
            migration.statement_timeout_secs * 1000
        ));

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };

        let ssl_mode = SslMode::parse(&spec.ssl_mode)?;
        let mgr = match TlsBuilder::new(ssl_mode).build()? {
            Some(tls) => Manager::from_config(pg_config, tls, mgr_config),
            None => {
                warn!("PostgreSQL TLS is disabled. Credentials will be transmitted in plaintext.");
                Manager::from_config(pg_config, tokio_postgres::NoTls, mgr_config)
            }
        };

        let pool = Pool::builder(mgr)
            .max_size(1)
            .build()
            .map_err(|e| MigrateError::connection(e, "creating PostgreSQL pool"))?;

        let acquirer = Acquirer {
            pool,
            timeout: Duration::from_secs(migration.acquire_timeout_secs),
            retry: RetryPolicy::new(migration.connect_retries, migration.retry_delay_ms),
        };

        // Test connection
        let client = acquirer.get().await?;
        client
            .simple_query("SELECT 1")
            .await
            .map_err(|e| MigrateError::connection(e, "testing PostgreSQL target connection"))?;
        drop(client);

        info!("Connected to PostgreSQL target: {}", spec.endpoint());

        Ok(Self {
            acquirer,
            spec: spec.clone(),
        })
    }

    fn schema(&self) -> &str {
        &self.spec.schema
    }

    async fn client(&self) -> Result<Object> {
        self.acquirer.get().await
    }

    /// Select expression for a column, cast so it decodes into a [`SqlValue`].
    fn select_expr(column: &Column) -> Result<String> {
        let q = quote_ident(&column.name)?;
        Ok(match column.target() {
            TargetType::Enum { .. } | TargetType::Numeric { .. } => format!("{}::text", q),
            _ => q,
        })
    }

    fn select_list(table: &Table) -> Result<String> {
        let parts = table
            .columns
            .iter()
            .map(Self::select_expr)
            .collect::<Result<Vec<_>>>()?;
        Ok(parts.join(", "))
    }

    fn select_sql(&self, table: &Table) -> Result<String> {
        let mut sql = format!(
            "SELECT {} FROM {}",
            Self::select_list(table)?,
            qualify(self.schema(), &table.name)?
        );
        if table.has_pk() {
            let order = table
                .primary_key
                .iter()
                .map(|c| quote_ident(c))
                .collect::<Result<Vec<_>>>()?;
            sql.push_str(&format!(" ORDER BY {}", order.join(", ")));
        }
        Ok(sql)
    }

    async fn stream_rows_impl(
        acquirer: Acquirer,
        table: Table,
        query: String,
        batch_size: usize,
        tx: &mpsc::Sender<Result<Batch>>,
    ) -> Result<()> {
        let client = acquirer.get().await?;
        let stream = client.query_raw(&query, Vec::<String>::new()).await?;
        futures::pin_mut!(stream);

        let mut buf: Vec<Row> = Vec::with_capacity(batch_size);
        let mut offset: u64 = 0;
        while let Some(row) = stream.try_next().await? {
            buf.push(decode_row(&row, &table)?);
            if buf.len() >= batch_size {
                let batch = Batch::new(std::mem::take(&mut buf), offset);
                offset += batch.len() as u64;
                if tx.send(Ok(batch)).await.is_err() {
                    return Ok(());
                }
            }
        }
        if !buf.is_empty() {
            let _ = tx.send(Ok(Batch::new(buf, offset))).await;
        }
        Ok(())
    }
}

/// Decode a row selected through [`PostgresAdapter::select_list`].
fn decode_row(row: &tokio_postgres::Row, table: &Table) -> Result<Row> {
    table
        .columns
        .iter()
        .enumerate()
        .map(|(i, c)| decode_value(row, i, c.target()))
        .collect()
}

fn decode_value(row: &tokio_postgres::Row, idx: usize, target: &TargetType) -> Result<SqlValue> {
    let value = match target {
        TargetType::BigInt | TargetType::Identity => row
            .try_get::<_, Option<i64>>(idx)?
            .map_or(SqlValue::Null, SqlValue::I64),
        TargetType::DoublePrecision => row
            .try_get::<_, Option<f64>>(idx)?
            .map_or(SqlValue::Null, SqlValue::F64),
        TargetType::Text | TargetType::Enum { .. } | TargetType::Numeric { .. } => row
            .try_get::<_, Option<String>>(idx)?
            .map_or(SqlValue::Null, SqlValue::Text),
        TargetType::Bytea => row
            .try_get::<_, Option<Vec<u8>>>(idx)?
            .map_or(SqlValue::Null, SqlValue::Bytes),
        TargetType::Boolean => row
            .try_get::<_, Option<bool>>(idx)?
            .map_or(SqlValue::Null, SqlValue::Bool),
        TargetType::Timestamp => row
            .try_get::<_, Option<NaiveDateTime>>(idx)?
            .map_or(SqlValue::Null, SqlValue::Timestamp),
        TargetType::TimestampTz => row
            .try_get::<_, Option<DateTime<Utc>>>(idx)?
            .map_or(SqlValue::Null, |ts| SqlValue::TimestampTz(ts.fixed_offset())),
        TargetType::Date => row
            .try_get::<_, Option<NaiveDate>>(idx)?
            .map_or(SqlValue::Null, SqlValue::Date),
    };
    Ok(value)
}

/// Append one row in COPY text format.
fn encode_copy_row(row: &[SqlValue], buf: &mut BytesMut) {
    for (i, value) in row.iter().enumerate() {
        if i > 0 {
            buf.put_u8(b'\t');
        }
        buf.put_slice(value_to_text(value).as_bytes());
    }
    buf.put_u8(b'\n');
}

/// Convert a value to its COPY text representation.
fn value_to_text(value: &SqlValue) -> String {
    match value {
        SqlValue::Null => "\\N".to_string(),
        SqlValue::Bool(b) => if *b { "t" } else { "f" }.to_string(),
        SqlValue::I64(i) => i.to_string(),
        SqlValue::F64(f) if f.is_nan() => "NaN".to_string(),
        SqlValue::F64(f) if f.is_infinite() => {
            if f.is_sign_positive() { "Infinity" } else { "-Infinity" }.to_string()
        }
        SqlValue::F64(f) => f.to_string(),
        SqlValue::Text(s) => escape_copy_text(s),
        SqlValue::Bytes(b) => format!("\\\\x{}", hex::encode(b)),
        SqlValue::Timestamp(ts) => ts.format("%Y-%m-%d %H:%M:%S%.f").to_string(),
        SqlValue::TimestampTz(ts) => ts.format("%Y-%m-%d %H:%M:%S%.f%:z").to_string(),
        SqlValue::Date(d) => d.format("%Y-%m-%d").to_string(),
    }
}

/// Escape text for PostgreSQL COPY.
fn escape_copy_text(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '\t' => result.push_str("\\t"),
            '\n' => result.push_str("\\n"),
            '\r' => result.push_str("\\r"),
            _ => result.push(c),
        }
    }
    result
}

/// 1-based input line from a COPY error context (`COPY t, line 3, column x`).
fn copy_error_line(context: &str) -> Option<usize> {
    let rest = &context[context.find("line ")? + 5..];
    let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
    digits.parse().ok()
}

/// Build the data error for a rejected COPY.
fn copy_error(table: &Table, rows: &[Row], e: tokio_postgres::Error) -> MigrateError {
    let (message, row_key) = match e.as_db_error() {
        Some(db) => {
            let mut message = db.message().to_string();
            if let Some(detail) = db.detail() {
                message.push_str(&format!(" ({})", detail));
            }
            let row_key = db
                .where_()
                .and_then(copy_error_line)
                .and_then(|line| {
                    let row = rows.get(line.checked_sub(1)?)?;
                    table
                        .key_of(row)
                        .or_else(|| Some(format!("position {}", line - 1)))
                });
            (message, row_key)
        }
        None => (e.to_string(), None),
    };
    MigrateError::Data {
        table: table.name.clone(),
        batch_offset: 0,
        row_key,
        message,
    }
}

fn referential_action(code: &str) -> &'static str {
    match code {
        "r" => "RESTRICT",
        "c" => "CASCADE",
        "n" => "SET NULL",
        "d" => "SET DEFAULT",
        _ => "NO ACTION",
    }
}

/// Body of a `pg_get_constraintdef` CHECK definition.
fn check_body(def: &str) -> String {
    let body = def
        .trim()
        .strip_prefix("CHECK")
        .unwrap_or(def)
        .trim()
        .trim_end_matches(" NOT VALID");
    match body.strip_prefix('(').and_then(|b| b.strip_suffix(')')) {
        Some(inner) => inner.trim().to_string(),
        None => body.to_string(),
    }
}

#[async_trait]
impl DatabaseAdapter for PostgresAdapter {
    fn engine(&self) -> Engine {
        Engine::Postgres
    }

    fn describe(&self) -> String {
        format!("{} (schema {})", self.spec.endpoint(), self.spec.schema)
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        let client = self.client().await?;
        let rows = client
            .query(
                "SELECT table_name::text FROM information_schema.tables \
                 WHERE table_schema = $1 AND table_type = 'BASE TABLE' \
                 ORDER BY table_name",
                &[&self.spec.schema],
            )
            .await?;
        Ok(rows.iter().map(|r| r.get(0)).collect())
    }

    async fn introspect_columns(&self, table: &str) -> Result<Vec<Column>> {
        let client = self.client().await?;
        let rows = client
            .query(
                "SELECT c.column_name::text, \
                        CASE WHEN c.data_type = 'USER-DEFINED' THEN c.udt_name::text ELSE c.data_type::text END, \
                        c.is_nullable::text, c.column_default::text, c.ordinal_position::int8, \
                        COALESCE(k.ordinal_position, 0)::int8 \
                 FROM information_schema.columns c \
                 LEFT JOIN ( \
                     SELECT kcu.column_name, kcu.ordinal_position \
                     FROM information_schema.table_constraints tc \
                     JOIN information_schema.key_column_usage kcu \
                       ON tc.constraint_name = kcu.constraint_name \
                      AND tc.table_schema = kcu.table_schema \
                      AND tc.table_name = kcu.table_name \
                     WHERE tc.constraint_type = 'PRIMARY KEY' \
                       AND tc.table_schema = $1 AND tc.table_name = $2 \
                 ) k ON k.column_name = c.column_name \
                 WHERE c.table_schema = $1 AND c.table_name = $2 \
                 ORDER BY c.ordinal_position",
                &[&self.spec.schema, &table],
            )
            .await?;

        let columns = rows
            .iter()
            .map(|row| {
                let ordinal: i64 = row.get(4);
                let mut col = Column::new(
                    row.get::<_, String>(0),
                    row.get::<_, String>(1),
                    (ordinal - 1).max(0) as usize,
                );
                col.is_nullable = row.get::<_, String>(2) == "YES";
                col.default = row.get(3);
                col.pk_position = row.get::<_, i64>(5) as u32;
                col
            })
            .collect();
        Ok(columns)
    }

    async fn introspect_foreign_keys(&self, table: &str) -> Result<Vec<ForeignKey>> {
        let client = self.client().await?;
        let rows = client
            .query(
                "SELECT ref.relname::text, \
                        ARRAY(SELECT a.attname::text FROM unnest(con.conkey) WITH ORDINALITY k(n, o) \
                              JOIN pg_attribute a ON a.attrelid = con.conrelid AND a.attnum = k.n \
                              ORDER BY k.o), \
                        ARRAY(SELECT a.attname::text FROM unnest(con.confkey) WITH ORDINALITY k(n, o) \
                              JOIN pg_attribute a ON a.attrelid = con.confrelid AND a.attnum = k.n \
                              ORDER BY k.o), \
                        con.confdeltype::text, con.confupdtype::text \
                 FROM pg_constraint con \
                 JOIN pg_class rel ON rel.oid = con.conrelid \
                 JOIN pg_namespace ns ON ns.oid = rel.relnamespace \
                 JOIN pg_class ref ON ref.oid = con.confrelid \
                 WHERE con.contype = 'f' AND ns.nspname = $1 AND rel.relname = $2 \
                 ORDER BY con.conname",
                &[&self.spec.schema, &table],
            )
            .await?;

        Ok(rows
            .iter()
            .map(|row| ForeignKey {
                ref_table: row.get(0),
                columns: row.get(1),
                ref_columns: row.get(2),
                on_delete: referential_action(row.get(3)).to_string(),
                on_update: referential_action(row.get(4)).to_string(),
            })
            .collect())
    }

    async fn introspect_indexes(&self, table: &str) -> Result<Vec<Index>> {
        let client = self.client().await?;
        let rows = client
            .query(
                "SELECT i.relname::text, ix.indisunique, \
                        ARRAY(SELECT a.attname::text FROM unnest(ix.indkey::int2[]) WITH ORDINALITY k(n, o) \
                              JOIN pg_attribute a ON a.attrelid = ix.indrelid AND a.attnum = k.n \
                              ORDER BY k.o) \
                 FROM pg_index ix \
                 JOIN pg_class t ON t.oid = ix.indrelid \
                 JOIN pg_class i ON i.oid = ix.indexrelid \
                 JOIN pg_namespace ns ON ns.oid = t.relnamespace \
                 WHERE ns.nspname = $1 AND t.relname = $2 AND NOT ix.indisprimary \
                 ORDER BY i.relname",
                &[&self.spec.schema, &table],
            )
            .await?;

        Ok(rows
            .iter()
            .map(|row| Index {
                name: row.get(0),
                is_unique: row.get(1),
                columns: row.get(2),
            })
            .collect())
    }

    async fn introspect_checks(&self, table: &str) -> Result<Vec<CheckConstraint>> {
        let client = self.client().await?;
        let rows = client
            .query(
                "SELECT con.conname::text, pg_get_constraintdef(con.oid) \
                 FROM pg_constraint con \
                 JOIN pg_class rel ON rel.oid = con.conrelid \
                 JOIN pg_namespace ns ON ns.oid = rel.relnamespace \
                 WHERE con.contype = 'c' AND ns.nspname = $1 AND rel.relname = $2 \
                 ORDER BY con.conname",
                &[&self.spec.schema, &table],
            )
            .await?;

        Ok(rows
            .iter()
            .map(|row| CheckConstraint {
                name: Some(row.get(0)),
                definition: check_body(row.get(1)),
                column: None,
            })
            .collect())
    }

    async fn execute_ddl(&self, statement: &str) -> Result<()> {
        let client = self.client().await?;
        client
            .batch_execute(statement)
            .await
            .map_err(|e| MigrateError::ddl(statement, e))?;
        Ok(())
    }

    async fn execute_ddl_batch(&self, statements: &[String]) -> Result<()> {
        let mut client = self.client().await?;
        let tx = client.transaction().await?;
        for statement in statements {
            tx.batch_execute(statement)
                .await
                .map_err(|e| MigrateError::ddl(statement.as_str(), e))?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn dry_run_ddl(&self, statements: &[String]) -> Result<()> {
        let mut client = self.client().await?;
        let tx = client.transaction().await?;
        for statement in statements {
            debug!("Dry-run: {}", statement);
            tx.batch_execute(statement)
                .await
                .map_err(|e| MigrateError::ddl(statement.as_str(), e))?;
        }
        tx.rollback().await?;
        Ok(())
    }

    fn stream_rows(&self, table: &Table, batch_size: usize) -> mpsc::Receiver<Result<Batch>> {
        let (tx, rx) = mpsc::channel(READ_AHEAD_BATCHES);
        let acquirer = self.acquirer.clone();
        let table = table.clone();
        let query = self.select_sql(&table);
        let batch_size = batch_size.max(1);

        tokio::spawn(async move {
            let result = match query {
                Ok(query) => Self::stream_rows_impl(acquirer, table, query, batch_size, &tx).await,
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                let _ = tx.send(Err(e)).await;
            }
        });

        rx
    }

    async fn insert_batch(&self, table: &Table, rows: &[Row]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let columns = table
            .columns
            .iter()
            .map(|c| quote_ident(&c.name))
            .collect::<Result<Vec<_>>>()?;
        let copy_sql = format!(
            "COPY {} ({}) FROM STDIN",
            qualify(self.schema(), &table.name)?,
            columns.join(", ")
        );

        let mut client = self.client().await?;
        let tx = client.transaction().await?;

        let sink = tx
            .copy_in(&copy_sql)
            .await
            .map_err(|e| copy_error(table, rows, e))?;

        let mut buf = BytesMut::with_capacity(rows.len() * 128);
        for row in rows {
            encode_copy_row(row, &mut buf);
        }

        futures::pin_mut!(sink);
        sink.send(buf.split().freeze())
            .await
            .map_err(|e| copy_error(table, rows, e))?;
        let written = sink.finish().await.map_err(|e| copy_error(table, rows, e))?;

        tx.commit()
            .await
            .map_err(|e| copy_error(table, rows, e))?;
        debug!("{}: copied {} rows", table.name, written);
        Ok(written)
    }

    async fn row_count(&self, table: &str) -> Result<i64> {
        let client = self.client().await?;
        let sql = format!("SELECT COUNT(*) FROM {}", qualify(self.schema(), table)?);
        let row = client.query_one(&sql, &[]).await?;
        Ok(row.get::<_, i64>(0))
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        let client = self.client().await?;
        let row = client
            .query_one(
                "SELECT EXISTS (SELECT 1 FROM information_schema.tables \
                 WHERE table_schema = $1 AND table_name = $2)",
                &[&self.spec.schema, &table],
            )
            .await?;
        Ok(row.get::<_, bool>(0))
    }

    async fn profile_column(&self, table: &str, column: &str) -> Result<ColumnProfile> {
        let client = self.client().await?;
        let sql = format!(
            "SELECT {}::text FROM {}",
            quote_ident(column)?,
            qualify(self.schema(), table)?
        );
        let rows = client.query(&sql, &[]).await?;
        let mut profile = ColumnProfile::default();
        for row in rows {
            let value = row
                .get::<_, Option<String>>(0)
                .map_or(SqlValue::Null, SqlValue::Text);
            profile.observe(&value);
        }
        Ok(profile)
    }

    async fn fetch_rows_by_key(&self, table: &Table, keys: &[Row]) -> Result<Vec<Row>> {
        if keys.is_empty() || !table.has_pk() {
            return Ok(Vec::new());
        }
        let pk = table
            .primary_key
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Result<Vec<_>>>()?;
        let predicates: Vec<String> = keys
            .iter()
            .map(|key| {
                let terms: Vec<String> = pk
                    .iter()
                    .zip(key)
                    .map(|(col, v)| format!("{} = {}", col, v.to_sql_literal()))
                    .collect();
                format!("({})", terms.join(" AND "))
            })
            .collect();
        let sql = format!(
            "SELECT {} FROM {} WHERE {}",
            Self::select_list(table)?,
            qualify(self.schema(), &table.name)?,
            predicates.join(" OR ")
        );

        let client = self.client().await?;
        let rows = client.query(&sql, &[]).await?;
        rows.iter().map(|r| decode_row(r, table)).collect()
    }

    async fn count_values_outside(
        &self,
        table: &str,
        column: &str,
        allowed: &[SqlValue],
    ) -> Result<i64> {
        let col = quote_ident(column)?;
        let qualified = qualify(self.schema(), table)?;
        let sql = if allowed.is_empty() {
            format!("SELECT COUNT({}) FROM {}", col, qualified)
        } else if allowed.iter().all(|v| matches!(v, SqlValue::Text(_))) {
            let list: Vec<String> = allowed
                .iter()
                .map(|v| match v {
                    SqlValue::Text(s) => quote_literal(s),
                    other => other.to_sql_literal(),
                })
                .collect();
            format!(
                "SELECT COUNT(*) FROM {} WHERE {} IS NOT NULL AND {}::text NOT IN ({})",
                qualified,
                col,
                col,
                list.join(", ")
            )
        } else {
            let list: Vec<String> = allowed.iter().map(SqlValue::to_sql_literal).collect();
            format!(
                "SELECT COUNT(*) FROM {} WHERE {} IS NOT NULL AND {} NOT IN ({})",
                qualified,
                col,
                col,
                list.join(", ")
            )
        };
        let client = self.client().await?;
        let row = client.query_one(&sql, &[]).await?;
        Ok(row.get::<_, i64>(0))
    }

    async fn snapshot(&self, dir: &Path) -> Result<PathBuf> {
        let stamp = Utc::now().format("%Y%m%dT%H%M%SZ");
        let dest = dir.join(format!("{}_backup_{}.sql", self.spec.database, stamp));

        let output = tokio::process::Command::new("pg_dump")
            .arg("--host")
            .arg(&self.spec.host)
            .arg("--port")
            .arg(self.spec.port.to_string())
            .arg("--username")
            .arg(&self.spec.user)
            .arg("--dbname")
            .arg(&self.spec.database)
            .arg("--schema")
            .arg(&self.spec.schema)
            .arg("--file")
            .arg(&dest)
            .env("PGPASSWORD", &self.spec.password)
            .output()
            .await?;

        if !output.status.success() {
            return Err(MigrateError::Io(io::Error::other(format!(
                "pg_dump failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ))));
        }
        info!("Backed up {} to {}", self.spec.endpoint(), dest.display());
        Ok(dest)
    }

    async fn close(&self) {
        self.acquirer.pool.close();
    }
}
