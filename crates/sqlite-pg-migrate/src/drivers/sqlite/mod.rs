//! SQLite adapter (the migration source).
//!
//! Uses SQLx with a single pooled connection. Values are read together with
//! their `typeof()` storage class so the dynamic typing of each cell is kept
//! intact until the transform step decides what the target needs.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::TryStreamExt;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row as _;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::SqliteSpec;
use crate::core::identifier::quote_ident;
use crate::core::schema::{CheckConstraint, Column, ColumnProfile, ForeignKey, Index, Table};
use crate::core::traits::{DatabaseAdapter, Engine};
use crate::core::value::{Batch, Row, SqlValue};
use crate::error::{MigrateError, Result, SchemaError};
use crate::translate::check::extract_checks;

/// Connection pool timeout.
const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Batches buffered between the reader task and the consumer.
const READ_AHEAD_BATCHES: usize = 4;

/// SQLite source adapter.
pub struct SqliteAdapter {
    pool: SqlitePool,
    path: PathBuf,
}

impl SqliteAdapter {
    /// Open the database file. The file must already exist.
    pub async fn connect(spec: &SqliteSpec) -> Result<Self> {
        if !spec.path.is_file() {
            return Err(MigrateError::connection(
                format!("database file {} does not exist", spec.path.display()),
                "opening SQLite source",
            ));
        }

        let options = SqliteConnectOptions::new()
            .filename(&spec.path)
            .create_if_missing(false)
            .busy_timeout(Duration::from_secs(spec.busy_timeout_secs));

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .acquire_timeout(POOL_CONNECTION_TIMEOUT)
            .connect_with(options)
            .await
            .map_err(|e| MigrateError::connection(e, "opening SQLite source"))?;

        // Test connection
        sqlx::query("SELECT 1")
            .fetch_one(&pool)
            .await
            .map_err(|e| MigrateError::connection(e, "testing SQLite source connection"))?;

        info!("Opened SQLite source: {}", spec.path.display());

        Ok(Self {
            pool,
            path: spec.path.clone(),
        })
    }

    /// Source file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `typeof(col), col` pairs for every column, in column order.
    fn typed_select_list(columns: &[String]) -> Result<String> {
        let parts = columns
            .iter()
            .map(|c| {
                let q = quote_ident(c)?;
                Ok(format!("typeof({q}), {q}"))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(parts.join(", "))
    }

    fn select_sql(table: &Table) -> Result<String> {
        let mut sql = format!(
            "SELECT {} FROM {}",
            Self::typed_select_list(&table.column_names())?,
            quote_ident(&table.name)?
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
        pool: SqlitePool,
        query: String,
        ncols: usize,
        batch_size: usize,
        tx: &mpsc::Sender<Result<Batch>>,
    ) -> Result<()> {
        let mut rows = sqlx::query(&query).fetch(&pool);
        let mut buf: Vec<Row> = Vec::with_capacity(batch_size);
        let mut offset: u64 = 0;

        while let Some(row) = rows.try_next().await? {
            buf.push(decode_row(&row, ncols)?);
            if buf.len() >= batch_size {
                let batch = Batch::new(std::mem::take(&mut buf), offset);
                offset += batch.len() as u64;
                if tx.send(Ok(batch)).await.is_err() {
                    // Consumer stopped reading.
                    return Ok(());
                }
            }
        }

        if !buf.is_empty() {
            let _ = tx.send(Ok(Batch::new(buf, offset))).await;
        }
        Ok(())
    }

    fn backup_file_name(&self) -> String {
        let stem = self
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "source".to_string());
        let stamp = Utc::now().format("%Y%m%dT%H%M%SZ");
        match self.path.extension() {
            Some(ext) => format!("{}_backup_{}.{}", stem, stamp, ext.to_string_lossy()),
            None => format!("{}_backup_{}", stem, stamp),
        }
    }
}

/// Decode a row selected through [`SqliteAdapter::typed_select_list`].
fn decode_row(row: &SqliteRow, ncols: usize) -> Result<Row> {
    (0..ncols).map(|i| decode_value(row, i * 2)).collect()
}

fn decode_value(row: &SqliteRow, idx: usize) -> Result<SqlValue> {
    let class: String = row.try_get(idx)?;
    let value = match class.as_str() {
        "null" => SqlValue::Null,
        "integer" => SqlValue::I64(row.try_get_unchecked(idx + 1)?),
        "real" => SqlValue::F64(row.try_get_unchecked(idx + 1)?),
        "text" => SqlValue::Text(row.try_get_unchecked(idx + 1)?),
        "blob" => SqlValue::Bytes(row.try_get_unchecked(idx + 1)?),
        other => {
            return Err(MigrateError::Schema(SchemaError::Introspection(format!(
                "unexpected SQLite storage class '{}'",
                other
            ))))
        }
    };
    Ok(value)
}

/// Render a value as an SQLite literal.
fn sqlite_literal(value: &SqlValue) -> String {
    match value {
        SqlValue::Bytes(b) => format!("X'{}'", hex::encode(b)),
        SqlValue::Bool(v) => if *v { "1" } else { "0" }.to_string(),
        SqlValue::Timestamp(ts) => format!("'{}'", ts.format("%Y-%m-%d %H:%M:%S%.f")),
        SqlValue::TimestampTz(ts) => format!("'{}'", ts.to_rfc3339()),
        SqlValue::Date(d) => format!("'{}'", d.format("%Y-%m-%d")),
        SqlValue::F64(v) if !v.is_finite() => "NULL".to_string(),
        other => other.to_sql_literal(),
    }
}

fn bind_value<'q>(
    query: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    value: &SqlValue,
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    match value {
        SqlValue::Null => query.bind(None::<String>),
        SqlValue::Bool(v) => query.bind(*v),
        SqlValue::I64(v) => query.bind(*v),
        SqlValue::F64(v) => query.bind(*v),
        SqlValue::Text(s) => query.bind(s.clone()),
        SqlValue::Bytes(b) => query.bind(b.clone()),
        SqlValue::Timestamp(ts) => query.bind(ts.format("%Y-%m-%d %H:%M:%S%.f").to_string()),
        SqlValue::TimestampTz(ts) => query.bind(ts.to_rfc3339()),
        SqlValue::Date(d) => query.bind(d.format("%Y-%m-%d").to_string()),
    }
}

#[async_trait]
impl DatabaseAdapter for SqliteAdapter {
    fn engine(&self) -> Engine {
        Engine::Sqlite
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT name FROM sqlite_master \
             WHERE type = 'table' AND name NOT LIKE 'sqlite\\_%' ESCAPE '\\' \
             ORDER BY rowid",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(|r| r.get::<String, _>("name")).collect())
    }

    async fn introspect_columns(&self, table: &str) -> Result<Vec<Column>> {
        let rows = sqlx::query(
            "SELECT cid, name, type, \"notnull\" AS not_null, dflt_value, pk \
             FROM pragma_table_info(?) ORDER BY cid",
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            return Err(MigrateError::Schema(SchemaError::Introspection(format!(
                "table {} has no columns or does not exist",
                table
            ))));
        }

        let mut columns = Vec::with_capacity(rows.len());
        for row in rows {
            let cid: i64 = row.get("cid");
            let mut col = Column::new(
                row.get::<String, _>("name"),
                row.get::<String, _>("type"),
                cid as usize,
            );
            let pk: i64 = row.get("pk");
            col.pk_position = pk as u32;
            // SQLite lets PRIMARY KEY columns hold NULL unless declared NOT NULL;
            // the target always requires a value.
            col.is_nullable = row.get::<i64, _>("not_null") == 0 && pk == 0;
            col.default = row.try_get::<Option<String>, _>("dflt_value")?;
            columns.push(col);
        }

        debug!("{}: {} columns", table, columns.len());
        Ok(columns)
    }

    async fn introspect_foreign_keys(&self, table: &str) -> Result<Vec<ForeignKey>> {
        let rows = sqlx::query(
            "SELECT id, seq, \"table\" AS ref_table, \"from\" AS from_col, \"to\" AS to_col, \
                    on_update, on_delete \
             FROM pragma_foreign_key_list(?) ORDER BY id DESC, seq",
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await?;

        let mut fks: Vec<ForeignKey> = Vec::new();
        let mut current_id: Option<i64> = None;
        for row in rows {
            let id: i64 = row.get("id");
            if current_id != Some(id) {
                current_id = Some(id);
                fks.push(ForeignKey {
                    columns: Vec::new(),
                    ref_table: row.get("ref_table"),
                    ref_columns: Vec::new(),
                    on_delete: row.get("on_delete"),
                    on_update: row.get("on_update"),
                });
            }
            if let Some(fk) = fks.last_mut() {
                fk.columns.push(row.get("from_col"));
                if let Some(to) = row.try_get::<Option<String>, _>("to_col")? {
                    fk.ref_columns.push(to);
                }
            }
        }
        Ok(fks)
    }

    async fn introspect_indexes(&self, table: &str) -> Result<Vec<Index>> {
        let rows = sqlx::query(
            "SELECT name, \"unique\" AS is_unique, origin, partial FROM pragma_index_list(?)",
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await?;

        let mut indexes = Vec::new();
        for row in rows {
            let name: String = row.get("name");
            let origin: String = row.get("origin");
            if origin == "pk" {
                continue;
            }
            if row.get::<i64, _>("partial") != 0 {
                warn!("{}: partial index {} is not carried over", table, name);
                continue;
            }

            let cols = sqlx::query("SELECT name FROM pragma_index_info(?) ORDER BY seqno")
                .bind(&name)
                .fetch_all(&self.pool)
                .await?;
            let mut columns = Vec::with_capacity(cols.len());
            for c in &cols {
                match c.try_get::<Option<String>, _>("name")? {
                    Some(col) => columns.push(col),
                    None => break,
                }
            }
            if columns.len() != cols.len() || columns.is_empty() {
                warn!("{}: expression index {} is not carried over", table, name);
                continue;
            }

            // Auto-created indexes backing UNIQUE constraints get a stable name.
            let name = if name.starts_with("sqlite_autoindex_") {
                format!("{}_{}_key", table, columns.join("_"))
            } else {
                name
            };

            indexes.push(Index {
                name,
                columns,
                is_unique: row.get::<i64, _>("is_unique") != 0,
            });
        }
        indexes.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(indexes)
    }

    async fn introspect_checks(&self, table: &str) -> Result<Vec<CheckConstraint>> {
        let sql: Option<String> = sqlx::query_scalar(
            "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?",
        )
        .bind(table)
        .fetch_optional(&self.pool)
        .await?
        .flatten();

        match sql {
            Some(sql) => extract_checks(&sql),
            None => Ok(Vec::new()),
        }
    }

    async fn execute_ddl(&self, statement: &str) -> Result<()> {
        sqlx::query(statement)
            .execute(&self.pool)
            .await
            .map_err(|e| MigrateError::ddl(statement, e))?;
        Ok(())
    }

    async fn execute_ddl_batch(&self, statements: &[String]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for statement in statements {
            sqlx::query(statement)
                .execute(&mut *tx)
                .await
                .map_err(|e| MigrateError::ddl(statement.as_str(), e))?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn dry_run_ddl(&self, statements: &[String]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for statement in statements {
            sqlx::query(statement)
                .execute(&mut *tx)
                .await
                .map_err(|e| MigrateError::ddl(statement.as_str(), e))?;
        }
        tx.rollback().await?;
        Ok(())
    }

    fn stream_rows(&self, table: &Table, batch_size: usize) -> mpsc::Receiver<Result<Batch>> {
        let (tx, rx) = mpsc::channel(READ_AHEAD_BATCHES);
        let pool = self.pool.clone();
        let ncols = table.columns.len();
        let query = Self::select_sql(table);
        let batch_size = batch_size.max(1);

        tokio::spawn(async move {
            let result = match query {
                Ok(query) => Self::stream_rows_impl(pool, query, ncols, batch_size, &tx).await,
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                let _ = tx.send(Err(e)).await;
            }
        });

        rx
    }

    async fn insert_batch(&self, table: &Table, rows: &[Row]) -> Result<u64> {
        let columns = table
            .columns
            .iter()
            .map(|c| quote_ident(&c.name))
            .collect::<Result<Vec<_>>>()?;
        let placeholders = vec!["?"; columns.len()].join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(&table.name)?,
            columns.join(", "),
            placeholders
        );

        let mut tx = self.pool.begin().await?;
        for (i, row) in rows.iter().enumerate() {
            let mut query = sqlx::query(&sql);
            for value in row {
                query = bind_value(query, value);
            }
            if let Err(e) = query.execute(&mut *tx).await {
                return Err(MigrateError::Data {
                    table: table.name.clone(),
                    batch_offset: 0,
                    row_key: table
                        .key_of(row)
                        .or_else(|| Some(format!("position {}", i))),
                    message: e.to_string(),
                });
            }
        }
        tx.commit().await?;
        Ok(rows.len() as u64)
    }

    async fn row_count(&self, table: &str) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table)?);
        let count: i64 = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;
        Ok(count)
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
        )
        .bind(table)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    async fn profile_column(&self, table: &str, column: &str) -> Result<ColumnProfile> {
        let sql = format!(
            "SELECT {} FROM {}",
            Self::typed_select_list(&[column.to_string()])?,
            quote_ident(table)?
        );
        let mut rows = sqlx::query(&sql).fetch(&self.pool);
        let mut profile = ColumnProfile::default();
        while let Some(row) = rows.try_next().await? {
            profile.observe(&decode_value(&row, 0)?);
        }
        debug!("{}.{} profile: {:?}", table, column, profile);
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
                    .map(|(col, v)| format!("{} = {}", col, sqlite_literal(v)))
                    .collect();
                format!("({})", terms.join(" AND "))
            })
            .collect();
        let sql = format!(
            "SELECT {} FROM {} WHERE {}",
            Self::typed_select_list(&table.column_names())?,
            quote_ident(&table.name)?,
            predicates.join(" OR ")
        );

        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter()
            .map(|r| decode_row(r, table.columns.len()))
            .collect()
    }

    async fn count_values_outside(
        &self,
        table: &str,
        column: &str,
        allowed: &[SqlValue],
    ) -> Result<i64> {
        let col = quote_ident(column)?;
        let sql = if allowed.is_empty() {
            format!("SELECT COUNT({}) FROM {}", col, quote_ident(table)?)
        } else {
            let list: Vec<String> = allowed.iter().map(sqlite_literal).collect();
            format!(
                "SELECT COUNT(*) FROM {} WHERE {} IS NOT NULL AND {} NOT IN ({})",
                quote_ident(table)?,
                col,
                col,
                list.join(", ")
            )
        };
        let count: i64 = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;
        Ok(count)
    }

    async fn snapshot(&self, dir: &Path) -> Result<PathBuf> {
        // Fold any WAL content into the main file so the copy is complete.
        sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(&self.pool)
            .await?;

        let dest = dir.join(self.backup_file_name());
        let bytes = tokio::fs::copy(&self.path, &dest).await?;
        info!(
            "Backed up {} to {} ({} bytes)",
            self.path.display(),
            dest.display(),
            bytes
        );
        Ok(dest)
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlite_literals() {
        assert_eq!(sqlite_literal(&SqlValue::Bytes(vec![1, 255])), "X'01ff'");
        assert_eq!(sqlite_literal(&SqlValue::Bool(true)), "1");
        assert_eq!(sqlite_literal(&SqlValue::Text("a'b".into())), "'a''b'");
        assert_eq!(sqlite_literal(&SqlValue::I64(7)), "7");
    }

    #[test]
    fn test_select_sql_orders_by_pk() {
        let mut table = Table::new("users");
        table.columns = vec![Column::new("id", "INTEGER", 0), Column::new("name", "TEXT", 1)];
        table.primary_key = vec!["id".into()];
        let sql = SqliteAdapter::select_sql(&table).unwrap();
        assert_eq!(
            sql,
            "SELECT typeof(\"id\"), \"id\", typeof(\"name\"), \"name\" FROM \"users\" ORDER BY \"id\""
        );

        table.primary_key.clear();
        let sql = SqliteAdapter::select_sql(&table).unwrap();
        assert!(!sql.contains("ORDER BY"));
    }
}
