//! The database adapter contract.
//!
//! Both engines implement [`DatabaseAdapter`]. The translator, transfer engine
//! and validator only ever see `Arc<dyn DatabaseAdapter>` and never branch on
//! the engine kind.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::error::Result;

use super::schema::{CheckConstraint, Column, ColumnProfile, ForeignKey, Index, Table};
use super::value::{Batch, Row, SqlValue};

/// Engine kind behind an adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Engine {
    Sqlite,
    Postgres,
}

impl std::fmt::Display for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Engine::Sqlite => write!(f, "sqlite"),
            Engine::Postgres => write!(f, "postgres"),
        }
    }
}

/// Capability set shared by the source and target engines.
///
/// Construction (`connect`) is engine-specific and lives on the concrete
/// adapter types; everything after that goes through this trait.
#[async_trait]
pub trait DatabaseAdapter: Send + Sync {
    /// Engine kind.
    fn engine(&self) -> Engine;

    /// Human-readable location (file path or host/database), never credentials.
    fn describe(&self) -> String;

    /// User table names in catalog order.
    async fn list_tables(&self) -> Result<Vec<String>>;

    /// Columns of a table, preserving declaration order.
    async fn introspect_columns(&self, table: &str) -> Result<Vec<Column>>;

    /// Foreign keys declared on a table.
    async fn introspect_foreign_keys(&self, table: &str) -> Result<Vec<ForeignKey>>;

    /// Secondary indexes of a table.
    async fn introspect_indexes(&self, table: &str) -> Result<Vec<Index>>;

    /// CHECK constraints of a table.
    async fn introspect_checks(&self, table: &str) -> Result<Vec<CheckConstraint>>;

    /// Full descriptor for one table.
    async fn introspect_table(&self, name: &str) -> Result<Table> {
        let mut table = Table::new(name);
        table.columns = self.introspect_columns(name).await?;

        let mut pk: Vec<&Column> = table.columns.iter().filter(|c| c.is_pk()).collect();
        pk.sort_by_key(|c| c.pk_position);
        table.primary_key = pk.into_iter().map(|c| c.name.clone()).collect();

        table.foreign_keys = self.introspect_foreign_keys(name).await?;
        table.indexes = self.introspect_indexes(name).await?;
        table.check_constraints = self.introspect_checks(name).await?;
        table.row_count = self.row_count(name).await?;
        Ok(table)
    }

    /// Execute a single DDL statement.
    async fn execute_ddl(&self, statement: &str) -> Result<()>;

    /// Execute a group of DDL statements atomically.
    async fn execute_ddl_batch(&self, statements: &[String]) -> Result<()>;

    /// Execute DDL statements in a transaction that is always rolled back.
    /// Reports the first statement the engine rejects.
    async fn dry_run_ddl(&self, statements: &[String]) -> Result<()>;

    /// Start streaming rows of `table` in batches of `batch_size`.
    ///
    /// Rows come in primary key order when the table has one. The sequence is
    /// finite and cannot be restarted; a failure is delivered as the last item.
    fn stream_rows(&self, table: &Table, batch_size: usize) -> mpsc::Receiver<Result<Batch>>;

    /// Insert rows in one transaction. Returns the number of rows written.
    ///
    /// On failure nothing from this call is visible and the error is a
    /// `MigrateError::Data` carrying the failing row position when known.
    async fn insert_batch(&self, table: &Table, rows: &[Row]) -> Result<u64>;

    /// Exact row count.
    async fn row_count(&self, table: &str) -> Result<i64>;

    /// Whether a table with this name exists.
    async fn table_exists(&self, table: &str) -> Result<bool>;

    /// Observed value profile of one column.
    async fn profile_column(&self, table: &str, column: &str) -> Result<ColumnProfile>;

    /// Rows whose primary key equals one of `keys` (key values in PK order).
    async fn fetch_rows_by_key(&self, table: &Table, keys: &[Row]) -> Result<Vec<Row>>;

    /// Number of non-null values of `column` outside `allowed`.
    async fn count_values_outside(
        &self,
        table: &str,
        column: &str,
        allowed: &[SqlValue],
    ) -> Result<i64>;

    /// Write a point-in-time copy of the database into `dir`.
    async fn snapshot(&self, dir: &Path) -> Result<PathBuf>;

    /// Release the underlying connection.
    async fn close(&self);
}
