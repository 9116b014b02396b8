//! Shared fixtures: SQLite source files and an in-memory target adapter.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tokio::sync::mpsc;

use sqlite_pg_migrate::core::{
    Batch, CheckConstraint, Column, ColumnProfile, DatabaseAdapter, Engine, ForeignKey, Index, Row,
    SqlValue, Table,
};
use sqlite_pg_migrate::error::{MigrateError, Result, SchemaError};
use sqlite_pg_migrate::{Config, Orchestrator, SqliteAdapter};

/// Create a SQLite file at `path` from a DDL/DML script.
pub async fn sqlite_fixture(path: &Path, script: &str) {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .unwrap();
    sqlx::raw_sql(script).execute(&pool).await.unwrap();
    pool.close().await;
}

/// Minimal config pointing at `db`; `migration` is appended verbatim.
pub fn config_for(db: &Path, migration: &str) -> Config {
    let yaml = format!(
        "source:\n  type: sqlite\n  path: {}\ntarget:\n  type: postgres\n  host: localhost\n  database: app\n  user: app\nmigration:\n  backup_before_migration: false\n{}",
        db.display(),
        migration
    );
    Config::from_yaml(&yaml).unwrap()
}

/// Orchestrator over a real SQLite source and the given in-memory target.
pub async fn orchestrator(config: Config, target: Arc<MemoryTarget>) -> Orchestrator {
    let source = SqliteAdapter::connect(config.source_spec().unwrap()).await.unwrap();
    Orchestrator::with_adapters(config, Arc::new(source), target)
}

/// `users` with a boolean flag and timestamps; `sessions` references it.
pub const USERS_SESSIONS: &str = r#"
CREATE TABLE sessions (
    id INTEGER PRIMARY KEY,
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    kind TEXT NOT NULL CHECK (kind IN ('web', 'api')),
    started_at TEXT
);
CREATE TABLE users (
    id INTEGER PRIMARY KEY,
    email TEXT NOT NULL UNIQUE,
    is_active BOOLEAN NOT NULL DEFAULT 1,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP
);
INSERT INTO users (id, email, is_active, created_at) VALUES
    (1, 'ann@example.com', 1, '2024-01-01 10:00:00'),
    (2, 'bob@example.com', 0, '2024-01-02 11:30:00'),
    (3, 'cy@example.com', 1, '2024-01-03 09:15:00');
INSERT INTO sessions (id, user_id, kind, started_at) VALUES
    (1, 1, 'web', '2024-02-01 08:00:00'),
    (2, 1, 'api', '2024-02-01 09:00:00'),
    (3, 2, 'web', '2024-02-02 10:00:00');
"#;

#[derive(Default)]
struct State {
    ddl: Vec<String>,
    dry_runs: Vec<String>,
    tables: BTreeMap<String, Vec<Row>>,
    inserts: BTreeMap<String, usize>,
}

/// Target adapter keeping everything in memory.
///
/// Tables appear when a `CREATE TABLE` statement is executed. Failures can
/// be injected per table for DDL and for the n-th batch insert.
#[derive(Default)]
pub struct MemoryTarget {
    state: Mutex<State>,
    fail_ddl_for: Mutex<Option<String>>,
    fail_insert: Mutex<Option<(String, usize)>>,
}

impl MemoryTarget {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Reject the schema statements of `table`.
    pub fn fail_ddl_for(&self, table: &str) {
        *self.fail_ddl_for.lock().unwrap() = Some(table.to_lowercase());
    }

    /// Reject the `nth` (1-based) batch inserted into `table`.
    pub fn fail_insert(&self, table: &str, nth: usize) {
        *self.fail_insert.lock().unwrap() = Some((table.to_lowercase(), nth));
    }

    /// Statements seen by dry runs; none of them were applied.
    pub fn dry_runs(&self) -> Vec<String> {
        self.state.lock().unwrap().dry_runs.clone()
    }

    pub fn ddl(&self) -> Vec<String> {
        self.state.lock().unwrap().ddl.clone()
    }

    pub fn create_statements(&self) -> Vec<String> {
        self.ddl()
            .into_iter()
            .filter(|s| s.starts_with("CREATE TABLE"))
            .collect()
    }

    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.state
            .lock()
            .unwrap()
            .tables
            .get(&table.to_lowercase())
            .cloned()
            .unwrap_or_default()
    }

    pub fn has_table(&self, table: &str) -> bool {
        self.state.lock().unwrap().tables.contains_key(&table.to_lowercase())
    }

    fn apply(state: &mut State, statement: &str) {
        if let Some(name) = created_table(statement) {
            state.tables.entry(name).or_default();
        }
        state.ddl.push(statement.to_string());
    }
}

/// Table name of a `CREATE TABLE "schema"."name" (...)` statement.
fn created_table(statement: &str) -> Option<String> {
    let rest = statement.strip_prefix("CREATE TABLE ")?;
    let qualified = rest.split(" (").next()?;
    let name = qualified.rsplit('.').next()?;
    Some(name.trim_matches('"').to_lowercase())
}

fn missing(table: &str) -> MigrateError {
    MigrateError::Schema(SchemaError::Introspection(format!(
        "relation {} does not exist",
        table
    )))
}

#[async_trait]
impl DatabaseAdapter for MemoryTarget {
    fn engine(&self) -> Engine {
        Engine::Postgres
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        Ok(self.state.lock().unwrap().tables.keys().cloned().collect())
    }

    async fn introspect_columns(&self, _table: &str) -> Result<Vec<Column>> {
        Ok(Vec::new())
    }

    async fn introspect_foreign_keys(&self, _table: &str) -> Result<Vec<ForeignKey>> {
        Ok(Vec::new())
    }

    async fn introspect_indexes(&self, _table: &str) -> Result<Vec<Index>> {
        Ok(Vec::new())
    }

    async fn introspect_checks(&self, _table: &str) -> Result<Vec<CheckConstraint>> {
        Ok(Vec::new())
    }

    async fn execute_ddl(&self, statement: &str) -> Result<()> {
        Self::apply(&mut self.state.lock().unwrap(), statement);
        Ok(())
    }

    async fn execute_ddl_batch(&self, statements: &[String]) -> Result<()> {
        let fail_for = self.fail_ddl_for.lock().unwrap().clone();
        if let Some(table) = fail_for {
            if let Some(stmt) = statements
                .iter()
                .find(|s| created_table(s).as_deref() == Some(table.as_str()))
            {
                return Err(MigrateError::ddl(stmt.clone(), "forced failure"));
            }
        }
        let mut state = self.state.lock().unwrap();
        for statement in statements {
            Self::apply(&mut state, statement);
        }
        Ok(())
    }

    async fn dry_run_ddl(&self, statements: &[String]) -> Result<()> {
        let fail_for = self.fail_ddl_for.lock().unwrap().clone();
        let mut state = self.state.lock().unwrap();
        for statement in statements {
            state.dry_runs.push(statement.clone());
            if fail_for.is_some() && created_table(statement) == fail_for {
                return Err(MigrateError::ddl(statement.clone(), "forced failure"));
            }
        }
        Ok(())
    }

    fn stream_rows(&self, table: &Table, batch_size: usize) -> mpsc::Receiver<Result<Batch>> {
        let rows = self.rows(&table.name);
        let (tx, rx) = mpsc::channel(rows.len().max(1));
        for (i, chunk) in rows.chunks(batch_size.max(1)).enumerate() {
            let _ = tx.try_send(Ok(Batch::new(chunk.to_vec(), (i * batch_size) as u64)));
        }
        rx
    }

    async fn insert_batch(&self, table: &Table, rows: &[Row]) -> Result<u64> {
        let key = table.name.to_lowercase();
        let mut state = self.state.lock().unwrap();
        if !state.tables.contains_key(&key) {
            return Err(missing(&table.name));
        }
        let call = {
            let n = state.inserts.entry(key.clone()).or_default();
            *n += 1;
            *n
        };
        if let Some((fail_table, nth)) = self.fail_insert.lock().unwrap().clone() {
            if fail_table == key && nth == call {
                return Err(MigrateError::Data {
                    table: table.name.clone(),
                    batch_offset: 0,
                    row_key: rows.first().and_then(|r| table.key_of(r)),
                    message: "forced failure".to_string(),
                });
            }
        }
        if let Some(stored) = state.tables.get_mut(&key) {
            stored.extend(rows.iter().cloned());
        }
        Ok(rows.len() as u64)
    }

    async fn row_count(&self, table: &str) -> Result<i64> {
        let state = self.state.lock().unwrap();
        state
            .tables
            .get(&table.to_lowercase())
            .map(|rows| rows.len() as i64)
            .ok_or_else(|| missing(table))
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        Ok(self.has_table(table))
    }

    async fn profile_column(&self, _table: &str, _column: &str) -> Result<ColumnProfile> {
        Ok(ColumnProfile::default())
    }

    async fn fetch_rows_by_key(&self, table: &Table, keys: &[Row]) -> Result<Vec<Row>> {
        Ok(self
            .rows(&table.name)
            .into_iter()
            .filter(|row| keys.contains(&table.key_values(row)))
            .collect())
    }

    async fn count_values_outside(&self, _table: &str, _column: &str, _allowed: &[SqlValue]) -> Result<i64> {
        Ok(0)
    }

    async fn snapshot(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join("memory_backup.sql");
        std::fs::write(&path, self.ddl().join(";\n"))?;
        Ok(path)
    }

    async fn close(&self) {}
}
