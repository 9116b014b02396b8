//! Configuration type definitions.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Source database (the SQLite file).
    pub source: ConnectionSpec,

    /// Target database (PostgreSQL).
    pub target: ConnectionSpec,

    /// Migration behavior configuration.
    #[serde(default)]
    pub migration: MigrationConfig,
}

/// Engine kind plus the fields that engine needs.
///
/// Exactly one shape is accepted per kind; unknown fields are rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConnectionSpec {
    /// Single-file embedded store.
    #[serde(alias = "embedded_file", alias = "sqlite3")]
    Sqlite(SqliteSpec),

    /// Networked relational engine.
    #[serde(alias = "networked_relational", alias = "postgresql")]
    Postgres(PostgresSpec),
}

impl ConnectionSpec {
    /// Engine name as written in the config.
    pub fn kind(&self) -> &'static str {
        match self {
            ConnectionSpec::Sqlite(_) => "sqlite",
            ConnectionSpec::Postgres(_) => "postgres",
        }
    }

    pub fn as_sqlite(&self) -> Option<&SqliteSpec> {
        match self {
            ConnectionSpec::Sqlite(spec) => Some(spec),
            ConnectionSpec::Postgres(_) => None,
        }
    }

    pub fn as_postgres(&self) -> Option<&PostgresSpec> {
        match self {
            ConnectionSpec::Postgres(spec) => Some(spec),
            ConnectionSpec::Sqlite(_) => None,
        }
    }
}

/// SQLite file configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SqliteSpec {
    /// Path to the database file.
    pub path: PathBuf,

    /// Busy timeout applied to every statement (default: 5).
    #[serde(default = "default_busy_timeout_secs")]
    pub busy_timeout_secs: u64,
}

/// PostgreSQL connection configuration.
#[derive(Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PostgresSpec {
    /// Database host.
    pub host: String,

    /// Database port (default: 5432).
    #[serde(default = "default_pg_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// Target schema (default: "public").
    #[serde(default = "default_public_schema")]
    pub schema: String,

    /// SSL mode: disable, require, verify-ca or verify-full (default: "disable").
    #[serde(default = "default_disable")]
    pub ssl_mode: String,
}

impl fmt::Debug for PostgresSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresSpec")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("schema", &self.schema)
            .field("ssl_mode", &self.ssl_mode)
            .finish()
    }
}

/// Migration behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MigrationConfig {
    /// Rows per transferred batch (default: 1000).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Snapshot the source before any DDL (default: true).
    #[serde(default = "default_true")]
    pub backup_before_migration: bool,

    /// Compare counts (and samples) after transfer (default: true).
    #[serde(default = "default_true")]
    pub validate_after_migration: bool,

    /// Write a rollback script after a validated run (default: true).
    #[serde(default = "default_true")]
    pub create_rollback_script: bool,

    /// Rows per table compared field by field during validation; 0 disables sampling.
    #[serde(default)]
    pub sample_rows: usize,

    /// How enumerated CHECK constraints are carried over.
    #[serde(default)]
    pub enum_strategy: EnumStrategy,

    /// What to do with tables that already exist in the target.
    #[serde(default)]
    pub existing_tables: ExistingTables,

    /// Tables with at least this many rows get their indexes after load.
    #[serde(default = "default_index_threshold")]
    pub index_after_load_threshold: i64,

    /// Create secondary indexes (default: true).
    #[serde(default = "default_true")]
    pub create_indexes: bool,

    /// Carry over non-enum CHECK constraints (default: true).
    #[serde(default = "default_true")]
    pub create_check_constraints: bool,

    /// Per-statement timeout on the target (default: 300).
    #[serde(default = "default_statement_timeout_secs")]
    pub statement_timeout_secs: u64,

    /// Timeout for establishing a target connection (default: 10).
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Timeout for acquiring a pooled connection (default: 30).
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,

    /// Retries for transient connect/acquire failures (default: 3).
    #[serde(default = "default_connect_retries")]
    pub connect_retries: u32,

    /// Base delay between retries; grows linearly (default: 500).
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Directory for rollback scripts (default: the source file's directory).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,

    /// Persist the run ledger as JSON at this path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ledger_file: Option<PathBuf>,

    /// Lock marker path (default: `<source>.migrate.lock`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_file: Option<PathBuf>,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            backup_before_migration: true,
            validate_after_migration: true,
            create_rollback_script: true,
            sample_rows: 0,
            enum_strategy: EnumStrategy::default(),
            existing_tables: ExistingTables::default(),
            index_after_load_threshold: default_index_threshold(),
            create_indexes: true,
            create_check_constraints: true,
            statement_timeout_secs: default_statement_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            acquire_timeout_secs: default_acquire_timeout_secs(),
            connect_retries: default_connect_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            output_dir: None,
            ledger_file: None,
            lock_file: None,
        }
    }
}

/// Representation of `CHECK (col IN (...))` constraints in the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnumStrategy {
    /// Keep a CHECK constraint with the identical value list.
    #[default]
    Check,

    /// Create a native enum type per constrained column.
    NativeEnum,
}

/// Policy for tables already present in the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExistingTables {
    /// Refuse to start before any DDL.
    #[default]
    Fail,

    /// Leave them untouched and only compare row counts.
    Skip,
}

// Default value functions for serde
fn default_busy_timeout_secs() -> u64 {
    5
}

fn default_pg_port() -> u16 {
    5432
}

fn default_public_schema() -> String {
    "public".to_string()
}

fn default_disable() -> String {
    "disable".to_string()
}

fn default_batch_size() -> usize {
    1000
}

fn default_index_threshold() -> i64 {
    10_000
}

fn default_statement_timeout_secs() -> u64 {
    300
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_acquire_timeout_secs() -> u64 {
    30
}

fn default_connect_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    500
}

fn default_true() -> bool {
    true
}
