//! Error types for the migration library.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Exit code for configuration errors (invalid YAML, missing fields, bad specs).
pub const EXIT_CONFIG_ERROR: u8 = 1;
/// Exit code when either database cannot be reached or opened.
pub const EXIT_CONNECTION_ERROR: u8 = 2;
/// Exit code when the schema phase fails.
pub const EXIT_SCHEMA_ERROR: u8 = 3;
/// Exit code when one or more tables fail to transfer.
pub const EXIT_DATA_ERROR: u8 = 4;
/// Exit code when validation reports a mismatch.
pub const EXIT_VALIDATION_ERROR: u8 = 5;
/// Exit code when another run holds the lock file.
pub const EXIT_LOCK_ERROR: u8 = 6;
/// Exit code for file system errors.
pub const EXIT_IO_ERROR: u8 = 7;
/// Exit code when the operator interrupted the run.
pub const EXIT_CANCELLED: u8 = 8;
/// Exit code for anything else.
pub const EXIT_INTERNAL_ERROR: u8 = 9;

/// Schema-phase failure reasons.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    /// The foreign-key graph contains a cycle; no creation order exists.
    #[error("cyclic foreign-key dependency between tables: {}", .0.join(" -> "))]
    CyclicDependency(Vec<String>),

    /// A foreign key references a table that does not exist in the source.
    #[error("table {table} references unknown table {referenced}")]
    UnknownReference { table: String, referenced: String },

    /// Target already contains tables this run would create.
    #[error("target already contains table(s): {}", .0.join(", "))]
    ExistingTables(Vec<String>),

    /// Source catalog could not be read or understood.
    #[error("introspection failed: {0}")]
    Introspection(String),

    /// The target engine rejected a DDL statement.
    #[error("DDL rejected: {message}\n  Statement: {statement}")]
    Rejected { statement: String, message: String },
}

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Cannot reach or open one of the engines.
    #[error("Connection error: {message}\n  Context: {context}")]
    Connection {
        message: String,
        context: String,
        transient: bool,
    },

    /// Raw source driver error.
    #[error("Source database error: {0}")]
    Source(#[from] sqlx::Error),

    /// Raw target driver error.
    #[error("Target database error: {0}")]
    Target(#[from] tokio_postgres::Error),

    /// Schema translation or application failed.
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    /// A batch insert was rejected.
    #[error("Data error in table {table} (batch at offset {batch_offset}{}): {message}", RowKeyDisplay(.row_key))]
    Data {
        table: String,
        batch_offset: u64,
        row_key: Option<String>,
        message: String,
    },

    /// Source and target disagree after transfer.
    #[error("Validation mismatch for {table}: {detail}")]
    ValidationMismatch { table: String, detail: String },

    /// Another run holds the lock marker.
    #[error("Another migration appears to be running (lock file {}). Remove it only if that run is gone.", .0.display())]
    Locked(PathBuf),

    /// An illegal ledger transition was attempted.
    #[error("Ledger error: {0}")]
    Ledger(String),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A database call exceeded its deadline.
    #[error("Timed out after {seconds}s: {context}")]
    Timeout { context: String, seconds: u64 },

    /// Migration was cancelled (SIGINT, etc.)
    #[error("Migration cancelled")]
    Cancelled,

    /// A table was left alone because the run stopped before reaching it.
    #[error("Table {table} not attempted: {reason}")]
    NotAttempted { table: String, reason: String },
}

struct RowKeyDisplay<'a>(&'a Option<String>);

impl fmt::Display for RowKeyDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(key) => write!(f, ", row {}", key),
            None => Ok(()),
        }
    }
}

impl MigrateError {
    /// Create a connection error with context about where it occurred.
    pub fn connection(message: impl fmt::Display, context: impl Into<String>) -> Self {
        MigrateError::Connection {
            message: message.to_string(),
            context: context.into(),
            transient: false,
        }
    }

    /// Create a connection error that may succeed on retry.
    pub fn transient(message: impl fmt::Display, context: impl Into<String>) -> Self {
        MigrateError::Connection {
            message: message.to_string(),
            context: context.into(),
            transient: true,
        }
    }

    /// Create a DDL rejection error.
    pub fn ddl(statement: impl Into<String>, message: impl fmt::Display) -> Self {
        MigrateError::Schema(SchemaError::Rejected {
            statement: statement.into(),
            message: message.to_string(),
        })
    }

    /// Create a data error for a batch.
    pub fn data(table: impl Into<String>, message: impl fmt::Display) -> Self {
        MigrateError::Data {
            table: table.into(),
            batch_offset: 0,
            row_key: None,
            message: message.to_string(),
        }
    }

    /// Whether retrying the failed operation could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            MigrateError::Connection { transient, .. } => *transient,
            MigrateError::Target(e) => e.is_closed() || e.as_db_error().is_none(),
            _ => false,
        }
    }

    /// Short machine-readable kind, recorded in the run ledger.
    pub fn kind(&self) -> &'static str {
        match self {
            MigrateError::Config(_) | MigrateError::Yaml(_) => "config",
            MigrateError::Connection { .. } | MigrateError::Timeout { .. } => "connection",
            MigrateError::Source(_) | MigrateError::Target(_) => "database",
            MigrateError::Schema(SchemaError::CyclicDependency(_)) => "cyclic_dependency",
            MigrateError::Schema(_) => "schema",
            MigrateError::Data { .. } => "data",
            MigrateError::ValidationMismatch { .. } => "validation_mismatch",
            MigrateError::Locked(_) => "locked",
            MigrateError::Ledger(_) => "ledger",
            MigrateError::Io(_) => "io",
            MigrateError::Json(_) => "json",
            MigrateError::Cancelled => "cancelled",
            MigrateError::NotAttempted { .. } => "not_attempted",
        }
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::Config(_) | MigrateError::Yaml(_) => EXIT_CONFIG_ERROR,
            MigrateError::Connection { .. }
            | MigrateError::Timeout { .. }
            | MigrateError::Source(_)
            | MigrateError::Target(_) => EXIT_CONNECTION_ERROR,
            MigrateError::Schema(_) => EXIT_SCHEMA_ERROR,
            MigrateError::Data { .. } => EXIT_DATA_ERROR,
            MigrateError::ValidationMismatch { .. } => EXIT_VALIDATION_ERROR,
            MigrateError::Locked(_) => EXIT_LOCK_ERROR,
            MigrateError::Io(_) => EXIT_IO_ERROR,
            MigrateError::Cancelled => EXIT_CANCELLED,
            MigrateError::Ledger(_) | MigrateError::Json(_) | MigrateError::NotAttempted { .. } => {
                EXIT_INTERNAL_ERROR
            }
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;
