//! # sqlite-pg-migrate
//!
//! One-shot migration of a SQLite database into PostgreSQL.
//!
//! This library provides:
//!
//! - **Schema translation** from SQLite type affinities to concrete
//!   PostgreSQL types, with foreign-key aware creation order
//! - **Batched transfer** using the PostgreSQL COPY protocol, one
//!   transaction per batch
//! - **Validation** of row counts, sampled rows and declared value sets
//! - **Run ledger** persisted as JSON, plus backup and rollback artifacts
//!
//! ## Example
//!
//! ```rust,no_run
//! use sqlite_pg_migrate::{Config, Orchestrator};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> sqlite_pg_migrate::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let orchestrator = Orchestrator::new(config).await?;
//!     let report = orchestrator.run(CancellationToken::new()).await?;
//!     println!("Migrated {} rows", report.rows_transferred);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod drivers;
pub mod error;
pub mod ledger;
pub mod lock;
pub mod orchestrator;
pub mod rollback;
pub mod transfer;
pub mod translate;
pub mod typemap;
pub mod verify;

// Re-exports for convenient access
pub use crate::core::{DatabaseAdapter, Row, SqlValue, Table, TargetType};
pub use config::{Config, EnumStrategy, ExistingTables, MigrationConfig};
pub use drivers::{PostgresAdapter, SqliteAdapter};
pub use error::{MigrateError, Result, SchemaError};
pub use ledger::{MigrationRun, RunPhase, Stage, TableStatus};
pub use lock::is_locked;
pub use orchestrator::{MigrationReport, Orchestrator, Preflight};
pub use transfer::{TransferEngine, TransferStats};
pub use translate::{SchemaPlan, TablePlan};
pub use verify::{TableValidation, Validator};
