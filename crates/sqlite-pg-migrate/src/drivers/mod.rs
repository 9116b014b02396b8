//! Database adapters.
//!
//! - [`sqlite`]: the source adapter
//! - [`postgres`]: the target adapter
//! - [`common`]: TLS and retry helpers shared by the drivers
//!
//! Both adapters implement [`DatabaseAdapter`](crate::core::DatabaseAdapter);
//! nothing outside this module names a concrete adapter except the
//! orchestrator, which constructs them.

pub mod common;
pub mod postgres;
pub mod sqlite;

pub use common::{SslMode, TlsBuilder};
pub use postgres::PostgresAdapter;
pub use sqlite::SqliteAdapter;
