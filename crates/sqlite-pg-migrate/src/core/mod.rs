//! Core abstractions shared by the adapters and the pipeline stages.
//!
//! - [`schema`]: table, column and constraint metadata
//! - [`value`]: owned SQL values and row batches
//! - [`traits`]: the [`DatabaseAdapter`] contract
//! - [`identifier`]: identifier validation and quoting

pub mod identifier;
pub mod schema;
pub mod traits;
pub mod value;

pub use schema::{CheckConstraint, Column, ColumnProfile, ForeignKey, Index, Table, TargetType};
pub use traits::{DatabaseAdapter, Engine};
pub use value::{Batch, Row, SqlValue};
