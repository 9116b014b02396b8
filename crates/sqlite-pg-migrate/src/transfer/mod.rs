//! Data transfer engine.
//!
//! Streams a table from the source in batches, converts every value to what
//! its target column expects and inserts each batch in its own transaction.
//! Tables are transferred one at a time, in creation order, by the
//! orchestrator; this module handles a single table.

use std::sync::Arc;
use std::time::Instant;

use chrono::{TimeZone, Utc};
use tracing::{debug, info};

use crate::core::schema::{Table, TargetType};
use crate::core::traits::DatabaseAdapter;
use crate::core::value::{Row, SqlValue};
use crate::error::{MigrateError, Result};
use crate::typemap::{parse_temporal, Temporal};

/// Convert one source value for a column of type `target`.
///
/// NULL passes through untouched. Anything that cannot be represented
/// without loss is an error naming the offending value.
pub fn transform_value(value: SqlValue, target: &TargetType) -> std::result::Result<SqlValue, String> {
    if value.is_null() {
        return Ok(value);
    }
    let unconvertible = |v: &SqlValue| format!("cannot convert {} value {} to {}", v.type_name(), v, target.label());

    let out = match target {
        TargetType::Boolean => match &value {
            SqlValue::Bool(b) => SqlValue::Bool(*b),
            SqlValue::I64(0) => SqlValue::Bool(false),
            SqlValue::I64(1) => SqlValue::Bool(true),
            SqlValue::F64(f) if *f == 0.0 => SqlValue::Bool(false),
            SqlValue::F64(f) if *f == 1.0 => SqlValue::Bool(true),
            SqlValue::Text(s) => match s.trim().to_lowercase().as_str() {
                "0" | "f" | "false" => SqlValue::Bool(false),
                "1" | "t" | "true" => SqlValue::Bool(true),
                _ => return Err(unconvertible(&value)),
            },
            _ => return Err(unconvertible(&value)),
        },

        TargetType::BigInt | TargetType::Identity => match &value {
            SqlValue::I64(n) => SqlValue::I64(*n),
            SqlValue::Bool(b) => SqlValue::I64(i64::from(*b)),
            SqlValue::F64(f) if f.fract() == 0.0 && f.abs() < 9.2e18 => SqlValue::I64(*f as i64),
            SqlValue::Text(s) => match s.trim().parse::<i64>() {
                Ok(n) => SqlValue::I64(n),
                Err(_) => return Err(unconvertible(&value)),
            },
            _ => return Err(unconvertible(&value)),
        },

        TargetType::DoublePrecision => match &value {
            SqlValue::F64(f) => SqlValue::F64(*f),
            SqlValue::I64(n) => SqlValue::F64(*n as f64),
            SqlValue::Text(s) => match s.trim().parse::<f64>() {
                Ok(f) => SqlValue::F64(f),
                Err(_) => return Err(unconvertible(&value)),
            },
            _ => return Err(unconvertible(&value)),
        },

        // Kept as written; the target parses the exact digits.
        TargetType::Numeric { .. } => match &value {
            SqlValue::I64(n) => SqlValue::I64(*n),
            SqlValue::F64(f) if f.is_finite() => SqlValue::F64(*f),
            SqlValue::Text(s) if s.trim().parse::<f64>().is_ok_and(f64::is_finite) => {
                SqlValue::Text(s.trim().to_string())
            }
            _ => return Err(unconvertible(&value)),
        },

        TargetType::Text | TargetType::Enum { .. } => match value {
            SqlValue::Text(_) => value,
            SqlValue::I64(n) => SqlValue::Text(n.to_string()),
            SqlValue::F64(f) => SqlValue::Text(f.to_string()),
            SqlValue::Bytes(b) => match String::from_utf8(b) {
                Ok(s) => SqlValue::Text(s),
                Err(e) => {
                    return Err(format!(
                        "blob value is not valid UTF-8 for a {} column: {}",
                        target.label(),
                        e
                    ))
                }
            },
            other => return Err(unconvertible(&other)),
        },

        TargetType::Bytea => match value {
            SqlValue::Bytes(_) => value,
            SqlValue::Text(s) => SqlValue::Bytes(s.into_bytes()),
            SqlValue::I64(n) => SqlValue::Bytes(n.to_string().into_bytes()),
            SqlValue::F64(f) => SqlValue::Bytes(f.to_string().into_bytes()),
            other => return Err(unconvertible(&other)),
        },

        TargetType::Timestamp | TargetType::TimestampTz | TargetType::Date => {
            let parsed = match &value {
                SqlValue::Text(s) => parse_temporal(s),
                SqlValue::Timestamp(ts) => Some(Temporal::Naive(*ts)),
                SqlValue::TimestampTz(ts) => Some(Temporal::Zoned(*ts)),
                SqlValue::Date(d) => Some(Temporal::Date(*d)),
                _ => None,
            };
            let Some(parsed) = parsed else {
                return Err(unconvertible(&value));
            };
            match convert_temporal(parsed, target) {
                Some(v) => v,
                None => return Err(unconvertible(&value)),
            }
        }
    };
    Ok(out)
}

fn convert_temporal(parsed: Temporal, target: &TargetType) -> Option<SqlValue> {
    let midnight = |d: chrono::NaiveDate| d.and_hms_opt(0, 0, 0);
    match (target, parsed) {
        (TargetType::Date, Temporal::Date(d)) => Some(SqlValue::Date(d)),
        (TargetType::Date, _) => None,

        (TargetType::Timestamp, Temporal::Date(d)) => midnight(d).map(SqlValue::Timestamp),
        (TargetType::Timestamp, Temporal::Naive(ts)) => Some(SqlValue::Timestamp(ts)),
        (TargetType::Timestamp, Temporal::Zoned(ts)) => Some(SqlValue::Timestamp(ts.naive_utc())),

        // Values without an offset are taken as UTC.
        (TargetType::TimestampTz, Temporal::Date(d)) => {
            midnight(d).map(|ts| SqlValue::TimestampTz(Utc.from_utc_datetime(&ts).fixed_offset()))
        }
        (TargetType::TimestampTz, Temporal::Naive(ts)) => {
            Some(SqlValue::TimestampTz(Utc.from_utc_datetime(&ts).fixed_offset()))
        }
        (TargetType::TimestampTz, Temporal::Zoned(ts)) => Some(SqlValue::TimestampTz(ts)),

        _ => None,
    }
}

/// Convert a whole row; the error names the failing column.
pub fn transform_row(table: &Table, row: &[SqlValue]) -> std::result::Result<Row, String> {
    if row.len() != table.columns.len() {
        return Err(format!(
            "row has {} values, table has {} columns",
            row.len(),
            table.columns.len()
        ));
    }
    table
        .columns
        .iter()
        .zip(row)
        .map(|(column, value)| {
            transform_value(value.clone(), column.target())
                .map_err(|e| format!("column {}: {}", column.name, e))
        })
        .collect()
}

/// Statistics from transferring one table.
#[derive(Debug, Clone, Default)]
pub struct TransferStats {
    pub rows: u64,
    pub batches: u64,
}

/// Moves rows of one table from source to target.
pub struct TransferEngine {
    source: Arc<dyn DatabaseAdapter>,
    target: Arc<dyn DatabaseAdapter>,
    batch_size: usize,
}

impl TransferEngine {
    pub fn new(source: Arc<dyn DatabaseAdapter>, target: Arc<dyn DatabaseAdapter>, batch_size: usize) -> Self {
        Self {
            source,
            target,
            batch_size: batch_size.max(1),
        }
    }

    /// Transfer every row of `table` (columns carrying their target types).
    ///
    /// Batches before a failing one stay committed. The error is a
    /// `MigrateError::Data` carrying the failing batch's offset.
    pub async fn transfer_table(&self, table: &Table) -> Result<TransferStats> {
        let start = Instant::now();
        let mut stats = TransferStats::default();
        let mut rx = self.source.stream_rows(table, self.batch_size);

        while let Some(batch) = rx.recv().await {
            let batch = batch?;
            let offset = batch.offset;

            let mut rows = Vec::with_capacity(batch.len());
            for raw in &batch.rows {
                match transform_row(table, raw) {
                    Ok(row) => rows.push(row),
                    Err(message) => {
                        return Err(MigrateError::Data {
                            table: table.name.clone(),
                            batch_offset: offset,
                            row_key: table.key_of(raw),
                            message,
                        })
                    }
                }
            }

            let written = match self.target.insert_batch(table, &rows).await {
                Ok(n) => n,
                Err(MigrateError::Data { row_key, message, .. }) => {
                    return Err(MigrateError::Data {
                        table: table.name.clone(),
                        batch_offset: offset,
                        row_key,
                        message,
                    })
                }
                Err(e) => return Err(e),
            };
            stats.rows += written;
            stats.batches += 1;
            debug!(
                "{}: batch at offset {} wrote {} rows",
                table.name, offset, written
            );
        }

        let elapsed = start.elapsed().as_secs_f64();
        info!(
            "{}: transferred {} rows in {} batches ({:.1}s)",
            table.name, stats.rows, stats.batches, elapsed
        );
        Ok(stats)
    }
}
