//! SQL value types moved between the adapters.

use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime};
use serde::Serialize;

/// A single owned value.
///
/// The source only ever produces `Null`, `I64`, `F64`, `Text` and `Bytes`
/// (SQLite storage classes); the transform step turns some of those into
/// the typed variants the target column expects.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SqlValue {
    Null,
    Bool(bool),
    I64(i64),
    F64(f64),
    Text(String),
    Bytes(Vec<u8>),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<FixedOffset>),
    Date(NaiveDate),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Storage-class style name, used in mismatch reports.
    pub fn type_name(&self) -> &'static str {
        match self {
            SqlValue::Null => "null",
            SqlValue::Bool(_) => "boolean",
            SqlValue::I64(_) => "integer",
            SqlValue::F64(_) => "real",
            SqlValue::Text(_) => "text",
            SqlValue::Bytes(_) => "blob",
            SqlValue::Timestamp(_) => "timestamp",
            SqlValue::TimestampTz(_) => "timestamptz",
            SqlValue::Date(_) => "date",
        }
    }

    /// Render as a PostgreSQL literal for use in generated statements.
    pub fn to_sql_literal(&self) -> String {
        match self {
            SqlValue::Null => "NULL".to_string(),
            SqlValue::Bool(v) => if *v { "TRUE" } else { "FALSE" }.to_string(),
            SqlValue::I64(v) => v.to_string(),
            SqlValue::F64(v) => {
                if v.is_finite() {
                    v.to_string()
                } else {
                    format!("'{}'::double precision", float_special(*v))
                }
            }
            SqlValue::Text(s) => format!("'{}'", s.replace('\'', "''")),
            SqlValue::Bytes(b) => format!("'\\x{}'::bytea", hex::encode(b)),
            SqlValue::Timestamp(ts) => format!("'{}'::timestamp", ts.format("%Y-%m-%d %H:%M:%S%.f")),
            SqlValue::TimestampTz(ts) => format!("'{}'::timestamptz", ts.to_rfc3339()),
            SqlValue::Date(d) => format!("'{}'::date", d.format("%Y-%m-%d")),
        }
    }
}

fn float_special(v: f64) -> &'static str {
    if v.is_nan() {
        "NaN"
    } else if v.is_sign_positive() {
        "Infinity"
    } else {
        "-Infinity"
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => write!(f, "NULL"),
            SqlValue::Bool(v) => write!(f, "{}", v),
            SqlValue::I64(v) => write!(f, "{}", v),
            SqlValue::F64(v) => write!(f, "{}", v),
            SqlValue::Text(s) => write!(f, "{:?}", s),
            SqlValue::Bytes(b) => write!(f, "x'{}'", hex::encode(b)),
            SqlValue::Timestamp(ts) => write!(f, "{}", ts),
            SqlValue::TimestampTz(ts) => write!(f, "{}", ts.to_rfc3339()),
            SqlValue::Date(d) => write!(f, "{}", d),
        }
    }
}

/// One row, values in column order.
pub type Row = Vec<SqlValue>;

/// A batch of rows read from the source.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    /// Rows in this batch.
    pub rows: Vec<Row>,

    /// Offset of the first row within the table's scan.
    pub offset: u64,
}

impl Batch {
    pub fn new(rows: Vec<Row>, offset: u64) -> Self {
        Self { rows, offset }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sql_literals() {
        assert_eq!(SqlValue::Null.to_sql_literal(), "NULL");
        assert_eq!(SqlValue::Bool(true).to_sql_literal(), "TRUE");
        assert_eq!(SqlValue::I64(-4).to_sql_literal(), "-4");
        assert_eq!(SqlValue::Text("O'Brien".into()).to_sql_literal(), "'O''Brien'");
        assert_eq!(
            SqlValue::Bytes(vec![0xde, 0xad]).to_sql_literal(),
            "'\\xdead'::bytea"
        );
        assert_eq!(
            SqlValue::F64(f64::NAN).to_sql_literal(),
            "'NaN'::double precision"
        );
    }

    #[test]
    fn test_timestamp_literal() {
        let ts = NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_opt(3, 4, 5)
            .unwrap();
        assert_eq!(
            SqlValue::Timestamp(ts).to_sql_literal(),
            "'2024-01-02 03:04:05'::timestamp"
        );
    }

    #[test]
    fn test_display_quotes_text() {
        assert_eq!(SqlValue::Text("a".into()).to_string(), "\"a\"");
        assert_eq!(SqlValue::Null.to_string(), "NULL");
    }
}
