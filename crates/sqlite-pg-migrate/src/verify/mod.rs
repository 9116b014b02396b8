//! Post-load validation.
//!
//! Three checks per table, cheapest first:
//!
//! - **Counts**: source and target row counts must be equal
//! - **Domains**: no source value may fall outside the table's own
//!   enumerated CHECK sets
//! - **Sample**: up to N rows fetched by primary key from both sides, the
//!   source values transformed and compared field by field
//!
//! Validation never mutates either database.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::core::schema::{Table, TargetType};
use crate::core::traits::DatabaseAdapter;
use crate::core::value::SqlValue;
use crate::error::{MigrateError, Result};
use crate::transfer::transform_row;
use crate::translate::TablePlan;

/// First field that differs between a source row and its stored copy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldMismatch {
    pub key: String,
    pub column: String,
    pub expected: String,
    pub actual: String,
}

/// Source values outside a declared value set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DomainViolation {
    pub column: String,
    pub count: i64,
}

/// Validation outcome for one table.
#[derive(Debug, Clone, Serialize)]
pub struct TableValidation {
    pub table: String,
    /// Whether the table exists in the target.
    pub present: bool,
    pub rows_source: i64,
    pub rows_target: i64,
    pub sampled: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing_keys: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mismatch: Option<FieldMismatch>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub out_of_domain: Vec<DomainViolation>,
}

impl TableValidation {
    fn new(table: &str, rows_source: i64, rows_target: i64) -> Self {
        Self {
            table: table.to_string(),
            present: true,
            rows_source,
            rows_target,
            sampled: 0,
            missing_keys: Vec::new(),
            mismatch: None,
            out_of_domain: Vec::new(),
        }
    }

    /// Result for a table absent from the target.
    pub fn missing(table: &str, rows_source: i64) -> Self {
        Self {
            present: false,
            ..Self::new(table, rows_source, 0)
        }
    }

    pub fn counts_match(&self) -> bool {
        self.rows_source == self.rows_target
    }

    pub fn passed(&self) -> bool {
        self.present
            && self.counts_match()
            && self.missing_keys.is_empty()
            && self.mismatch.is_none()
            && self.out_of_domain.is_empty()
    }

    /// One-line description of every failed check.
    pub fn detail(&self) -> String {
        let mut parts = Vec::new();
        if !self.present {
            return "table missing in target".to_string();
        }
        if !self.counts_match() {
            parts.push(format!(
                "row count source={} target={}",
                self.rows_source, self.rows_target
            ));
        }
        for v in &self.out_of_domain {
            parts.push(format!(
                "{} source values of {} outside the declared set",
                v.count, v.column
            ));
        }
        if !self.missing_keys.is_empty() {
            parts.push(format!("rows missing in target: {}", self.missing_keys.join("; ")));
        }
        if let Some(m) = &self.mismatch {
            parts.push(format!(
                "row {} column {}: expected {} got {}",
                m.key, m.column, m.expected, m.actual
            ));
        }
        parts.join("; ")
    }

    /// The failure as an error, `None` when the table passed.
    pub fn to_error(&self) -> Option<MigrateError> {
        if self.passed() {
            None
        } else {
            Some(MigrateError::ValidationMismatch {
                table: self.table.clone(),
                detail: self.detail(),
            })
        }
    }
}

/// Compares migrated tables against their source.
pub struct Validator {
    source: Arc<dyn DatabaseAdapter>,
    target: Arc<dyn DatabaseAdapter>,
    sample_rows: usize,
}

impl Validator {
    pub fn new(source: Arc<dyn DatabaseAdapter>, target: Arc<dyn DatabaseAdapter>, sample_rows: usize) -> Self {
        Self {
            source,
            target,
            sample_rows,
        }
    }

    /// Validate one table. `counts_only` restricts the run to the row count
    /// comparison, used for tables that existed before the run.
    pub async fn validate_table(&self, plan: &TablePlan, counts_only: bool) -> Result<TableValidation> {
        let table = &plan.table;
        let rows_source = self.source.row_count(&table.name).await?;
        let rows_target = self.target.row_count(&table.name).await?;
        let mut result = TableValidation::new(&table.name, rows_source, rows_target);

        if counts_only {
            debug!("{}: pre-existing table, counts only", table.name);
            return Ok(result);
        }

        for domain in &plan.domains {
            let count = self
                .source
                .count_values_outside(&table.name, &domain.column, &domain.values)
                .await?;
            if count > 0 {
                warn!(
                    "{}.{}: {} source values outside the declared set",
                    table.name, domain.column, count
                );
                result.out_of_domain.push(DomainViolation {
                    column: domain.column.clone(),
                    count,
                });
            }
        }

        if self.sample_rows > 0 && table.has_pk() {
            self.compare_sample(table, &mut result).await?;
        } else if self.sample_rows > 0 {
            debug!("{}: no primary key, sample skipped", table.name);
        }

        if result.passed() {
            info!(
                "{}: validated ({} rows, {} sampled)",
                table.name, rows_target, result.sampled
            );
        } else {
            warn!("{}: validation failed: {}", table.name, result.detail());
        }
        Ok(result)
    }

    async fn compare_sample(&self, table: &Table, result: &mut TableValidation) -> Result<()> {
        let mut rx = self.source.stream_rows(table, self.sample_rows);
        let first = rx.recv().await;
        // Dropping the receiver stops the reader and frees its connection.
        drop(rx);
        let source_rows = match first {
            Some(batch) => batch?.rows,
            None => Vec::new(),
        };
        if source_rows.is_empty() {
            return Ok(());
        }

        let mut expected = Vec::with_capacity(source_rows.len());
        for raw in &source_rows {
            let row = transform_row(table, raw).map_err(|message| MigrateError::ValidationMismatch {
                table: table.name.clone(),
                detail: format!(
                    "row {} cannot be converted: {}",
                    table.key_of(raw).unwrap_or_default(),
                    message
                ),
            })?;
            expected.push(row);
        }

        let keys: Vec<_> = expected.iter().map(|row| table.key_values(row)).collect();
        let stored = self.target.fetch_rows_by_key(table, &keys).await?;
        let stored: HashMap<String, _> = stored
            .into_iter()
            .filter_map(|row| table.key_of(&row).map(|k| (k, row)))
            .collect();

        result.sampled = expected.len();
        for row in &expected {
            let key = table.key_of(row).unwrap_or_default();
            let Some(actual) = stored.get(&key) else {
                result.missing_keys.push(key);
                continue;
            };
            if result.mismatch.is_none() {
                result.mismatch = first_difference(table, &key, row, actual);
            }
        }
        Ok(())
    }
}

fn first_difference(table: &Table, key: &str, expected: &[SqlValue], actual: &[SqlValue]) -> Option<FieldMismatch> {
    for (i, column) in table.columns.iter().enumerate() {
        let want = expected.get(i).unwrap_or(&SqlValue::Null);
        let got = actual.get(i).unwrap_or(&SqlValue::Null);
        if !values_match(want, got, column.target()) {
            return Some(FieldMismatch {
                key: key.to_string(),
                column: column.name.clone(),
                expected: want.to_string(),
                actual: got.to_string(),
            });
        }
    }
    None
}

/// Whether a transformed source value and the stored value agree.
///
/// Numeric columns compare by value regardless of representation;
/// everything else compares exactly (timestamps with offset by instant).
pub fn values_match(expected: &SqlValue, actual: &SqlValue, target: &TargetType) -> bool {
    match (expected, actual) {
        (SqlValue::Null, SqlValue::Null) => true,
        (SqlValue::Null, _) | (_, SqlValue::Null) => false,
        _ if matches!(target, TargetType::Numeric { .. }) => {
            match (decimal_text(expected), decimal_text(actual)) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            }
        }
        _ if matches!(target, TargetType::DoublePrecision) => {
            match (as_f64(expected), as_f64(actual)) {
                (Some(a), Some(b)) => a == b || (a.is_nan() && b.is_nan()),
                _ => false,
            }
        }
        _ => expected == actual,
    }
}

/// Canonical decimal text of a numeric value, exact for any number of digits.
fn decimal_text(value: &SqlValue) -> Option<String> {
    match value {
        SqlValue::I64(n) => normalize_decimal(&n.to_string()),
        SqlValue::F64(f) if f.is_finite() => normalize_decimal(&f.to_string()),
        SqlValue::Text(s) => normalize_decimal(s),
        _ => None,
    }
}

/// Rewrite `[+-]digits[.digits][e[+-]digits]` without exponent, leading
/// zeros or trailing fractional zeros. `NaN` maps to itself.
fn normalize_decimal(text: &str) -> Option<String> {
    let text = text.trim();
    if text.eq_ignore_ascii_case("nan") {
        return Some("NaN".to_string());
    }
    let (negative, unsigned) = match text.as_bytes().first()? {
        b'-' => (true, &text[1..]),
        b'+' => (false, &text[1..]),
        _ => (false, text),
    };
    let (mantissa, exponent) = match unsigned.find(['e', 'E']) {
        Some(at) => (&unsigned[..at], unsigned[at + 1..].parse::<i64>().ok()?),
        None => (unsigned, 0),
    };
    if exponent.abs() > 1000 {
        return None;
    }
    let (int_part, frac_part) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if (int_part.is_empty() && frac_part.is_empty()) || !all_digits(int_part) || !all_digits(frac_part) {
        return None;
    }

    let mut digits = format!("{}{}", int_part, frac_part);
    let mut point = int_part.len() as i64 + exponent;
    if point < 0 {
        digits.insert_str(0, &"0".repeat(point.unsigned_abs() as usize));
        point = 0;
    }
    let point = point as usize;
    if point > digits.len() {
        digits.push_str(&"0".repeat(point - digits.len()));
    }

    let whole = digits[..point].trim_start_matches('0');
    let fraction = digits[point..].trim_end_matches('0');
    let mut out = String::new();
    if negative && (!whole.is_empty() || !fraction.is_empty()) {
        out.push('-');
    }
    out.push_str(if whole.is_empty() { "0" } else { whole });
    if !fraction.is_empty() {
        out.push('.');
        out.push_str(fraction);
    }
    Some(out)
}

fn as_f64(value: &SqlValue) -> Option<f64> {
    match value {
        SqlValue::I64(n) => Some(*n as f64),
        SqlValue::F64(f) => Some(*f),
        SqlValue::Text(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, FixedOffset};

    #[test]
    fn test_values_match_numeric_by_value() {
        let numeric = TargetType::Numeric { precision: 10, scale: 2 };
        assert!(values_match(&SqlValue::Text("12.5".into()), &SqlValue::Text("12.50".into()), &numeric));
        assert!(values_match(&SqlValue::F64(12.5), &SqlValue::Text("12.50".into()), &numeric));
        assert!(values_match(&SqlValue::I64(3), &SqlValue::Text("3.00".into()), &numeric));
        assert!(!values_match(&SqlValue::I64(3), &SqlValue::Text("3.01".into()), &numeric));
        assert!(values_match(
            &SqlValue::F64(f64::NAN),
            &SqlValue::F64(f64::NAN),
            &TargetType::DoublePrecision
        ));
        assert!(!values_match(&SqlValue::Null, &SqlValue::I64(0), &TargetType::BigInt));
        assert!(values_match(&SqlValue::Null, &SqlValue::Null, &TargetType::Text));
    }

    #[test]
    fn test_values_match_numeric_keeps_every_digit() {
        let numeric = TargetType::Numeric { precision: 24, scale: 2 };
        let source = SqlValue::Text("12345678901234567890.12".into());
        assert!(values_match(&source, &SqlValue::Text("12345678901234567890.12".into()), &numeric));
        // Both sides round to the same f64.
        assert!(!values_match(&source, &SqlValue::Text("12345678901234567890.13".into()), &numeric));
        assert!(values_match(&SqlValue::Text("1.5e3".into()), &SqlValue::Text("1500.00".into()), &numeric));
        assert!(values_match(&SqlValue::Text("-0.0".into()), &SqlValue::Text("0.00".into()), &numeric));
        assert!(!values_match(&SqlValue::Text("abc".into()), &SqlValue::Text("abc".into()), &numeric));
    }

    #[test]
    fn test_normalize_decimal() {
        assert_eq!(normalize_decimal(" +007.2500 ").as_deref(), Some("7.25"));
        assert_eq!(normalize_decimal("-.5").as_deref(), Some("-0.5"));
        assert_eq!(normalize_decimal("12E-4").as_deref(), Some("0.0012"));
        assert_eq!(normalize_decimal("nan").as_deref(), Some("NaN"));
        assert_eq!(normalize_decimal("."), None);
        assert_eq!(normalize_decimal("1.2.3"), None);
    }

    #[test]
    fn test_values_match_timestamptz_by_instant() {
        let a: DateTime<FixedOffset> = DateTime::parse_from_rfc3339("2024-03-01T12:00:00+02:00").unwrap();
        let b: DateTime<FixedOffset> = DateTime::parse_from_rfc3339("2024-03-01T10:00:00Z").unwrap();
        assert!(values_match(
            &SqlValue::TimestampTz(a),
            &SqlValue::TimestampTz(b),
            &TargetType::TimestampTz
        ));
    }

    #[test]
    fn test_detail_names_every_failure() {
        let mut v = TableValidation::new("users", 5, 4);
        assert!(!v.passed());
        v.out_of_domain.push(DomainViolation {
            column: "status".into(),
            count: 2,
        });
        let detail = v.detail();
        assert!(detail.contains("source=5 target=4"));
        assert!(detail.contains("2 source values of status"));
        assert!(matches!(
            v.to_error(),
            Some(MigrateError::ValidationMismatch { ref table, .. }) if table == "users"
        ));

        let missing = TableValidation::missing("users", 0);
        assert!(!missing.passed());
        assert_eq!(missing.detail(), "table missing in target");

        let ok = TableValidation::new("users", 3, 3);
        assert!(ok.passed());
        assert!(ok.to_error().is_none());
    }

    #[test]
    fn test_first_difference_reports_column() {
        let mut table = Table::new("users");
        table.columns = vec![
            crate::core::schema::Column::new("id", "INTEGER", 0),
            crate::core::schema::Column::new("name", "TEXT", 1),
        ];
        table.primary_key = vec!["id".into()];
        let m = first_difference(
            &table,
            "id=1",
            &[SqlValue::I64(1), SqlValue::Text("ann".into())],
            &[SqlValue::I64(1), SqlValue::Text("bob".into())],
        )
        .unwrap();
        assert_eq!(m.column, "name");
        assert_eq!(m.expected, "\"ann\"");
        assert_eq!(m.actual, "\"bob\"");
    }
}
