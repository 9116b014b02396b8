//! Type mapping from SQLite declared types to PostgreSQL column types.
//!
//! SQLite columns have a type *affinity*, derived from the declared type name
//! by substring rules, and every cell may still hold any storage class. The
//! mapping below is fixed and auditable:
//!
//! | Source                                   | Target                                    |
//! |------------------------------------------|-------------------------------------------|
//! | single `INTEGER PRIMARY KEY`             | `bigint GENERATED BY DEFAULT AS IDENTITY` |
//! | integer affinity (`INT`)                 | `bigint`                                  |
//! | text affinity (`CHAR`, `CLOB`, `TEXT`)   | `text`                                    |
//! | real affinity (`REAL`, `FLOA`, `DOUB`)   | `double precision`                        |
//! | `DECIMAL(p,s)` / `NUMERIC(p,s)`          | `numeric(p,s)`                            |
//! | other numeric affinity                   | `double precision`                        |
//! | `BLOB`                                   | `bytea`                                   |
//! | boolean semantics + only 0/1 observed    | `boolean`                                 |
//! | temporal type/name + only ISO-8601 text  | `timestamp` / `timestamptz` / `date`      |
//! | anything ambiguous                       | `text`                                    |
//!
//! Every column except the rowid alias is profiled ([`ColumnProfile`]).
//! A column holding a storage class its target type cannot take without
//! loss (a real or text in an `INTEGER` column, say) falls back to `text`.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime};
use serde::Serialize;

use crate::core::schema::{Column, ColumnProfile, Table, TargetType};
use crate::core::value::SqlValue;
use crate::translate::check::EnumCheck;

/// SQLite type affinity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Affinity {
    Integer,
    Text,
    Blob,
    Real,
    Numeric,
}

/// Affinity of a declared type, following SQLite's rules in order.
pub fn affinity(declared: &str) -> Affinity {
    let upper = declared.to_uppercase();
    if upper.contains("INT") {
        Affinity::Integer
    } else if upper.contains("CHAR") || upper.contains("CLOB") || upper.contains("TEXT") {
        Affinity::Text
    } else if upper.contains("BLOB") || upper.trim().is_empty() {
        Affinity::Blob
    } else if upper.contains("REAL") || upper.contains("FLOA") || upper.contains("DOUB") {
        Affinity::Real
    } else {
        Affinity::Numeric
    }
}

/// Column names that conventionally hold flags.
const BOOLEAN_NAME_PREFIXES: &[&str] = &["is_", "has_", "can_", "should_", "allow_", "allows_"];
const BOOLEAN_NAMES: &[&str] = &[
    "active", "enabled", "disabled", "deleted", "verified", "published", "visible", "archived",
    "admin", "locked", "approved", "confirmed",
];

/// Column names that conventionally hold dates or timestamps.
const TEMPORAL_NAME_SUFFIXES: &[&str] = &["_at", "_on", "_date", "_time", "_timestamp", "_ts"];
const TEMPORAL_NAMES: &[&str] = &["date", "timestamp", "created", "updated", "modified", "time"];

fn has_boolean_name(name: &str) -> bool {
    let lower = name.to_lowercase();
    BOOLEAN_NAME_PREFIXES.iter().any(|p| lower.starts_with(p))
        || BOOLEAN_NAMES.contains(&lower.as_str())
}

fn has_temporal_name(name: &str) -> bool {
    let lower = name.to_lowercase();
    TEMPORAL_NAME_SUFFIXES.iter().any(|s| lower.ends_with(s))
        || TEMPORAL_NAMES.contains(&lower.as_str())
}

fn declared_boolean(declared: &str) -> bool {
    declared.to_uppercase().contains("BOOL")
}

fn declared_temporal(declared: &str) -> bool {
    let upper = declared.to_uppercase();
    upper.contains("DATE") || upper.contains("TIME")
}

fn declared_date_only(declared: &str) -> bool {
    let upper = declared.to_uppercase();
    upper.contains("DATE") && !upper.contains("TIME")
}

fn declared_zoned(declared: &str) -> bool {
    let upper = declared.to_uppercase();
    upper.contains("TIMESTAMPTZ") || upper.contains("WITH TIME ZONE")
}

/// Single `INTEGER PRIMARY KEY` column (an alias of SQLite's rowid).
pub fn is_rowid_alias(table: &Table, column: &Column) -> bool {
    table.primary_key.len() == 1
        && column.is_pk()
        && column.source_type.trim().eq_ignore_ascii_case("INTEGER")
}

/// Parse `DECIMAL(p,s)` / `NUMERIC(p,s)` / `NUMERIC(p)`.
fn numeric_precision(declared: &str) -> Option<(u32, u32)> {
    let upper = declared.to_uppercase();
    if !(upper.starts_with("DECIMAL") || upper.starts_with("NUMERIC")) {
        return None;
    }
    let open = upper.find('(')?;
    let close = upper.rfind(')')?;
    let mut parts = upper[open + 1..close].split(',').map(|p| p.trim().parse::<u32>());
    let precision = parts.next()?.ok()?;
    let scale = match parts.next() {
        Some(s) => s.ok()?,
        None => 0,
    };
    if precision == 0 || precision > 1000 || scale > precision {
        return None;
    }
    Some((precision, scale))
}

/// Everything the mapper knows about one column.
#[derive(Debug, Clone, Copy)]
pub struct ColumnFacts<'a> {
    pub table: &'a Table,
    pub column: &'a Column,
    /// Enum check declared on this column, if any.
    pub enum_check: Option<&'a EnumCheck>,
    /// Observed values; absent for the rowid alias.
    pub profile: Option<&'a ColumnProfile>,
}

/// Outcome of mapping one column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeDecision {
    pub target: TargetType,
    pub reason: &'static str,
}

impl TypeDecision {
    fn new(target: TargetType, reason: &'static str) -> Self {
        Self { target, reason }
    }
}

/// Whether mapping this column needs a value profile.
///
/// The rowid alias can only hold integers; any other column may hold
/// values of every storage class.
pub fn needs_profile(table: &Table, column: &Column) -> bool {
    !is_rowid_alias(table, column)
}

/// Map one column to its target type.
pub fn map_column(facts: ColumnFacts<'_>) -> TypeDecision {
    let column = facts.column;
    let declared = column.source_type.as_str();

    if is_rowid_alias(facts.table, column) {
        return TypeDecision::new(TargetType::Identity, "integer primary key");
    }

    let boolean_hint = declared_boolean(declared)
        || facts.enum_check.is_some_and(EnumCheck::is_boolean)
        || has_boolean_name(&column.name);
    let temporal_hint = declared_temporal(declared) || has_temporal_name(&column.name);

    if let Some(profile) = facts.profile {
        if boolean_hint && profile.only_numbers() && profile.all_zero_one() {
            return TypeDecision::new(TargetType::Boolean, "boolean semantics, values 0/1");
        }

        if temporal_hint && profile.all_iso() && (profile.non_null > 0 || declared_temporal(declared)) {
            return TypeDecision::new(temporal_target(declared, &column.name, profile), "ISO-8601 values");
        }
    }

    let profile = facts.profile.copied().unwrap_or_default();
    match affinity(declared) {
        Affinity::Integer if !profile.only_integers() => {
            TypeDecision::new(TargetType::Text, "integer affinity, mixed storage classes")
        }
        Affinity::Integer => TypeDecision::new(TargetType::BigInt, "integer affinity"),
        Affinity::Text if profile.binary_blobs > 0 => {
            TypeDecision::new(TargetType::Bytea, "text affinity, binary values")
        }
        Affinity::Text => TypeDecision::new(TargetType::Text, "text affinity"),
        Affinity::Real if !profile.only_numbers() => {
            TypeDecision::new(TargetType::Text, "real affinity, mixed storage classes")
        }
        Affinity::Real => TypeDecision::new(TargetType::DoublePrecision, "real affinity"),
        Affinity::Blob => {
            if declared.trim().is_empty() {
                match facts.profile {
                    Some(p) if p.blobs > 0 && p.blobs == p.non_null => {
                        TypeDecision::new(TargetType::Bytea, "untyped, blob values")
                    }
                    _ => TypeDecision::new(TargetType::Text, "untyped"),
                }
            } else {
                TypeDecision::new(TargetType::Bytea, "blob")
            }
        }
        Affinity::Numeric => {
            if let Some((precision, scale)) = numeric_precision(declared) {
                if profile.blobs > 0 || profile.texts > profile.numeric_texts {
                    return TypeDecision::new(TargetType::Text, "numeric affinity, non-numeric values");
                }
                return TypeDecision::new(
                    TargetType::Numeric { precision, scale },
                    "declared precision",
                );
            }
            if profile.only_numbers() {
                TypeDecision::new(TargetType::DoublePrecision, "numeric affinity")
            } else {
                TypeDecision::new(TargetType::Text, "numeric affinity, non-numeric values")
            }
        }
    }
}

fn temporal_target(declared: &str, name: &str, profile: &ColumnProfile) -> TargetType {
    let lower = name.to_lowercase();
    let date_hint = declared_date_only(declared)
        || (!declared_temporal(declared) && (lower.ends_with("_date") || lower.ends_with("_on") || lower == "date"));

    if profile.iso_timestamps == 0 && date_hint {
        TargetType::Date
    } else if profile.with_offset > 0 || declared_zoned(declared) {
        TargetType::TimestampTz
    } else {
        TargetType::Timestamp
    }
}

/// A parsed ISO-8601 text value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Temporal {
    Date(NaiveDate),
    Naive(NaiveDateTime),
    Zoned(DateTime<FixedOffset>),
}

/// Parse `YYYY-MM-DD`, `YYYY-MM-DD[ T]HH:MM[:SS[.fff]]` with an optional
/// `Z` / `±HH[:MM]` suffix.
///
/// PostgreSQL keeps microseconds, so a value with non-zero digits past the
/// sixth fractional place is not a timestamp here.
pub fn parse_temporal(text: &str) -> Option<Temporal> {
    let s = text.trim();
    if s.len() < 10 || !s.is_char_boundary(10) {
        return None;
    }
    if s.len() == 10 {
        return NaiveDate::parse_from_str(s, "%Y-%m-%d").ok().map(Temporal::Date);
    }

    let (date_part, rest) = s.split_at(10);
    let sep = rest.chars().next()?;
    if sep != ' ' && sep != 'T' && sep != 't' {
        return None;
    }
    let rest = &rest[1..];

    let (time_part, offset) = split_offset(rest)?;
    if let Some((_, fraction)) = time_part.split_once('.') {
        if fraction.chars().skip(6).any(|c| c != '0') {
            return None;
        }
    }
    let naive_text = format!("{} {}", date_part, time_part);
    let naive = NaiveDateTime::parse_from_str(&naive_text, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(&naive_text, "%Y-%m-%d %H:%M"))
        .ok()?;

    match offset {
        None => Some(Temporal::Naive(naive)),
        Some(offset) => naive
            .and_local_timezone(offset)
            .single()
            .map(Temporal::Zoned),
    }
}

/// Split `HH:MM:SS.fff+02:00` into time text and offset.
fn split_offset(rest: &str) -> Option<(&str, Option<FixedOffset>)> {
    if let Some(time) = rest.strip_suffix('Z').or_else(|| rest.strip_suffix('z')) {
        return Some((time, FixedOffset::east_opt(0)));
    }
    let Some(pos) = rest.rfind(['+', '-']) else {
        return Some((rest, None));
    };
    let (time, zone) = rest.split_at(pos);
    let sign = if zone.starts_with('-') { -1 } else { 1 };
    let digits: String = zone[1..].chars().filter(|c| *c != ':').collect();
    if digits.is_empty() || digits.len() > 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let (hours, minutes) = match digits.len() {
        1 | 2 => (digits.parse::<i32>().ok()?, 0),
        3 | 4 => {
            let split = digits.len() - 2;
            (digits[..split].parse::<i32>().ok()?, digits[split..].parse::<i32>().ok()?)
        }
        _ => return None,
    };
    if hours > 15 || minutes > 59 {
        return None;
    }
    Some((time, FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))))
}

impl ColumnProfile {
    /// Account for one observed value.
    pub fn observe(&mut self, value: &SqlValue) {
        match value {
            SqlValue::Null => return,
            SqlValue::I64(n) => {
                self.integers += 1;
                if *n == 0 || *n == 1 {
                    self.zero_one += 1;
                }
            }
            SqlValue::F64(_) => self.reals += 1,
            SqlValue::Bytes(b) => {
                self.blobs += 1;
                if std::str::from_utf8(b).is_err() {
                    self.binary_blobs += 1;
                }
            }
            SqlValue::Text(s) => {
                self.texts += 1;
                if s.trim().parse::<f64>().is_ok_and(f64::is_finite) {
                    self.numeric_texts += 1;
                }
                match parse_temporal(s) {
                    Some(Temporal::Date(_)) => self.iso_dates += 1,
                    Some(Temporal::Naive(_)) => self.iso_timestamps += 1,
                    Some(Temporal::Zoned(_)) => {
                        self.iso_timestamps += 1;
                        self.with_offset += 1;
                    }
                    None => {}
                }
            }
            SqlValue::Bool(_) => {
                self.integers += 1;
                self.zero_one += 1;
            }
            SqlValue::Timestamp(_) | SqlValue::TimestampTz(_) | SqlValue::Date(_) => {
                self.iso_timestamps += 1;
            }
        }
        self.non_null += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::check::parse_enum;

    fn table_with(columns: Vec<Column>, pk: &[&str]) -> Table {
        let mut t = Table::new("t");
        t.columns = columns;
        t.primary_key = pk.iter().map(|s| s.to_string()).collect();
        t
    }

    fn profile_of(values: &[SqlValue]) -> ColumnProfile {
        let mut p = ColumnProfile::default();
        for v in values {
            p.observe(v);
        }
        p
    }

    fn map(table: &Table, idx: usize, profile: Option<&ColumnProfile>, check: Option<&EnumCheck>) -> TargetType {
        map_column(ColumnFacts {
            table,
            column: &table.columns[idx],
            enum_check: check,
            profile,
        })
        .target
    }

    #[test]
    fn test_affinity_rules() {
        assert_eq!(affinity("INTEGER"), Affinity::Integer);
        assert_eq!(affinity("BIGINT"), Affinity::Integer);
        assert_eq!(affinity("VARCHAR(255)"), Affinity::Text);
        assert_eq!(affinity("CLOB"), Affinity::Text);
        assert_eq!(affinity("BLOB"), Affinity::Blob);
        assert_eq!(affinity(""), Affinity::Blob);
        assert_eq!(affinity("DOUBLE PRECISION"), Affinity::Real);
        assert_eq!(affinity("FLOAT"), Affinity::Real);
        assert_eq!(affinity("DECIMAL(10,2)"), Affinity::Numeric);
        assert_eq!(affinity("DATETIME"), Affinity::Numeric);
        // "POINT" contains INT
        assert_eq!(affinity("POINT"), Affinity::Integer);
    }

    #[test]
    fn test_integer_primary_key_becomes_identity() {
        let mut id = Column::new("id", "INTEGER", 0);
        id.pk_position = 1;
        let table = table_with(vec![id], &["id"]);
        assert_eq!(map(&table, 0, None, None), TargetType::Identity);

        let mut id = Column::new("id", "INT", 0);
        id.pk_position = 1;
        let table = table_with(vec![id], &["id"]);
        assert_eq!(map(&table, 0, None, None), TargetType::BigInt);
    }

    #[test]
    fn test_composite_integer_key_is_not_identity() {
        let mut a = Column::new("a", "INTEGER", 0);
        a.pk_position = 1;
        let mut b = Column::new("b", "INTEGER", 1);
        b.pk_position = 2;
        let table = table_with(vec![a, b], &["a", "b"]);
        assert_eq!(map(&table, 0, None, None), TargetType::BigInt);
    }

    #[test]
    fn test_plain_affinities() {
        let table = table_with(
            vec![
                Column::new("name", "TEXT", 0),
                Column::new("score", "REAL", 1),
                Column::new("price", "DECIMAL(10,2)", 2),
                Column::new("data", "BLOB", 3),
                Column::new("weight", "NUMERIC", 4),
            ],
            &[],
        );
        assert_eq!(map(&table, 0, None, None), TargetType::Text);
        assert_eq!(map(&table, 1, None, None), TargetType::DoublePrecision);
        assert_eq!(
            map(&table, 2, None, None),
            TargetType::Numeric { precision: 10, scale: 2 }
        );
        assert_eq!(map(&table, 3, None, None), TargetType::Bytea);
        assert_eq!(map(&table, 4, None, None), TargetType::DoublePrecision);
    }

    #[test]
    fn test_boolean_requires_hint_and_zero_one_values() {
        let table = table_with(
            vec![
                Column::new("is_admin", "INTEGER", 0),
                Column::new("flag", "BOOLEAN", 1),
                Column::new("retries", "INTEGER", 2),
            ],
            &[],
        );
        let zero_one = profile_of(&[SqlValue::I64(0), SqlValue::I64(1), SqlValue::Null]);
        let wider = profile_of(&[SqlValue::I64(0), SqlValue::I64(2)]);

        assert_eq!(map(&table, 0, Some(&zero_one), None), TargetType::Boolean);
        assert_eq!(map(&table, 0, Some(&wider), None), TargetType::BigInt);
        assert_eq!(map(&table, 1, Some(&zero_one), None), TargetType::Boolean);
        // no hint: stays integer even with 0/1 values
        assert_eq!(map(&table, 2, Some(&zero_one), None), TargetType::BigInt);
    }

    #[test]
    fn test_boolean_from_check_constraint() {
        let table = table_with(vec![Column::new("notify", "INTEGER", 0)], &[]);
        let check = parse_enum("notify IN (0, 1)").unwrap();
        assert!(needs_profile(&table, &table.columns[0]));
        let zero_one = profile_of(&[SqlValue::I64(1)]);
        assert_eq!(map(&table, 0, Some(&zero_one), Some(&check)), TargetType::Boolean);
    }

    #[test]
    fn test_temporal_columns() {
        let table = table_with(
            vec![
                Column::new("created_at", "TEXT", 0),
                Column::new("birth_date", "DATE", 1),
                Column::new("seen", "DATETIME", 2),
                Column::new("note_at", "TEXT", 3),
            ],
            &[],
        );
        let timestamps = profile_of(&[
            SqlValue::Text("2024-03-01 10:00:00".into()),
            SqlValue::Text("2024-03-02T11:30".into()),
        ]);
        let zoned = profile_of(&[SqlValue::Text("2024-03-01T10:00:00Z".into())]);
        let dates = profile_of(&[SqlValue::Text("1990-05-17".into())]);
        let junk = profile_of(&[
            SqlValue::Text("2024-03-01 10:00:00".into()),
            SqlValue::Text("yesterday".into()),
        ]);

        assert_eq!(map(&table, 0, Some(&timestamps), None), TargetType::Timestamp);
        assert_eq!(map(&table, 0, Some(&zoned), None), TargetType::TimestampTz);
        assert_eq!(map(&table, 1, Some(&dates), None), TargetType::Date);
        assert_eq!(map(&table, 2, Some(&timestamps), None), TargetType::Timestamp);
        assert_eq!(map(&table, 3, Some(&junk), None), TargetType::Text);
    }

    #[test]
    fn test_untyped_column() {
        let table = table_with(vec![Column::new("x", "", 0)], &[]);
        assert!(needs_profile(&table, &table.columns[0]));
        let blobs = profile_of(&[SqlValue::Bytes(vec![1])]);
        let mixed = profile_of(&[SqlValue::Bytes(vec![1]), SqlValue::Text("a".into())]);
        assert_eq!(map(&table, 0, Some(&blobs), None), TargetType::Bytea);
        assert_eq!(map(&table, 0, Some(&mixed), None), TargetType::Text);
    }

    #[test]
    fn test_mixed_storage_classes_fall_back_to_text() {
        let table = table_with(
            vec![
                Column::new("qty", "INTEGER", 0),
                Column::new("score", "REAL", 1),
                Column::new("price", "DECIMAL(10,2)", 2),
                Column::new("label", "TEXT", 3),
            ],
            &[],
        );
        let qty = profile_of(&[SqlValue::I64(3), SqlValue::F64(2.5), SqlValue::Text("n/a".into())]);
        assert_eq!(map(&table, 0, Some(&qty), None), TargetType::Text);

        let integers = profile_of(&[SqlValue::I64(3), SqlValue::Null]);
        assert_eq!(map(&table, 0, Some(&integers), None), TargetType::BigInt);

        let scores = profile_of(&[SqlValue::F64(1.5), SqlValue::I64(2)]);
        assert_eq!(map(&table, 1, Some(&scores), None), TargetType::DoublePrecision);
        let scores = profile_of(&[SqlValue::F64(1.5), SqlValue::Text("high".into())]);
        assert_eq!(map(&table, 1, Some(&scores), None), TargetType::Text);

        let prices = profile_of(&[SqlValue::F64(9.99), SqlValue::Text(" 12.50 ".into())]);
        assert_eq!(
            map(&table, 2, Some(&prices), None),
            TargetType::Numeric { precision: 10, scale: 2 }
        );
        let prices = profile_of(&[SqlValue::F64(9.99), SqlValue::Text("free".into())]);
        assert_eq!(map(&table, 2, Some(&prices), None), TargetType::Text);

        let labels = profile_of(&[SqlValue::Text("a".into()), SqlValue::Bytes(b"utf8".to_vec())]);
        assert_eq!(map(&table, 3, Some(&labels), None), TargetType::Text);
        let labels = profile_of(&[SqlValue::Text("a".into()), SqlValue::Bytes(vec![0xff, 0xfe])]);
        assert_eq!(map(&table, 3, Some(&labels), None), TargetType::Bytea);
    }

    #[test]
    fn test_sub_microsecond_text_stays_text() {
        let table = table_with(vec![Column::new("created_at", "DATETIME", 0)], &[]);
        let precise = profile_of(&[
            SqlValue::Text("2024-01-01 10:00:00.123456".into()),
            SqlValue::Text("2024-01-01 10:00:00.1234567".into()),
        ]);
        assert!(!precise.all_iso());
        assert_eq!(map(&table, 0, Some(&precise), None), TargetType::Text);
    }

    #[test]
    fn test_parse_temporal_shapes() {
        assert!(matches!(parse_temporal("2024-01-31"), Some(Temporal::Date(_))));
        assert!(matches!(parse_temporal("2024-01-31 23:59"), Some(Temporal::Naive(_))));
        assert!(matches!(
            parse_temporal("2024-01-31T23:59:59.123456"),
            Some(Temporal::Naive(ts)) if ts.and_utc().timestamp_subsec_micros() == 123_456
        ));
        // Trailing zeros past microseconds lose nothing.
        assert!(matches!(parse_temporal("2024-01-31 23:59:59.123456000"), Some(Temporal::Naive(_))));
        assert!(parse_temporal("2024-01-01 10:00:00.1234567").is_none());
        assert!(parse_temporal("2024-01-01T10:00:00.123456789Z").is_none());
        let Some(Temporal::Zoned(z)) = parse_temporal("2024-01-31 10:00:00+05:30") else {
            panic!("expected zoned");
        };
        assert_eq!(z.offset().local_minus_utc(), 5 * 3600 + 30 * 60);
        assert!(matches!(parse_temporal("2024-01-31 10:00:00-0800"), Some(Temporal::Zoned(_))));
        assert!(parse_temporal("2024-13-01").is_none());
        assert!(parse_temporal("31/01/2024").is_none());
        assert!(parse_temporal("2024-01-31 noon").is_none());
    }
}
