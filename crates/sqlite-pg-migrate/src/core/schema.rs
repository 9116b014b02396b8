//! Schema and metadata types for tables, columns, indexes, and constraints.
//!
//! The source adapter fills these in during introspection; the translator
//! later annotates each column with its target type.

use serde::{Deserialize, Serialize};

use super::value::SqlValue;

/// Table metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Table {
    /// Table name.
    pub name: String,

    /// Column definitions in declaration order.
    pub columns: Vec<Column>,

    /// Primary key column names, in key order.
    pub primary_key: Vec<String>,

    /// Foreign key constraints.
    pub foreign_keys: Vec<ForeignKey>,

    /// Secondary indexes (auto-created primary key indexes excluded).
    pub indexes: Vec<Index>,

    /// Check constraints.
    pub check_constraints: Vec<CheckConstraint>,

    /// Row count at introspection time.
    pub row_count: i64,
}

impl Table {
    /// Create an empty table descriptor.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            foreign_keys: Vec::new(),
            indexes: Vec::new(),
            check_constraints: Vec::new(),
            row_count: 0,
        }
    }

    /// Check if the table has a primary key.
    pub fn has_pk(&self) -> bool {
        !self.primary_key.is_empty()
    }

    /// Look up a column by name (case-insensitive, as SQLite resolves names).
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Position of a column in the column list.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Names of all columns in declaration order.
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Primary key of `row` rendered as `col=value, ...`, `None` without a key.
    pub fn key_of(&self, row: &[SqlValue]) -> Option<String> {
        if !self.has_pk() {
            return None;
        }
        let parts: Vec<String> = self
            .primary_key
            .iter()
            .filter_map(|pk| {
                let idx = self.column_index(pk)?;
                row.get(idx).map(|v| format!("{}={}", pk, v))
            })
            .collect();
        Some(parts.join(", "))
    }

    /// Key values of `row` in primary key order.
    pub fn key_values(&self, row: &[SqlValue]) -> Vec<SqlValue> {
        self.primary_key
            .iter()
            .filter_map(|pk| self.column_index(pk).and_then(|i| row.get(i).cloned()))
            .collect()
    }

    /// Tables this table references, excluding itself, in declaration order.
    pub fn referenced_tables(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for fk in &self.foreign_keys {
            if fk.ref_table.eq_ignore_ascii_case(&self.name) {
                continue;
            }
            if !out.iter().any(|t| t.eq_ignore_ascii_case(&fk.ref_table)) {
                out.push(&fk.ref_table);
            }
        }
        out
    }
}

/// Column metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    /// Column name.
    pub name: String,

    /// Declared type as written in the source (may be empty).
    pub source_type: String,

    /// Whether NULL is allowed.
    pub is_nullable: bool,

    /// Default expression as written in the source.
    pub default: Option<String>,

    /// Position within the primary key (1-based), 0 when not part of it.
    pub pk_position: u32,

    /// Ordinal position (0-based).
    pub ordinal: usize,

    /// Type chosen for the target, filled in by the translator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_type: Option<TargetType>,
}

impl Column {
    /// Create a nullable column with the given declared type.
    pub fn new(name: impl Into<String>, source_type: impl Into<String>, ordinal: usize) -> Self {
        Self {
            name: name.into(),
            source_type: source_type.into(),
            is_nullable: true,
            default: None,
            pk_position: 0,
            ordinal,
            target_type: None,
        }
    }

    pub fn is_pk(&self) -> bool {
        self.pk_position > 0
    }

    /// Target type, or text when the translator has not run yet.
    pub fn target(&self) -> &TargetType {
        self.target_type.as_ref().unwrap_or(&TargetType::Text)
    }
}

/// Static column type in the target engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum TargetType {
    BigInt,
    /// `bigint GENERATED BY DEFAULT AS IDENTITY` for a rowid-alias key.
    Identity,
    DoublePrecision,
    Numeric { precision: u32, scale: u32 },
    Text,
    Bytea,
    Boolean,
    Timestamp,
    TimestampTz,
    Date,
    /// Native enum type created by this run.
    Enum { type_name: String },
}

impl TargetType {
    /// Column type as written in DDL.
    pub fn to_sql(&self) -> String {
        match self {
            TargetType::BigInt => "bigint".to_string(),
            TargetType::Identity => "bigint GENERATED BY DEFAULT AS IDENTITY".to_string(),
            TargetType::DoublePrecision => "double precision".to_string(),
            TargetType::Numeric { precision, scale } => format!("numeric({},{})", precision, scale),
            TargetType::Text => "text".to_string(),
            TargetType::Bytea => "bytea".to_string(),
            TargetType::Boolean => "boolean".to_string(),
            TargetType::Timestamp => "timestamp".to_string(),
            TargetType::TimestampTz => "timestamptz".to_string(),
            TargetType::Date => "date".to_string(),
            TargetType::Enum { type_name } => format!("\"{}\"", type_name.replace('"', "\"\"")),
        }
    }

    /// Short label used in logs and plans.
    pub fn label(&self) -> String {
        match self {
            TargetType::Identity => "bigint identity".to_string(),
            TargetType::Enum { type_name } => format!("enum {}", type_name),
            other => other.to_sql(),
        }
    }

    pub fn is_temporal(&self) -> bool {
        matches!(
            self,
            TargetType::Timestamp | TargetType::TimestampTz | TargetType::Date
        )
    }
}

/// Foreign key constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    /// Referencing columns in this table.
    pub columns: Vec<String>,

    /// Referenced table.
    pub ref_table: String,

    /// Referenced columns; empty means the referenced table's primary key.
    pub ref_columns: Vec<String>,

    /// ON DELETE action as reported by the source.
    pub on_delete: String,

    /// ON UPDATE action as reported by the source.
    pub on_update: String,
}

/// Secondary index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    pub name: String,
    pub columns: Vec<String>,
    pub is_unique: bool,
}

/// CHECK constraint body, exactly as written in the source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckConstraint {
    /// Constraint name when declared with `CONSTRAINT name`.
    pub name: Option<String>,

    /// Expression inside `CHECK ( ... )`.
    pub definition: String,

    /// Column the check was declared on, for column-level checks.
    pub column: Option<String>,
}

/// Observed value profile of a source column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnProfile {
    /// Rows where the column is not NULL.
    pub non_null: i64,
    /// Values stored as integers.
    pub integers: i64,
    /// Values stored as reals.
    pub reals: i64,
    /// Values stored as text.
    pub texts: i64,
    /// Values stored as blobs.
    pub blobs: i64,
    /// Blobs that are not valid UTF-8.
    pub binary_blobs: i64,
    /// Text values that parse as a finite number.
    pub numeric_texts: i64,
    /// Integer values equal to 0 or 1.
    pub zero_one: i64,
    /// Text values that parse as an ISO-8601 date.
    pub iso_dates: i64,
    /// Text values that parse as an ISO-8601 timestamp.
    pub iso_timestamps: i64,
    /// Timestamp-shaped values carrying a zone suffix (`Z` or `+HH:MM`).
    pub with_offset: i64,
}

impl ColumnProfile {
    /// Every non-null value is 0 or 1.
    pub fn all_zero_one(&self) -> bool {
        self.zero_one == self.non_null
    }

    /// Every non-null value is an ISO date or timestamp.
    pub fn all_iso(&self) -> bool {
        self.iso_dates + self.iso_timestamps == self.non_null
    }

    /// Every non-null value is stored as an integer.
    pub fn only_integers(&self) -> bool {
        self.integers == self.non_null
    }

    /// Every non-null value is stored as an integer or a real.
    pub fn only_numbers(&self) -> bool {
        self.integers + self.reals == self.non_null
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fk(ref_table: &str) -> ForeignKey {
        ForeignKey {
            columns: vec!["x".into()],
            ref_table: ref_table.into(),
            ref_columns: vec!["id".into()],
            on_delete: "NO ACTION".into(),
            on_update: "NO ACTION".into(),
        }
    }

    #[test]
    fn test_referenced_tables_skips_self_and_duplicates() {
        let mut table = Table::new("comments");
        table.foreign_keys = vec![fk("users"), fk("comments"), fk("Users"), fk("posts")];
        assert_eq!(table.referenced_tables(), vec!["users", "posts"]);
    }

    #[test]
    fn test_column_lookup_is_case_insensitive() {
        let mut table = Table::new("t");
        table.columns.push(Column::new("Email", "TEXT", 0));
        assert!(table.column("email").is_some());
        assert_eq!(table.column_index("EMAIL"), Some(0));
    }

    #[test]
    fn test_key_of_renders_primary_key() {
        let mut table = Table::new("t");
        table.columns = vec![Column::new("a", "TEXT", 0), Column::new("id", "INTEGER", 1)];
        table.primary_key = vec!["id".into()];
        let row = vec![SqlValue::Text("x".into()), SqlValue::I64(7)];
        assert_eq!(table.key_of(&row).as_deref(), Some("id=7"));
        assert_eq!(table.key_values(&row), vec![SqlValue::I64(7)]);

        table.primary_key.clear();
        assert_eq!(table.key_of(&row), None);
    }

    #[test]
    fn test_target_type_sql() {
        assert_eq!(TargetType::Identity.to_sql(), "bigint GENERATED BY DEFAULT AS IDENTITY");
        assert_eq!(
            TargetType::Numeric { precision: 10, scale: 2 }.to_sql(),
            "numeric(10,2)"
        );
        assert_eq!(
            TargetType::Enum { type_name: "orders_status".into() }.to_sql(),
            "\"orders_status\""
        );
    }

    #[test]
    fn test_profile_predicates() {
        let profile = ColumnProfile {
            non_null: 3,
            zero_one: 3,
            ..Default::default()
        };
        assert!(profile.all_zero_one());
        assert!(!profile.all_iso());

        let empty = ColumnProfile::default();
        assert!(empty.all_zero_one());
        assert!(empty.all_iso());
        assert!(empty.only_integers());

        let mixed = ColumnProfile {
            non_null: 3,
            integers: 1,
            reals: 1,
            texts: 1,
            ..Default::default()
        };
        assert!(!mixed.only_integers());
        assert!(!mixed.only_numbers());
    }
}
