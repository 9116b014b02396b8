//! PostgreSQL DDL rendering.
//!
//! Everything here is pure string building over already-mapped [`Table`]s;
//! every identifier goes through [`quote_ident`]/[`qualify`].

use std::collections::HashMap;

use sha2::{Digest, Sha256};
use tracing::warn;

use crate::core::identifier::{qualify, quote_ident, quote_literal, MAX_IDENTIFIER_LENGTH};
use crate::core::schema::{ForeignKey, Index, Table, TargetType};
use crate::core::value::SqlValue;
use crate::error::Result;
use crate::typemap::parse_temporal;

use super::check::parse_literal;

/// Shorten a generated name to the identifier limit, keeping it unique by
/// appending a hash of the full name.
pub fn fit_identifier(name: &str) -> String {
    if name.len() <= MAX_IDENTIFIER_LENGTH {
        return name.to_string();
    }
    let digest = hex::encode(Sha256::digest(name.as_bytes()));
    let mut cut = MAX_IDENTIFIER_LENGTH - 9;
    while !name.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}_{}", &name[..cut], &digest[..8])
}

/// Generated name of the native enum type backing `table.column`.
pub fn enum_type_name(table: &str, column: &str) -> String {
    fit_identifier(&format!("{}_{}", table, column))
}

/// `CREATE TYPE ... AS ENUM (...)`.
pub fn create_enum_type_sql(schema: &str, type_name: &str, labels: &[String]) -> Result<String> {
    let labels: Vec<String> = labels.iter().map(|l| quote_literal(l)).collect();
    Ok(format!(
        "CREATE TYPE {} AS ENUM ({})",
        qualify(schema, type_name)?,
        labels.join(", ")
    ))
}

/// `CREATE TABLE` with columns, primary key, checks and foreign keys inline.
///
/// `checks` are complete constraint clauses (`CHECK (...)` optionally
/// prefixed by `CONSTRAINT name`). `primary_keys` maps lower-cased table
/// names to their key columns, for foreign keys that omit the column list.
pub fn create_table_sql(
    schema: &str,
    table: &Table,
    checks: &[String],
    primary_keys: &HashMap<String, Vec<String>>,
) -> Result<String> {
    let mut lines = Vec::with_capacity(table.columns.len() + checks.len() + 2);

    for column in &table.columns {
        let target = column.target();
        let mut line = format!("{} {}", quote_ident(&column.name)?, column_type_sql(schema, target)?);
        if !column.is_nullable && *target != TargetType::Identity {
            line.push_str(" NOT NULL");
        }
        if *target != TargetType::Identity {
            if let Some(expr) = column.default.as_deref() {
                match translate_default(expr, target) {
                    Some(default) => {
                        line.push_str(" DEFAULT ");
                        line.push_str(&default);
                    }
                    None => warn!(
                        "{}.{}: default {} has no PostgreSQL equivalent, dropped",
                        table.name, column.name, expr
                    ),
                }
            }
        }
        lines.push(line);
    }

    if table.has_pk() {
        lines.push(format!("PRIMARY KEY ({})", ident_list(&table.primary_key)?));
    }

    lines.extend(checks.iter().cloned());

    for fk in &table.foreign_keys {
        lines.push(foreign_key_clause(schema, fk, primary_keys)?);
    }

    Ok(format!(
        "CREATE TABLE {} (\n    {}\n)",
        qualify(schema, &table.name)?,
        lines.join(",\n    ")
    ))
}

/// Column type, with native enum types qualified by the target schema.
fn column_type_sql(schema: &str, target: &TargetType) -> Result<String> {
    match target {
        TargetType::Enum { type_name } => qualify(schema, type_name),
        other => Ok(other.to_sql()),
    }
}

fn foreign_key_clause(
    schema: &str,
    fk: &ForeignKey,
    primary_keys: &HashMap<String, Vec<String>>,
) -> Result<String> {
    let ref_columns = if fk.ref_columns.is_empty() {
        primary_keys
            .get(&fk.ref_table.to_lowercase())
            .cloned()
            .unwrap_or_default()
    } else {
        fk.ref_columns.clone()
    };

    let mut clause = format!(
        "FOREIGN KEY ({}) REFERENCES {}",
        ident_list(&fk.columns)?,
        qualify(schema, &fk.ref_table)?
    );
    if !ref_columns.is_empty() {
        clause.push_str(&format!(" ({})", ident_list(&ref_columns)?));
    }
    if let Some(action) = map_referential_action(&fk.on_delete) {
        clause.push_str(" ON DELETE ");
        clause.push_str(action);
    }
    if let Some(action) = map_referential_action(&fk.on_update) {
        clause.push_str(" ON UPDATE ");
        clause.push_str(action);
    }
    Ok(clause)
}

/// Referential action to emit, `None` for the default (NO ACTION).
fn map_referential_action(action: &str) -> Option<&'static str> {
    match action.trim().to_uppercase().replace('_', " ").as_str() {
        "CASCADE" => Some("CASCADE"),
        "SET NULL" => Some("SET NULL"),
        "SET DEFAULT" => Some("SET DEFAULT"),
        "RESTRICT" => Some("RESTRICT"),
        "" | "NO ACTION" => None,
        other => {
            warn!("unknown referential action {:?}, using NO ACTION", other);
            None
        }
    }
}

/// `CHECK (...)` clause, named when the source named it.
pub fn check_clause(name: Option<&str>, definition: &str) -> Result<String> {
    match name {
        Some(name) => Ok(format!("CONSTRAINT {} CHECK ({})", quote_ident(name)?, definition)),
        None => Ok(format!("CHECK ({})", definition)),
    }
}

/// `CHECK ("col" IN (...))` for an enumerated domain.
pub fn enum_check_clause(column: &str, values: &[SqlValue]) -> Result<String> {
    let literals: Vec<String> = values.iter().map(SqlValue::to_sql_literal).collect();
    Ok(format!(
        "CHECK ({} IN ({}))",
        quote_ident(column)?,
        literals.join(", ")
    ))
}

/// `CREATE [UNIQUE] INDEX`.
pub fn create_index_sql(schema: &str, table: &str, index: &Index) -> Result<String> {
    let unique = if index.is_unique { "UNIQUE " } else { "" };
    Ok(format!(
        "CREATE {}INDEX {} ON {} ({})",
        unique,
        quote_ident(&fit_identifier(&index.name))?,
        qualify(schema, table)?,
        ident_list(&index.columns)?
    ))
}

/// Move an identity column's sequence past the highest loaded value.
///
/// On an empty table the next generated value is 1.
pub fn reset_identity_sql(schema: &str, table: &str, column: &str) -> Result<String> {
    let qualified = qualify(schema, table)?;
    let col = quote_ident(column)?;
    Ok(format!(
        "SELECT setval(pg_get_serial_sequence({}, {}), COALESCE(MAX({}), 1), MAX({}) IS NOT NULL) FROM {}",
        quote_literal(&qualified),
        quote_literal(column),
        col,
        col,
        qualified
    ))
}

pub fn drop_table_sql(schema: &str, table: &str) -> Result<String> {
    Ok(format!("DROP TABLE IF EXISTS {}", qualify(schema, table)?))
}

pub fn drop_type_sql(schema: &str, type_name: &str) -> Result<String> {
    Ok(format!("DROP TYPE IF EXISTS {}", qualify(schema, type_name)?))
}

fn ident_list(names: &[String]) -> Result<String> {
    let quoted: Result<Vec<String>> = names.iter().map(|n| quote_ident(n)).collect();
    Ok(quoted?.join(", "))
}

/// Translate a SQLite default expression for a column of type `target`.
///
/// Returns `None` when the expression has no safe PostgreSQL counterpart;
/// the column is then created without a default.
pub fn translate_default(expr: &str, target: &TargetType) -> Option<String> {
    let trimmed = strip_parens(expr.trim());
    let lower = trimmed.to_lowercase();
    let compact: String = lower.chars().filter(|c| !c.is_whitespace()).collect();

    match compact.as_str() {
        "current_timestamp" | "datetime('now')" | "now()" => return Some("CURRENT_TIMESTAMP".into()),
        "current_date" | "date('now')" => return Some("CURRENT_DATE".into()),
        "current_time" | "time('now')" => {
            return match target {
                TargetType::Text => Some("CURRENT_TIME".into()),
                _ => None,
            }
        }
        _ => {}
    }

    let value = parse_literal(trimmed)?;
    match (target, value) {
        (_, SqlValue::Null) => None,

        (TargetType::Boolean, SqlValue::I64(0)) => Some("false".into()),
        (TargetType::Boolean, SqlValue::I64(1)) => Some("true".into()),
        (TargetType::Boolean, SqlValue::Text(s)) => match s.to_lowercase().as_str() {
            "0" | "f" | "false" => Some("false".into()),
            "1" | "t" | "true" => Some("true".into()),
            _ => None,
        },
        (TargetType::Boolean, _) => None,

        (TargetType::BigInt | TargetType::Identity, SqlValue::I64(n)) => Some(n.to_string()),
        (TargetType::BigInt | TargetType::Identity, SqlValue::Text(s)) => {
            s.trim().parse::<i64>().ok().map(|n| n.to_string())
        }
        (TargetType::DoublePrecision | TargetType::Numeric { .. }, SqlValue::I64(n)) => {
            Some(n.to_string())
        }
        (TargetType::DoublePrecision | TargetType::Numeric { .. }, SqlValue::F64(f))
            if f.is_finite() =>
        {
            Some(f.to_string())
        }
        (TargetType::DoublePrecision | TargetType::Numeric { .. }, SqlValue::Text(s)) => {
            s.trim().parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f.to_string())
        }

        (TargetType::Text | TargetType::Enum { .. }, SqlValue::Text(s)) => Some(quote_literal(&s)),
        (TargetType::Text, SqlValue::I64(n)) => Some(quote_literal(&n.to_string())),
        (TargetType::Text, SqlValue::F64(f)) => Some(quote_literal(&f.to_string())),

        (TargetType::Timestamp | TargetType::TimestampTz | TargetType::Date, SqlValue::Text(s)) => {
            parse_temporal(&s).map(|_| quote_literal(&s))
        }

        (TargetType::Bytea, SqlValue::Bytes(b)) => Some(SqlValue::Bytes(b).to_sql_literal()),
        (TargetType::Bytea, SqlValue::Text(s)) => {
            Some(SqlValue::Bytes(s.into_bytes()).to_sql_literal())
        }

        _ => None,
    }
}

fn strip_parens(mut s: &str) -> &str {
    while s.starts_with('(') && s.ends_with(')') && s.len() >= 2 {
        let inner = &s[1..s.len() - 1];
        // Only strip when the outer pair actually encloses everything.
        let mut depth = 0i32;
        let balanced = inner.chars().all(|c| {
            match c {
                '(' => depth += 1,
                ')' => depth -= 1,
                _ => {}
            }
            depth >= 0
        });
        if !balanced || depth != 0 {
            break;
        }
        s = inner.trim();
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::Column;

    fn column(name: &str, target: TargetType, nullable: bool) -> Column {
        let mut c = Column::new(name, "", 0);
        c.target_type = Some(target);
        c.is_nullable = nullable;
        c
    }

    #[test]
    fn test_create_table_with_identity_fk_and_check() {
        let mut table = Table::new("sessions");
        let mut id = column("id", TargetType::Identity, false);
        id.pk_position = 1;
        table.columns = vec![
            id,
            column("user_id", TargetType::BigInt, false),
            column("status", TargetType::Text, true),
        ];
        table.primary_key = vec!["id".into()];
        table.foreign_keys = vec![ForeignKey {
            columns: vec!["user_id".into()],
            ref_table: "users".into(),
            ref_columns: vec![],
            on_delete: "CASCADE".into(),
            on_update: "NO ACTION".into(),
        }];
        let mut pks = HashMap::new();
        pks.insert("users".to_string(), vec!["id".to_string()]);
        let checks = vec![enum_check_clause(
            "status",
            &[SqlValue::Text("open".into()), SqlValue::Text("closed".into())],
        )
        .unwrap()];

        let sql = create_table_sql("public", &table, &checks, &pks).unwrap();
        assert_eq!(
            sql,
            "CREATE TABLE \"public\".\"sessions\" (\n    \
             \"id\" bigint GENERATED BY DEFAULT AS IDENTITY,\n    \
             \"user_id\" bigint NOT NULL,\n    \
             \"status\" text,\n    \
             PRIMARY KEY (\"id\"),\n    \
             CHECK (\"status\" IN ('open', 'closed')),\n    \
             FOREIGN KEY (\"user_id\") REFERENCES \"public\".\"users\" (\"id\") ON DELETE CASCADE\n)"
        );
    }

    #[test]
    fn test_defaults() {
        assert_eq!(
            translate_default("CURRENT_TIMESTAMP", &TargetType::Timestamp).as_deref(),
            Some("CURRENT_TIMESTAMP")
        );
        assert_eq!(
            translate_default("(datetime('now'))", &TargetType::TimestampTz).as_deref(),
            Some("CURRENT_TIMESTAMP")
        );
        assert_eq!(translate_default("1", &TargetType::Boolean).as_deref(), Some("true"));
        assert_eq!(translate_default("'0'", &TargetType::Boolean).as_deref(), Some("false"));
        assert_eq!(translate_default("-3", &TargetType::BigInt).as_deref(), Some("-3"));
        assert_eq!(
            translate_default("'it''s'", &TargetType::Text).as_deref(),
            Some("'it''s'")
        );
        assert_eq!(translate_default("NULL", &TargetType::Text), None);
        assert_eq!(translate_default("strftime('%s','now')", &TargetType::BigInt), None);
        assert_eq!(translate_default("'abc'", &TargetType::BigInt), None);
    }

    #[test]
    fn test_index_and_sequence_sql() {
        let index = Index {
            name: "idx_users_email".into(),
            columns: vec!["email".into()],
            is_unique: true,
        };
        assert_eq!(
            create_index_sql("public", "users", &index).unwrap(),
            "CREATE UNIQUE INDEX \"idx_users_email\" ON \"public\".\"users\" (\"email\")"
        );
        assert_eq!(
            reset_identity_sql("public", "users", "id").unwrap(),
            "SELECT setval(pg_get_serial_sequence('\"public\".\"users\"', 'id'), \
             COALESCE(MAX(\"id\"), 1), MAX(\"id\") IS NOT NULL) FROM \"public\".\"users\""
        );
    }

    #[test]
    fn test_fit_identifier() {
        assert_eq!(fit_identifier("short"), "short");
        let long = "t".repeat(40) + "_" + &"c".repeat(40);
        let fitted = fit_identifier(&long);
        assert_eq!(fitted.len(), MAX_IDENTIFIER_LENGTH);
        assert_ne!(fitted, fit_identifier(&(long.clone() + "x")));
    }

    #[test]
    fn test_enum_type_sql() {
        let sql = create_enum_type_sql("public", "orders_status", &["new".into(), "paid".into()]);
        assert_eq!(
            sql.unwrap(),
            "CREATE TYPE \"public\".\"orders_status\" AS ENUM ('new', 'paid')"
        );
    }
}
