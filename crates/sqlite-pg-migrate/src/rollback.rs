//! Rollback script generation.
//!
//! The script drops only what this run created: tables in reverse creation
//! order, then the enum types. It is written to disk and never executed.

use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::info;

use crate::error::Result;
use crate::translate::ddl::{drop_table_sql, drop_type_sql};

/// Build the reversing statements.
///
/// `tables` are in creation order; `enum_types` are the types created for
/// those tables.
pub fn rollback_statements(schema: &str, tables: &[&str], enum_types: &[String]) -> Result<Vec<String>> {
    let mut out = Vec::with_capacity(tables.len() + enum_types.len());
    for table in tables.iter().rev() {
        out.push(drop_table_sql(schema, table)?);
    }
    for type_name in enum_types.iter().rev() {
        out.push(drop_type_sql(schema, type_name)?);
    }
    Ok(out)
}

/// Write `rollback_<run-id>.sql` into `dir`.
pub fn write_rollback_script(
    dir: &Path,
    run_id: &str,
    schema: &str,
    tables: &[&str],
    enum_types: &[String],
) -> Result<PathBuf> {
    let statements = rollback_statements(schema, tables, enum_types)?;
    let mut script = format!(
        "-- Rollback for migration run {}\n-- Generated {}\n-- Review before running; this file is never executed automatically.\n\nBEGIN;\n",
        run_id,
        Utc::now().to_rfc3339()
    );
    for statement in &statements {
        script.push_str(statement);
        script.push_str(";\n");
    }
    script.push_str("COMMIT;\n");

    let path = dir.join(format!("rollback_{}.sql", run_id));
    std::fs::write(&path, script)?;
    info!("Wrote rollback script {} ({} statements)", path.display(), statements.len());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statements_reverse_creation_order() {
        let stmts = rollback_statements("public", &["users", "sessions"], &["sessions_kind".into()]).unwrap();
        assert_eq!(
            stmts,
            vec![
                "DROP TABLE IF EXISTS \"public\".\"sessions\"",
                "DROP TABLE IF EXISTS \"public\".\"users\"",
                "DROP TYPE IF EXISTS \"public\".\"sessions_kind\"",
            ]
        );
    }

    #[test]
    fn test_script_written_with_run_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_rollback_script(dir.path(), "abc", "public", &["users"], &[]).unwrap();
        assert_eq!(path.file_name().unwrap(), "rollback_abc.sql");
        let content = std::fs::read_to_string(path).unwrap();
        assert!(content.contains("DROP TABLE IF EXISTS \"public\".\"users\";"));
        assert!(content.trim_end().ends_with("COMMIT;"));
    }
}
