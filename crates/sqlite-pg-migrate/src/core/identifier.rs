//! Identifier validation and quoting shared by both adapters and the translator.
//!
//! Identifiers cannot be bound as statement parameters, so every table, column,
//! type and schema name that ends up in generated SQL passes through here.
//! SQLite and PostgreSQL both use double-quoted identifiers with `""` escaping.

use crate::error::{MigrateError, Result, SchemaError};

/// PostgreSQL silently truncates identifiers longer than this many bytes.
pub const MAX_IDENTIFIER_LENGTH: usize = 63;

/// Validate an identifier coming from the source catalog or the config.
///
/// Rejects empty names, embedded null bytes and names the target would
/// truncate (two long names could collide after truncation).
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(invalid("identifier cannot be empty".to_string()));
    }

    if name.contains('\0') {
        return Err(invalid(format!(
            "identifier contains a null byte: {:?}",
            name
        )));
    }

    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(invalid(format!(
            "identifier exceeds {} bytes (got {}): {:?}",
            MAX_IDENTIFIER_LENGTH,
            name.len(),
            name
        )));
    }

    Ok(())
}

fn invalid(message: String) -> MigrateError {
    MigrateError::Schema(SchemaError::Introspection(message))
}

/// Quote an identifier with double quotes, doubling embedded quotes.
///
/// ```ignore
/// assert_eq!(quote_ident("users")?, "\"users\"");
/// assert_eq!(quote_ident("odd\"name")?, "\"odd\"\"name\"");
/// ```
pub fn quote_ident(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}

/// Qualify a PostgreSQL object name with its schema.
pub fn qualify(schema: &str, name: &str) -> Result<String> {
    Ok(format!("{}.{}", quote_ident(schema)?, quote_ident(name)?))
}

/// Quote a string literal with single quotes, doubling embedded quotes.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Validate a CHECK constraint body copied from the source.
///
/// Constraint bodies are spliced into DDL verbatim, so anything that could
/// terminate the statement or hide trailing text is rejected.
pub fn validate_check_constraint(definition: &str) -> Result<()> {
    if definition.contains(';') {
        return Err(invalid(format!(
            "check constraint contains a semicolon: {:?}",
            definition
        )));
    }

    if definition.contains("--") || definition.contains("/*") || definition.contains("*/") {
        return Err(invalid(format!(
            "check constraint contains comment markers: {:?}",
            definition
        )));
    }

    let lower = definition.to_lowercase();
    const FORBIDDEN_WORDS: &[&str] = &["select", "insert", "update", "delete", "drop", "pragma", "attach"];
    let words = lower
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty());
    for word in words {
        if FORBIDDEN_WORDS.contains(&word) {
            return Err(invalid(format!(
                "check constraint contains statement keyword '{}': {:?}",
                word, definition
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_identifier_normal() {
        assert!(validate_identifier("users").is_ok());
        assert!(validate_identifier("my_table").is_ok());
        assert!(validate_identifier("Table 123").is_ok());
    }

    #[test]
    fn test_validate_identifier_rejects_bad_names() {
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("bad\0name").is_err());
        assert!(validate_identifier(&"x".repeat(64)).is_err());
        assert!(validate_identifier(&"x".repeat(63)).is_ok());
    }

    #[test]
    fn test_quote_ident_escapes_quotes() {
        assert_eq!(quote_ident("users").unwrap(), "\"users\"");
        assert_eq!(quote_ident("odd\"name").unwrap(), "\"odd\"\"name\"");
    }

    #[test]
    fn test_qualify() {
        assert_eq!(
            qualify("public", "users").unwrap(),
            "\"public\".\"users\""
        );
    }

    #[test]
    fn test_quote_literal() {
        assert_eq!(quote_literal("it's"), "'it''s'");
    }

    #[test]
    fn test_check_constraint_accepts_ordinary_expressions() {
        assert!(validate_check_constraint("price > 0").is_ok());
        assert!(validate_check_constraint("status IN ('open', 'closed')").is_ok());
        assert!(validate_check_constraint("length(\"code\") = 3").is_ok());
        assert!(validate_check_constraint("updated_at >= created_at").is_ok());
    }

    #[test]
    fn test_check_constraint_rejects_injection_patterns() {
        assert!(validate_check_constraint("1=1; DROP TABLE users").is_err());
        assert!(validate_check_constraint("1=1 -- trailing").is_err());
        assert!(validate_check_constraint("x /* hidden */ > 0").is_err());
        assert!(validate_check_constraint("x IN (SELECT id FROM t)").is_err());
    }
}
