//! CHECK constraint extraction from SQLite `CREATE TABLE` statements.
//!
//! SQLite keeps no structured catalog of CHECK constraints, only the original
//! statement text. A small tokenizer walks the column list, finds every
//! `CHECK ( ... )` and re-renders its body with PostgreSQL identifier quoting.
//! [`parse_enum`] then recognizes the `col IN (lit, ...)` pattern.

use serde::Serialize;

use crate::core::schema::CheckConstraint;
use crate::core::value::SqlValue;
use crate::error::{MigrateError, Result, SchemaError};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    /// Bare word; may be a keyword.
    Word(String),
    /// Quoted identifier (`"x"`, `` `x` `` or `[x]`).
    Quoted(String),
    /// Single-quoted string literal, unescaped.
    Str(String),
    /// Numeric literal as written.
    Num(String),
    /// Blob literal `X'..'`, hex digits as written.
    Blob(String),
    /// Operator or punctuation.
    Op(String),
}

impl Token {
    fn is_keyword(&self, kw: &str) -> bool {
        matches!(self, Token::Word(w) if w.eq_ignore_ascii_case(kw))
    }

    fn is_op(&self, op: &str) -> bool {
        matches!(self, Token::Op(o) if o == op)
    }

    fn name(&self) -> Option<&str> {
        match self {
            Token::Word(w) | Token::Quoted(w) => Some(w),
            _ => None,
        }
    }
}

fn malformed(message: impl Into<String>) -> MigrateError {
    MigrateError::Schema(SchemaError::Introspection(message.into()))
}

fn tokenize(sql: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = sql.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    let read_until = |start: usize, close: char| -> Result<(String, usize)> {
        let mut out = String::new();
        let mut j = start;
        while j < chars.len() {
            if chars[j] == close {
                // Doubled closing character is an escaped literal character.
                if close != ']' && j + 1 < chars.len() && chars[j + 1] == close {
                    out.push(close);
                    j += 2;
                    continue;
                }
                return Ok((out, j + 1));
            }
            out.push(chars[j]);
            j += 1;
        }
        Err(malformed(format!("unterminated {} in table definition", close)))
    };

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '-' if chars.get(i + 1) == Some(&'-') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                i += 2;
                while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                    i += 1;
                }
                i += 2;
            }
            '\'' => {
                let (s, next) = read_until(i + 1, '\'')?;
                tokens.push(Token::Str(s));
                i = next;
            }
            '"' | '`' => {
                let (s, next) = read_until(i + 1, c)?;
                tokens.push(Token::Quoted(s));
                i = next;
            }
            '[' => {
                let (s, next) = read_until(i + 1, ']')?;
                tokens.push(Token::Quoted(s));
                i = next;
            }
            c if (c == 'x' || c == 'X') && chars.get(i + 1) == Some(&'\'') => {
                let (s, next) = read_until(i + 2, '\'')?;
                tokens.push(Token::Blob(s));
                i = next;
            }
            c if c.is_ascii_digit()
                || (c == '.' && chars.get(i + 1).is_some_and(|d| d.is_ascii_digit())) =>
            {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_ascii_alphanumeric()
                        || chars[i] == '.'
                        || ((chars[i] == '+' || chars[i] == '-')
                            && matches!(chars[i - 1], 'e' | 'E')))
                {
                    i += 1;
                }
                tokens.push(Token::Num(chars[start..i].iter().collect()));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '$') {
                    i += 1;
                }
                tokens.push(Token::Word(chars[start..i].iter().collect()));
            }
            _ => {
                let two: String = chars[i..(i + 2).min(chars.len())].iter().collect();
                let op = match two.as_str() {
                    "<=" | ">=" | "<>" | "!=" | "==" | "||" | "<<" | ">>" => {
                        i += 2;
                        two
                    }
                    _ => {
                        i += 1;
                        c.to_string()
                    }
                };
                tokens.push(Token::Op(op));
            }
        }
    }

    Ok(tokens)
}

/// Words after which `(` opens a sub-expression rather than an argument list.
const SPACED_KEYWORDS: &[&str] = &[
    "and", "or", "not", "in", "is", "between", "like", "glob", "case", "when", "then", "else",
    "exists", "check",
];

/// Render tokens back to SQL using PostgreSQL quoting.
fn render(tokens: &[Token]) -> String {
    let mut out = String::new();
    let mut prev: Option<&Token> = None;
    for tok in tokens {
        let text = match tok {
            Token::Word(w) => w.clone(),
            Token::Quoted(q) => format!("\"{}\"", q.replace('"', "\"\"")),
            Token::Str(s) => format!("'{}'", s.replace('\'', "''")),
            Token::Num(n) => n.clone(),
            Token::Blob(b) => format!("'\\x{}'::bytea", b),
            Token::Op(o) if o == "==" => "=".to_string(),
            Token::Op(o) => o.clone(),
        };

        let space = match (prev, tok) {
            (None, _) => false,
            (Some(p), _) if p.is_op("(") => false,
            (_, t) if t.is_op(")") || t.is_op(",") => false,
            (Some(Token::Word(w)), t) if t.is_op("(") => {
                SPACED_KEYWORDS.contains(&w.to_lowercase().as_str())
            }
            _ => true,
        };
        if space {
            out.push(' ');
        }
        out.push_str(&text);
        prev = Some(tok);
    }
    out
}

/// Index of the `)` matching the `(` at `open`.
fn matching_paren(tokens: &[Token], open: usize) -> Result<usize> {
    let mut depth = 0usize;
    for (i, tok) in tokens.iter().enumerate().skip(open) {
        if tok.is_op("(") {
            depth += 1;
        } else if tok.is_op(")") {
            depth -= 1;
            if depth == 0 {
                return Ok(i);
            }
        }
    }
    Err(malformed("unbalanced parentheses in table definition"))
}

/// Split a token range on top-level commas.
fn split_top_level(tokens: &[Token]) -> Vec<&[Token]> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, tok) in tokens.iter().enumerate() {
        if tok.is_op("(") {
            depth += 1;
        } else if tok.is_op(")") {
            depth -= 1;
        } else if tok.is_op(",") && depth == 0 {
            parts.push(&tokens[start..i]);
            start = i + 1;
        }
    }
    if start < tokens.len() {
        parts.push(&tokens[start..]);
    }
    parts
}

const TABLE_CONSTRAINT_KEYWORDS: &[&str] = &["constraint", "primary", "unique", "check", "foreign"];

/// Extract every CHECK constraint from a `CREATE TABLE` statement.
pub fn extract_checks(create_sql: &str) -> Result<Vec<CheckConstraint>> {
    let tokens = tokenize(create_sql)?;
    let Some(open) = tokens.iter().position(|t| t.is_op("(")) else {
        // CREATE TABLE ... AS SELECT has no column list.
        return Ok(Vec::new());
    };
    let close = matching_paren(&tokens, open)?;

    let mut checks = Vec::new();
    for def in split_top_level(&tokens[open + 1..close]) {
        let Some(first) = def.first() else { continue };
        let is_table_constraint = matches!(first, Token::Word(w)
            if TABLE_CONSTRAINT_KEYWORDS.contains(&w.to_lowercase().as_str()));
        let column = if is_table_constraint {
            None
        } else {
            first.name().map(str::to_string)
        };

        let mut i = if is_table_constraint { 0 } else { 1 };
        let mut pending_name: Option<String> = None;
        while i < def.len() {
            let tok = &def[i];
            if tok.is_op("(") {
                i = matching_paren(def, i)? + 1;
                continue;
            }
            if tok.is_keyword("constraint") {
                pending_name = def.get(i + 1).and_then(Token::name).map(str::to_string);
                i += 2;
                continue;
            }
            if tok.is_keyword("check") && def.get(i + 1).is_some_and(|t| t.is_op("(")) {
                let end = matching_paren(def, i + 1)?;
                checks.push(CheckConstraint {
                    name: pending_name.take(),
                    definition: render(&def[i + 2..end]),
                    column: column.clone(),
                });
                i = end + 1;
                continue;
            }
            i += 1;
        }
    }

    Ok(checks)
}

/// A `col IN (v1, v2, ...)` constraint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnumCheck {
    pub column: String,
    pub values: Vec<SqlValue>,
}

impl EnumCheck {
    /// Whether the allowed set is exactly the integers 0 and 1.
    pub fn is_boolean(&self) -> bool {
        self.values.len() == 2
            && self.values.contains(&SqlValue::I64(0))
            && self.values.contains(&SqlValue::I64(1))
    }

    /// Whether every allowed value is a string.
    pub fn is_textual(&self) -> bool {
        self.values.iter().all(|v| matches!(v, SqlValue::Text(_)))
    }

    /// The allowed values as strings, in declaration order.
    pub fn labels(&self) -> Vec<String> {
        self.values
            .iter()
            .map(|v| match v {
                SqlValue::Text(s) => s.clone(),
                other => other.to_string(),
            })
            .collect()
    }
}

/// Recognize `col IN (literal, ...)`, optionally wrapped in parentheses.
pub fn parse_enum(definition: &str) -> Option<EnumCheck> {
    let tokens = tokenize(definition).ok()?;
    let mut body: &[Token] = &tokens;
    while body.len() >= 2
        && body[0].is_op("(")
        && matching_paren(body, 0).ok() == Some(body.len() - 1)
    {
        body = &body[1..body.len() - 1];
    }

    let column = body.first()?.name()?.to_string();
    if !body.get(1)?.is_keyword("in") || !body.get(2)?.is_op("(") {
        return None;
    }
    if matching_paren(body, 2).ok()? != body.len() - 1 {
        return None;
    }

    let mut values = Vec::new();
    for item in split_top_level(&body[3..body.len() - 1]) {
        let value = match item {
            [Token::Str(s)] => SqlValue::Text(s.clone()),
            [Token::Num(n)] => parse_number(n, false)?,
            [Token::Op(sign), Token::Num(n)] if sign == "-" => parse_number(n, true)?,
            _ => return None,
        };
        values.push(value);
    }
    if values.is_empty() {
        return None;
    }
    Some(EnumCheck { column, values })
}

/// Parse a lone literal (`'text'`, `42`, `-1.5`, `X'00ff'`, `NULL`),
/// ignoring wrapping parentheses.
pub fn parse_literal(expr: &str) -> Option<SqlValue> {
    let tokens = tokenize(expr).ok()?;
    let mut body: &[Token] = &tokens;
    while body.len() >= 2 && body[0].is_op("(") && body[body.len() - 1].is_op(")") {
        body = &body[1..body.len() - 1];
    }
    match body {
        [Token::Str(s)] => Some(SqlValue::Text(s.clone())),
        [Token::Num(n)] => parse_number(n, false),
        [Token::Op(sign), Token::Num(n)] if sign == "-" => parse_number(n, true),
        [Token::Op(sign), Token::Num(n)] if sign == "+" => parse_number(n, false),
        [Token::Blob(hex_digits)] => hex::decode(hex_digits).ok().map(SqlValue::Bytes),
        [Token::Word(w)] if w.eq_ignore_ascii_case("null") => Some(SqlValue::Null),
        [Token::Word(w)] if w.eq_ignore_ascii_case("true") => Some(SqlValue::I64(1)),
        [Token::Word(w)] if w.eq_ignore_ascii_case("false") => Some(SqlValue::I64(0)),
        _ => None,
    }
}

/// Lower-cased bare words and quoted identifiers appearing in an expression.
pub fn referenced_names(definition: &str) -> Vec<String> {
    tokenize(definition)
        .map(|tokens| {
            tokens
                .iter()
                .filter_map(Token::name)
                .map(str::to_lowercase)
                .collect()
        })
        .unwrap_or_default()
}

fn parse_number(text: &str, negative: bool) -> Option<SqlValue> {
    let text = if negative {
        format!("-{}", text)
    } else {
        text.to_string()
    };
    if let Ok(n) = text.parse::<i64>() {
        return Some(SqlValue::I64(n));
    }
    text.parse::<f64>().ok().map(SqlValue::F64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_column_and_table_checks() {
        let sql = r#"CREATE TABLE orders (
            id INTEGER PRIMARY KEY,
            status TEXT NOT NULL DEFAULT 'new' CHECK (status IN ('new', 'paid', 'shipped')),
            qty INTEGER CHECK(qty > 0),
            [total] REAL,
            CONSTRAINT total_positive CHECK ([total] >= 0)
        )"#;
        let checks = extract_checks(sql).unwrap();
        assert_eq!(checks.len(), 3);

        assert_eq!(checks[0].column.as_deref(), Some("status"));
        assert_eq!(checks[0].definition, "status IN ('new', 'paid', 'shipped')");
        assert_eq!(checks[1].definition, "qty > 0");
        assert_eq!(checks[2].name.as_deref(), Some("total_positive"));
        assert_eq!(checks[2].column, None);
        assert_eq!(checks[2].definition, "\"total\" >= 0");
    }

    #[test]
    fn test_extract_ignores_parens_in_defaults_and_comments() {
        let sql = "CREATE TABLE t (\n  -- CHECK (fake > 0)\n  a TEXT DEFAULT (datetime('now')),\n  b INT /* CHECK (also fake) */ CHECK (b == 1 OR b IS NULL)\n)";
        let checks = extract_checks(sql).unwrap();
        assert_eq!(checks.len(), 1);
        assert_eq!(checks[0].column.as_deref(), Some("b"));
        assert_eq!(checks[0].definition, "b = 1 OR b IS NULL");
    }

    #[test]
    fn test_extract_keeps_function_call_spacing() {
        let sql = "CREATE TABLE t (code TEXT CHECK (length(code) = 3 AND code NOT IN ('xxx')))";
        let checks = extract_checks(sql).unwrap();
        assert_eq!(checks[0].definition, "length(code) = 3 AND code NOT IN ('xxx')");
    }

    #[test]
    fn test_extract_without_column_list() {
        assert!(extract_checks("CREATE TABLE t AS SELECT 1").unwrap().is_empty());
    }

    #[test]
    fn test_unbalanced_definition_is_error() {
        assert!(extract_checks("CREATE TABLE t (a INT CHECK (a > 0)").is_err());
    }

    #[test]
    fn test_parse_enum_text_values() {
        let e = parse_enum("status IN ('new', 'paid', 'it''s')").unwrap();
        assert_eq!(e.column, "status");
        assert_eq!(e.labels(), vec!["new", "paid", "it's"]);
        assert!(e.is_textual());
        assert!(!e.is_boolean());
    }

    #[test]
    fn test_parse_enum_boolean_and_wrapped() {
        let e = parse_enum("((\"active\" IN (0, 1)))").unwrap();
        assert_eq!(e.column, "active");
        assert!(e.is_boolean());

        let e = parse_enum("level IN (-1, 0, 2)").unwrap();
        assert_eq!(e.values, vec![SqlValue::I64(-1), SqlValue::I64(0), SqlValue::I64(2)]);
    }

    #[test]
    fn test_parse_literal() {
        assert_eq!(parse_literal("'abc'"), Some(SqlValue::Text("abc".into())));
        assert_eq!(parse_literal("(0)"), Some(SqlValue::I64(0)));
        assert_eq!(parse_literal("-2.5"), Some(SqlValue::F64(-2.5)));
        assert_eq!(parse_literal("X'0aff'"), Some(SqlValue::Bytes(vec![0x0a, 0xff])));
        assert_eq!(parse_literal("NULL"), Some(SqlValue::Null));
        assert_eq!(parse_literal("datetime('now')"), None);
    }

    #[test]
    fn test_referenced_names() {
        let names = referenced_names("\"Flag\" = 1 OR qty > 0");
        assert_eq!(names, vec!["flag", "or", "qty"]);
    }

    #[test]
    fn test_parse_enum_rejects_other_shapes() {
        assert!(parse_enum("qty > 0").is_none());
        assert!(parse_enum("status IN ('a') OR status IS NULL").is_none());
        assert!(parse_enum("status NOT IN ('a')").is_none());
        assert!(parse_enum("status IN (lower('A'))").is_none());
    }
}
