//! Literal and identifier quoting shared by every generated filter.
//!
//! Every value that ends up in a subset string goes through this module.
//! Output must stay byte-for-byte stable: hosts and tests compare filters as
//! plain text.

use regex_lite::Regex;
use serde_json::Value;
use std::fmt;
use std::sync::OnceLock;

/// A value destined for a SQL or expression literal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SqlValue {
    /// Written bare.
    Integer(i64),
    /// Written single-quoted, even when it looks numeric.
    Text(String),
}

impl SqlValue {
    /// Convert an attribute value. Only JSON integers stay numeric; `null`
    /// has no literal form.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Number(n) => Some(match (n.as_i64(), n.as_u64()) {
                (Some(i), _) => Self::Integer(i),
                (None, Some(u)) => i64::try_from(u)
                    .map(Self::Integer)
                    .unwrap_or_else(|_| Self::Text(u.to_string())),
                (None, None) => Self::Text(n.to_string()),
            }),
            Value::String(s) => Some(Self::Text(s.clone())),
            other => Some(Self::Text(other.to_string())),
        }
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&quote_sql_literal(self))
    }
}

/// Single-quote a string literal.
pub fn quote_string(text: &str) -> String {
    let escaped = text
        .replace('\'', "''")
        .replace('\\', "\\\\")
        .replace('\n', "\\n")
        .replace('\t', "\\t");
    format!("'{escaped}'")
}

/// Literal form of a value: bare integer or quoted text.
pub fn quote_sql_literal(value: &SqlValue) -> String {
    match value {
        SqlValue::Integer(i) => i.to_string(),
        SqlValue::Text(s) => quote_string(s),
    }
}

/// Double-quote an attribute or table name.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// `"attr" = 'value'`
pub fn field_equality(attribute: &str, value: &str) -> String {
    format!("{} = {}", quote_identifier(attribute), quote_string(value))
}

/// `"attr" IN ( v1 , v2 , ... )`, values in input order.
pub fn format_in_list(attribute: &str, values: &[SqlValue]) -> String {
    let values = values
        .iter()
        .map(quote_sql_literal)
        .collect::<Vec<_>>()
        .join(" , ");
    format!("{} IN ( {values} )", quote_identifier(attribute))
}

fn is_subquery(table: &str) -> bool {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?i)^\s*\(\s*SELECT\b").ok())
        .as_ref()
        .is_some_and(|re| re.is_match(table))
}

/// `"schema"."table"`, `"table"` without schema, or the table text untouched
/// when it is already a parenthesized `SELECT`.
pub fn format_table_reference(schema: &str, table: &str) -> String {
    if is_subquery(table) {
        return table.to_string();
    }
    if schema.is_empty() {
        quote_identifier(table)
    } else {
        format!("{}.{}", quote_identifier(schema), quote_identifier(table))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn in_list_integers_are_bare() {
        let values: Vec<SqlValue> = vec![1.into(), 2.into(), 3.into()];
        assert_eq!(format_in_list("code", &values), r#""code" IN ( 1 , 2 , 3 )"#);
    }

    #[test]
    fn in_list_numeric_strings_stay_quoted() {
        let values: Vec<SqlValue> = vec!["1".into(), "2".into(), "3".into()];
        assert_eq!(format_in_list("code", &values), r#""code" IN ( '1' , '2' , '3' )"#);
    }

    #[test]
    fn in_list_strings() {
        let values: Vec<SqlValue> = vec!["a".into(), "b".into(), "c".into()];
        assert_eq!(format_in_list("code", &values), r#""code" IN ( 'a' , 'b' , 'c' )"#);
    }

    #[test]
    fn quotes_are_escaped() {
        assert_eq!(quote_string("O'Neil"), "'O''Neil'");
        assert_eq!(quote_string("a\\b"), r"'a\\b'");
        assert_eq!(quote_string("a\nb\tc"), r"'a\nb\tc'");
        assert_eq!(quote_identifier(r#"we"ird"#), r#""we""ird""#);
    }

    #[test]
    fn injection_stays_inside_the_literal() {
        assert_eq!(
            field_equality("owner", "x' OR '1'='1"),
            r#""owner" = 'x'' OR ''1''=''1'"#
        );
    }

    #[test]
    fn json_values() {
        assert_eq!(SqlValue::from_json(&json!(4)), Some(SqlValue::Integer(4)));
        assert_eq!(SqlValue::from_json(&json!("4")), Some(SqlValue::Text("4".into())));
        assert_eq!(SqlValue::from_json(&json!(1.5)), Some(SqlValue::Text("1.5".into())));
        assert_eq!(SqlValue::from_json(&Value::Null), None);
    }

    #[test]
    fn table_reference() {
        assert_eq!(format_table_reference("public", "roads"), r#""public"."roads""#);
        assert_eq!(format_table_reference("", "roads"), r#""roads""#);
        assert_eq!(
            format_table_reference("", r#"(SELECT * FROM "public"."roads")"#),
            r#"(SELECT * FROM "public"."roads")"#
        );
        assert_eq!(
            format_table_reference("public", "( select id from roads )"),
            "( select id from roads )"
        );
    }
}
