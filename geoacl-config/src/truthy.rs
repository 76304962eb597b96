//! Boolean coercion for header values, query parameters and config fields.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Tokens accepted as `true`, compared case-insensitively.
pub const TRUTHY_TOKENS: [&str; 5] = ["yes", "true", "y", "t", "1"];

/// Parse a textual flag. Anything outside [`TRUTHY_TOKENS`] is `false`.
pub fn to_bool(value: &str) -> bool {
    let value = value.trim();
    TRUTHY_TOKENS
        .iter()
        .any(|token| token.eq_ignore_ascii_case(value))
}

/// Coerce a JSON config value the same way: strings go through [`to_bool`],
/// numbers are true when non-zero, `null` is false.
pub fn value_to_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => to_bool(s),
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::Null => false,
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Serde adapter for fields written as `true`, `"True"`, `"yes"`, `1`...
pub(crate) fn bool_like<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(value_to_bool(&value))
}
