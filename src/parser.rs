//! Raw record parsing.
//!
//! Each input line is one JSON document. Only JSON objects become a
//! [`FieldMap`]; anything else is a [`ParseError`]. Parse failures are
//! recoverable: the caller skips the line and keeps going.

use serde_json::{Map, Value};
use std::fmt;

/// Parsed key→value view of one event, used only for validation.
pub type FieldMap = Map<String, Value>;

/// A record whose syntax could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub message: String,
}

impl ParseError {
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed record: {}", self.message)
    }
}

impl std::error::Error for ParseError {}

/// Returns `true` for lines that carry no record at all.
#[must_use]
pub fn is_blank(line: &str) -> bool {
    line.trim().is_empty()
}

/// Parse one raw input line into a [`FieldMap`].
///
/// # Errors
/// Returns a [`ParseError`] if the line is not valid JSON or is valid JSON but
/// not an object.
pub fn parse_record(line: &str) -> Result<FieldMap, ParseError> {
    match serde_json::from_str::<Value>(line) {
        Ok(Value::Object(fields)) => Ok(fields),
        Ok(other) => Err(ParseError::new(format!(
            "expected a JSON object, found {}",
            json_kind(&other)
        ))),
        Err(e) => Err(ParseError::new(e.to_string())),
    }
}

/// Short JSON type name used in diagnostics.
pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "float",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
