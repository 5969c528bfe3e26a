//! The database round-trip seam every other stage talks through.

#[cfg(feature = "db")]
/// diesel-backed `PostgreSQL` session.
pub mod pg;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::SessionError;

/// One result row, keyed by column name.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct Row(Map<String, Value>);

impl Row {
    /// Build a row from a JSON object. Non-object values produce an empty row.
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Object(map) => Row(map),
            _ => Row::default(),
        }
    }

    /// Raw column value.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.0.get(column)
    }

    /// Column as text; numbers and booleans are rendered, `NULL` is `None`.
    pub fn text(&self, column: &str) -> Option<String> {
        match self.get(column)? {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    /// Column as a boolean.
    pub fn boolean(&self, column: &str) -> Option<bool> {
        match self.get(column)? {
            Value::Bool(b) => Some(*b),
            Value::String(s) => match s.as_str() {
                "t" | "true" | "on" => Some(true),
                "f" | "false" | "off" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    /// Column as an integer.
    pub fn integer(&self, column: &str) -> Option<i64> {
        match self.get(column)? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Column as a list of strings (a JSON array of text).
    pub fn text_list(&self, column: &str) -> Option<Vec<String>> {
        match self.get(column)? {
            Value::Array(items) => items
                .iter()
                .map(|item| item.as_str().map(ToString::to_string))
                .collect(),
            Value::Null => Some(Vec::new()),
            _ => None,
        }
    }
}

/// Synchronous, ordered access to the target server.
///
/// Statements are standalone and executed in submission order. No
/// multi-statement transaction is ever requested.
pub trait Session {
    /// Run a statement that returns no rows.
    fn execute(&mut self, sql: &str) -> Result<(), SessionError>;

    /// Run a single `SELECT` and return its rows.
    fn query(&mut self, sql: &str) -> Result<Vec<Row>, SessionError>;

    /// Release the connection. Later calls are errors.
    fn close(&mut self);
}

/// Single-quote a value as a SQL string literal.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
