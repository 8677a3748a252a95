//! Core record and value types for normalized table rows.
//!
//! Every table the connector produces is a flat sequence of named columns.
//! A [`Record`] keeps those columns in schema order so that rows serialize
//! with a stable column layout regardless of which XML elements were present.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Semantic type of a table column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    String,
    Double,
    Integer,
    Timestamp,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::String => "string",
            ColumnType::Double => "double",
            ColumnType::Integer => "integer",
            ColumnType::Timestamp => "timestamp",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Represents the value held by one column of a record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum FieldValue {
    String(String),
    Int(i64),
    Float(f64),
    Timestamp(DateTime<Utc>),
    Null,
}

impl FieldValue {
    /// Coerce raw XML text into a value of the given column type.
    ///
    /// Surrounding whitespace is ignored; blank input is `Null` for every type.
    pub fn coerce(raw: &str, ty: ColumnType) -> Result<FieldValue, CoercionError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(FieldValue::Null);
        }

        let failed = || CoercionError {
            value: trimmed.to_string(),
            expected: ty,
        };

        match ty {
            ColumnType::String => Ok(FieldValue::String(trimmed.to_string())),
            ColumnType::Double => trimmed
                .parse::<f64>()
                .map(FieldValue::Float)
                .map_err(|_| failed()),
            ColumnType::Integer => trimmed
                .parse::<i64>()
                .map(FieldValue::Int)
                .map_err(|_| failed()),
            ColumnType::Timestamp => DateTime::parse_from_rfc3339(trimmed)
                .map(|ts| FieldValue::Timestamp(ts.with_timezone(&Utc)))
                .map_err(|_| failed()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Borrow the inner string, if this is a string value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::String(s) => write!(f, "{}", s),
            FieldValue::Int(i) => write!(f, "{}", i),
            FieldValue::Float(fl) => write!(f, "{}", fl),
            FieldValue::Timestamp(ts) => write!(f, "{}", ts.to_rfc3339()),
            FieldValue::Null => write!(f, "null"),
        }
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::String(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::String(value.to_string())
    }
}

impl From<Option<String>> for FieldValue {
    fn from(value: Option<String>) -> Self {
        value.map(FieldValue::String).unwrap_or(FieldValue::Null)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(value: DateTime<Utc>) -> Self {
        FieldValue::Timestamp(value)
    }
}

/// A raw value that could not be coerced to its declared column type
#[derive(Debug, Clone, PartialEq)]
pub struct CoercionError {
    pub value: String,
    pub expected: ColumnType,
}

impl fmt::Display for CoercionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cannot coerce '{}' to {}", self.value, self.expected)
    }
}

impl std::error::Error for CoercionError {}

/// One flat output row, columns in schema order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    values: IndexMap<String, FieldValue>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a record with every listed column present and null.
    pub fn with_columns<'a>(columns: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            values: columns
                .into_iter()
                .map(|name| (name.to_string(), FieldValue::Null))
                .collect(),
        }
    }

    /// Set a column, appending it if the record does not have it yet.
    pub fn set(&mut self, column: impl Into<String>, value: impl Into<FieldValue>) {
        self.values.insert(column.into(), value.into());
    }

    pub fn get(&self, column: &str) -> Option<&FieldValue> {
        self.values.get(column)
    }

    /// Get a column as a string slice; `None` for null or non-string values.
    pub fn get_str(&self, column: &str) -> Option<&str> {
        self.values.get(column).and_then(FieldValue::as_str)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(|k| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
