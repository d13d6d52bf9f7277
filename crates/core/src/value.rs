//! Column values for records.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use time::OffsetDateTime;

use crate::schema::ColumnKind;

/// Column values of a record keyed by column name.
pub type Values = BTreeMap<String, Value>;

/// A single column value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Json(serde_json::Value),
    #[serde(with = "time::serde::rfc3339")]
    Timestamp(OffsetDateTime),
}

impl Value {
    /// Whether the value can be stored in a column of the given kind.
    ///
    /// `Null` fits every kind; nullability is enforced by the database.
    /// Integers are accepted for float columns.
    pub fn fits(&self, kind: ColumnKind) -> bool {
        matches!(
            (self, kind),
            (Value::Null, _)
                | (Value::Bool(_), ColumnKind::Boolean)
                | (Value::Integer(_), ColumnKind::Integer | ColumnKind::Float)
                | (Value::Float(_), ColumnKind::Float)
                | (Value::Text(_), ColumnKind::Text)
                | (Value::Bytes(_), ColumnKind::Bytes)
                | (Value::Json(_), ColumnKind::Json)
                | (Value::Timestamp(_), ColumnKind::Timestamp)
        )
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(v) => Some(v),
            _ => None,
        }
    }

    /// Short name of the variant, for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytes",
            Value::Json(_) => "json",
            Value::Timestamp(_) => "timestamp",
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::Json(v)
    }
}

impl From<OffsetDateTime> for Value {
    fn from(v: OffsetDateTime) -> Self {
        Value::Timestamp(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fits() {
        assert!(Value::Null.fits(ColumnKind::Text));
        assert!(Value::from("x").fits(ColumnKind::Text));
        assert!(!Value::from("x").fits(ColumnKind::Integer));
        assert!(Value::from(3i64).fits(ColumnKind::Float));
        assert!(!Value::from(3.5).fits(ColumnKind::Integer));
        assert!(!Value::from(vec![1u8]).fits(ColumnKind::File));
    }

    #[test]
    fn test_option_conversion() {
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(Some("a")), Value::Text("a".to_string()));
    }

    #[test]
    fn test_serde_tagging() {
        let json = serde_json::to_string(&Value::Integer(5)).unwrap();
        assert_eq!(json, r#"{"type":"integer","value":5}"#);
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Value::Integer(5));
    }
}
