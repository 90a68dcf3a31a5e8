//! Structured payload values and canonical JSON.
//!
//! The `R` payload channel carries arbitrary nested data. It is modelled
//! as a tagged variant rather than raw `serde_json::Value` so the codec
//! keeps a strong type boundary; maps are ordered by key, which makes the
//! canonical JSON of any two structurally equal values byte-identical
//! regardless of the field order they were built in.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::{PackageError, Result};

/// A JSON-like structured payload value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Absent value
    Null,
    /// Boolean scalar
    Bool(bool),
    /// Signed integer scalar
    Int(i64),
    /// Floating point scalar
    Float(f64),
    /// Text scalar
    Str(String),
    /// Ordered list
    List(Vec<Value>),
    /// Key-ordered map
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Build a map value from key/value pairs.
    pub fn map<K: Into<String>, I: IntoIterator<Item = (K, Value)>>(pairs: I) -> Self {
        Self::Map(pairs.into_iter().map(|(key, value)| (key.into(), value)).collect())
    }

    /// Borrow the string contents when this is a `Str`.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(text) => Some(text),
            _ => None,
        }
    }

    /// Borrow the integer contents when this is an `Int`.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Str(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Serialise `value` as canonical JSON: sorted keys, compact separators,
/// no trailing whitespace.
///
/// Structs are first lowered to `serde_json::Value`, whose map type is
/// key-ordered, so field declaration order never leaks into the output.
///
/// # Errors
///
/// `PackageError::Malformed` when the value cannot be represented as JSON.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String> {
    let tree = serde_json::to_value(value)
        .map_err(|err| PackageError::malformed(format!("canonical JSON failed: {err}")))?;
    serde_json::to_string(&tree)
        .map_err(|err| PackageError::malformed(format!("canonical JSON failed: {err}")))
}
