use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::cmp::Ordering;

use crate::error::{LinkError, Result};

/// A single row as returned by the remote store: column name → value.
///
/// Records are opaque to the cache except for two columns: the primary key
/// (used for deduplication) and the ordering column of the owning
/// [`QueryOptions`](super::QueryOptions).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, JsonValue>);

impl Record {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Build a record from a JSON value; only objects are accepted.
    pub fn from_json(value: JsonValue) -> Result<Self> {
        match value {
            JsonValue::Object(map) => Ok(Self(map)),
            other => Err(LinkError::validation(format!(
                "Record must be a JSON object, got {}",
                json_type_name(&other)
            ))),
        }
    }

    pub fn get(&self, column: &str) -> Option<&JsonValue> {
        self.0.get(column)
    }

    pub fn insert(&mut self, column: impl Into<String>, value: JsonValue) -> Option<JsonValue> {
        self.0.insert(column.into(), value)
    }

    pub fn columns(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Primary key value rendered as a comparable string.
    ///
    /// `1` and `"1"` map to the same key so a changefeed that serializes ids
    /// differently from the query API still deduplicates.
    pub fn key(&self, primary_key: &str) -> Option<String> {
        self.get(primary_key).and_then(value_key)
    }

    /// Overlay `other`'s columns onto this record (partial update semantics).
    pub fn merged_with(&self, other: &Record) -> Record {
        let mut merged = self.0.clone();
        for (column, value) in &other.0 {
            merged.insert(column.clone(), value.clone());
        }
        Record(merged)
    }

    pub fn into_json(self) -> JsonValue {
        JsonValue::Object(self.0)
    }

    pub fn as_map(&self) -> &Map<String, JsonValue> {
        &self.0
    }
}

impl From<Map<String, JsonValue>> for Record {
    fn from(map: Map<String, JsonValue>) -> Self {
        Self(map)
    }
}

impl TryFrom<JsonValue> for Record {
    type Error = LinkError;

    fn try_from(value: JsonValue) -> Result<Self> {
        Record::from_json(value)
    }
}

/// Render a scalar value as a dedup key. Objects, arrays and null have no key.
pub(crate) fn value_key(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Total order over JSON scalars used for row ordering.
///
/// Numbers compare numerically, strings lexically (ISO-8601 timestamps sort
/// correctly this way). Across types: bool < number < string < other; a
/// missing or null value sorts after everything else.
pub(crate) fn compare_values(a: Option<&JsonValue>, b: Option<&JsonValue>) -> Ordering {
    let a = a.filter(|v| !v.is_null());
    let b = b.filter(|v| !v.is_null());
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) => match (a, b) {
            (JsonValue::Number(x), JsonValue::Number(y)) => {
                let x = x.as_f64().unwrap_or(f64::NAN);
                let y = y.as_f64().unwrap_or(f64::NAN);
                x.partial_cmp(&y).unwrap_or(Ordering::Equal)
            },
            (JsonValue::String(x), JsonValue::String(y)) => x.cmp(y),
            (JsonValue::Bool(x), JsonValue::Bool(y)) => x.cmp(y),
            _ => type_rank(a).cmp(&type_rank(b)),
        },
    }
}

fn type_rank(value: &JsonValue) -> u8 {
    match value {
        JsonValue::Bool(_) => 0,
        JsonValue::Number(_) => 1,
        JsonValue::String(_) => 2,
        JsonValue::Array(_) => 3,
        JsonValue::Object(_) => 4,
        JsonValue::Null => 5,
    }
}

fn json_type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "bool",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}
