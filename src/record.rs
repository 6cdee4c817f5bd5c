use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{PipelineError, Result};

/// One unit of data moving through the pipeline: an ordered mapping from
/// field name to JSON value. Field order is preserved end to end
/// (serde_json is built with `preserve_order`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(pub Map<String, Value>);

/// An ordered sequence of records. Owned by the executor between stages and
/// moved into each stage for the duration of its `apply` call.
pub type RecordBatch = Vec<Record>;

impl Record {
    pub fn new() -> Self {
        Record(Map::new())
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Returns the field as text, or `None` when absent, null, or not a string.
    pub fn text(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(Value::as_str)
    }

    /// Returns the field as non-empty text, failing with a `Data` error that
    /// names the record's batch position otherwise.
    pub fn require_text(&self, field: &str, position: usize) -> Result<&str> {
        match self.text(field) {
            Some(s) if !s.is_empty() => Ok(s),
            Some(_) => Err(PipelineError::Data {
                position,
                message: format!("field '{field}' is empty"),
            }),
            None => Err(PipelineError::Data {
                position,
                message: format!("field '{field}' is missing or not text"),
            }),
        }
    }

    pub fn set(&mut self, field: impl Into<String>, value: Value) {
        self.0.insert(field.into(), value);
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.0.remove(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Builds a record from a JSON value; non-object values are rejected
    /// since every record is a field mapping.
    pub fn from_value(value: Value, position: usize) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Record(map)),
            other => Err(PipelineError::Data {
                position,
                message: format!("expected a JSON object, got {other}"),
            }),
        }
    }
}

impl Default for Record {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Map<String, Value>> for Record {
    fn from(map: Map<String, Value>) -> Self {
        Record(map)
    }
}
