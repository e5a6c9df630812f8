//! # Event
//!
//! A bus event is a flat mapping of field names to JSON values. Every event
//! that leaves the producer carries an `event_id` and a `timestamp`; the rest
//! of the fields are defined by the topic schema.

use crate::error::BusError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::{SystemTime, UNIX_EPOCH};

/// Field holding the unique event identifier (UUID v4 string).
pub const EVENT_ID_FIELD: &str = "event_id";

/// Field holding the event creation time in milliseconds since epoch.
pub const TIMESTAMP_FIELD: &str = "timestamp";

/// A single bus event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Event(Map<String, Value>);

impl Event {
    /// Create an empty event.
    #[must_use]
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Build an event from an arbitrary JSON value.
    ///
    /// # Errors
    ///
    /// Returns `BusError::InvalidEvent` unless the value is a JSON object.
    pub fn from_value(value: Value) -> Result<Self, BusError> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(BusError::InvalidEvent(format!(
                "expected a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }

    /// Builder-style field setter.
    #[must_use]
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    /// Set a field, returning the previous value.
    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(field.into(), value.into())
    }

    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    #[must_use]
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(Value::as_str)
    }

    /// The event identifier, if one has been assigned.
    #[must_use]
    pub fn event_id(&self) -> Option<&str> {
        self.get_str(EVENT_ID_FIELD)
    }

    /// The event timestamp in ms, if one has been assigned.
    #[must_use]
    pub fn timestamp(&self) -> Option<i64> {
        self.0.get(TIMESTAMP_FIELD).and_then(Value::as_i64)
    }

    #[must_use]
    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    #[must_use]
    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    /// Assign `event_id` and `timestamp` when absent or null.
    ///
    /// Caller-supplied values are never overwritten.
    pub fn ensure_envelope(&mut self, now_ms: i64) {
        if is_absent(self.0.get(EVENT_ID_FIELD)) {
            self.0.insert(
                EVENT_ID_FIELD.to_string(),
                Value::String(uuid::Uuid::new_v4().to_string()),
            );
        }
        if is_absent(self.0.get(TIMESTAMP_FIELD)) {
            self.0
                .insert(TIMESTAMP_FIELD.to_string(), Value::from(now_ms));
        }
    }
}

impl From<Map<String, Value>> for Event {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl TryFrom<Value> for Event {
    type Error = BusError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::from_value(value)
    }
}

fn is_absent(value: Option<&Value>) -> bool {
    matches!(value, None | Some(Value::Null))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Current wall-clock time in milliseconds since the Unix epoch.
#[must_use]
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}
