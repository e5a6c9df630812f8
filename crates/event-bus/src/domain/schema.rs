//! # Topic Schema
//!
//! A named Avro record definition bound to one topic, plus the registry id
//! written into the wire framing. Topics without a registered schema resolve
//! to [`TopicSchema::empty`], whose serializer refuses to encode.

use crate::error::SchemaError;
use apache_avro::Schema;
use serde_json::{Map, Value};

/// Resolved schema for one topic.
#[derive(Debug, Clone)]
pub struct TopicSchema {
    topic: String,
    id: Option<u32>,
    definition: Value,
    avro: Option<Schema>,
}

impl TopicSchema {
    /// The "no schema registered" result.
    #[must_use]
    pub fn empty(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            id: None,
            definition: Value::Object(Map::new()),
            avro: None,
        }
    }

    /// Parse an `.avsc` document registered under `id`.
    ///
    /// # Errors
    ///
    /// `SchemaError::Invalid` if the text is not JSON, not a valid Avro
    /// schema, or not a record schema.
    pub fn parse(topic: impl Into<String>, id: u32, text: &str) -> Result<Self, SchemaError> {
        let topic = topic.into();
        let invalid = |reason: String| SchemaError::Invalid {
            topic: topic.clone(),
            reason,
        };

        let definition: Value =
            serde_json::from_str(text).map_err(|e| invalid(format!("not JSON: {e}")))?;
        let avro = Schema::parse(&definition).map_err(|e| invalid(e.to_string()))?;
        if !matches!(avro, Schema::Record(_)) {
            return Err(invalid("top-level schema must be a record".to_string()));
        }

        Ok(Self {
            topic,
            id: Some(id),
            definition,
            avro: Some(avro),
        })
    }

    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Registry id, `None` for the empty schema.
    #[must_use]
    pub fn id(&self) -> Option<u32> {
        self.id
    }

    /// The raw JSON definition (an empty object when unregistered).
    #[must_use]
    pub fn definition(&self) -> &Value {
        &self.definition
    }

    #[must_use]
    pub fn avro(&self) -> Option<&Schema> {
        self.avro.as_ref()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.avro.is_none()
    }

    #[must_use]
    pub fn record_name(&self) -> Option<&str> {
        self.definition.get("name").and_then(Value::as_str)
    }

    /// Declared field names in schema order.
    #[must_use]
    pub fn field_names(&self) -> Vec<&str> {
        self.definition
            .get("fields")
            .and_then(Value::as_array)
            .map(|fields| {
                fields
                    .iter()
                    .filter_map(|f| f.get("name").and_then(Value::as_str))
                    .collect()
            })
            .unwrap_or_default()
    }
}
