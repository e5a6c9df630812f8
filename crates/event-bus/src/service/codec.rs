//! # Avro Codec
//!
//! Per-topic serializer and deserializer. Records use the Confluent wire
//! framing:
//!
//! ```text
//! +------+----------------+---------------------+
//! | 0x00 | schema id (BE) | Avro binary datum   |
//! +------+----------------+---------------------+
//!   1 B        4 B             variable
//! ```
//!
//! Event fields map onto record fields by name. Optional fields
//! (`["null", T]` unions) may be omitted; when decoding, null values are left
//! out again so an event survives a round trip unchanged.

use std::collections::HashMap;
use std::sync::Arc;

use apache_avro::schema::{RecordSchema, UnionSchema};
use apache_avro::types::Value as Avro;
use apache_avro::{from_avro_datum, to_avro_datum, Schema};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::{Map, Value as Json};
use tracing::trace;

use crate::domain::{Event, TopicSchema};
use crate::error::SerdeError;

pub const MAGIC_BYTE: u8 = 0;
pub const HEADER_LEN: usize = 5;

// =============================================================================
// Serializer
// =============================================================================

#[derive(Debug, Clone)]
pub struct AvroSerializer {
    schema: Arc<TopicSchema>,
}

impl AvroSerializer {
    #[must_use]
    pub fn new(schema: Arc<TopicSchema>) -> Self {
        Self { schema }
    }

    #[must_use]
    pub fn schema(&self) -> &Arc<TopicSchema> {
        &self.schema
    }

    /// Encode `event` as a framed Avro record.
    ///
    /// # Errors
    ///
    /// `SerdeError::NoSchema` for topics without a schema; `SerdeError::Encode`
    /// when the event does not fit the schema.
    pub fn serialize(&self, event: &Event) -> Result<Vec<u8>, SerdeError> {
        let topic = self.schema.topic();
        let (Some(schema), Some(id)) = (self.schema.avro(), self.schema.id()) else {
            return Err(SerdeError::NoSchema(topic.to_string()));
        };
        let Schema::Record(record) = schema else {
            return Err(SerdeError::NoSchema(topic.to_string()));
        };

        let encode_err = |reason: String| SerdeError::Encode {
            topic: topic.to_string(),
            reason,
        };
        let value = record_to_avro(event.fields(), record, "").map_err(encode_err)?;
        let datum = to_avro_datum(schema, value).map_err(|e| encode_err(e.to_string()))?;

        let mut framed = Vec::with_capacity(HEADER_LEN + datum.len());
        framed.push(MAGIC_BYTE);
        framed.extend_from_slice(&id.to_be_bytes());
        framed.extend_from_slice(&datum);
        Ok(framed)
    }
}

// =============================================================================
// Deserializer
// =============================================================================

#[derive(Debug, Clone)]
pub struct AvroDeserializer {
    schema: Arc<TopicSchema>,
}

impl AvroDeserializer {
    #[must_use]
    pub fn new(schema: Arc<TopicSchema>) -> Self {
        Self { schema }
    }

    #[must_use]
    pub fn schema(&self) -> &Arc<TopicSchema> {
        &self.schema
    }

    /// Decode a framed record. Topics without a schema fall back to parsing
    /// the payload as a JSON object.
    ///
    /// # Errors
    ///
    /// `SerdeError::Framing` for a bad header or a schema id this topic does
    /// not use, `SerdeError::Decode` for a corrupt datum.
    pub fn deserialize(&self, payload: &[u8]) -> Result<Event, SerdeError> {
        let topic = self.schema.topic();
        let Some(schema) = self.schema.avro() else {
            return best_effort_json(topic, payload);
        };

        let framing = |reason: String| SerdeError::Framing {
            topic: topic.to_string(),
            reason,
        };
        if payload.len() < HEADER_LEN {
            return Err(framing(format!("{} bytes is shorter than the header", payload.len())));
        }
        if payload[0] != MAGIC_BYTE {
            return Err(framing(format!("unknown magic byte {:#04x}", payload[0])));
        }
        let id = u32::from_be_bytes([payload[1], payload[2], payload[3], payload[4]]);
        if Some(id) != self.schema.id() {
            return Err(framing(format!(
                "schema id {id} does not match registered id {:?}",
                self.schema.id()
            )));
        }

        let mut datum = &payload[HEADER_LEN..];
        let value = from_avro_datum(schema, &mut datum, None).map_err(|e| SerdeError::Decode {
            topic: topic.to_string(),
            reason: e.to_string(),
        })?;
        match avro_to_json(&value) {
            Json::Object(fields) => Ok(Event::from(fields)),
            other => Err(SerdeError::Decode {
                topic: topic.to_string(),
                reason: format!("expected a record, decoded {other}"),
            }),
        }
    }
}

fn best_effort_json(topic: &str, payload: &[u8]) -> Result<Event, SerdeError> {
    match serde_json::from_slice::<Json>(payload)? {
        Json::Object(fields) => {
            trace!(topic, "Decoded schemaless payload as JSON");
            Ok(Event::from(fields))
        }
        _ => Err(SerdeError::Decode {
            topic: topic.to_string(),
            reason: "schemaless payload is not a JSON object".to_string(),
        }),
    }
}

// =============================================================================
// JSON -> Avro
// =============================================================================

fn record_to_avro(fields: &Map<String, Json>, record: &RecordSchema, path: &str) -> Result<Avro, String> {
    let mut values = Vec::with_capacity(record.fields.len());
    for field in &record.fields {
        let field_path = if path.is_empty() {
            field.name.clone()
        } else {
            format!("{path}.{}", field.name)
        };
        let value = match fields.get(&field.name) {
            Some(v) if !v.is_null() || accepts_null(&field.schema) => {
                json_to_avro(v, &field.schema, &field_path)?
            }
            _ => match &field.default {
                Some(default) => default_to_avro(default, &field.schema, &field_path)?,
                None => return Err(format!("missing required field {field_path}")),
            },
        };
        values.push((field.name.clone(), value));
    }
    Ok(Avro::Record(values))
}

fn json_to_avro(value: &Json, schema: &Schema, path: &str) -> Result<Avro, String> {
    match (schema, value) {
        (Schema::Union(union), _) => union_to_avro(value, union, path),
        (Schema::Null, Json::Null) => Ok(Avro::Null),
        (Schema::Boolean, Json::Bool(b)) => Ok(Avro::Boolean(*b)),
        (Schema::Int, Json::Number(n)) => n
            .as_i64()
            .and_then(|i| i32::try_from(i).ok())
            .map(Avro::Int)
            .ok_or_else(|| format!("{path}: {n} is not a 32-bit integer")),
        (Schema::Long, Json::Number(n)) => n
            .as_i64()
            .map(Avro::Long)
            .ok_or_else(|| format!("{path}: {n} is not a 64-bit integer")),
        #[allow(clippy::cast_possible_truncation)]
        (Schema::Float, Json::Number(n)) => n
            .as_f64()
            .map(|f| Avro::Float(f as f32))
            .ok_or_else(|| format!("{path}: {n} is not a number")),
        (Schema::Double, Json::Number(n)) => n
            .as_f64()
            .map(Avro::Double)
            .ok_or_else(|| format!("{path}: {n} is not a number")),
        (Schema::String, Json::String(s)) => Ok(Avro::String(s.clone())),
        // Nested payloads travel as JSON text in string fields.
        (Schema::String, Json::Object(_) | Json::Array(_)) => Ok(Avro::String(value.to_string())),
        (Schema::Bytes, Json::String(s)) => STANDARD
            .decode(s)
            .map(Avro::Bytes)
            .map_err(|e| format!("{path}: invalid base64: {e}")),
        (Schema::Enum(e), Json::String(s)) => e
            .symbols
            .iter()
            .position(|symbol| symbol == s)
            .map(|i| Avro::Enum(u32::try_from(i).unwrap_or(u32::MAX), s.clone()))
            .ok_or_else(|| format!("{path}: {s:?} is not a symbol of {}", e.name.name)),
        (Schema::Array(array), Json::Array(items)) => items
            .iter()
            .enumerate()
            .map(|(i, item)| json_to_avro(item, &array.items, &format!("{path}[{i}]")))
            .collect::<Result<Vec<_>, _>>()
            .map(Avro::Array),
        (Schema::Map(map), Json::Object(entries)) => entries
            .iter()
            .map(|(k, v)| Ok((k.clone(), json_to_avro(v, &map.types, &format!("{path}.{k}"))?)))
            .collect::<Result<HashMap<_, _>, String>>()
            .map(Avro::Map),
        (Schema::Record(record), Json::Object(fields)) => record_to_avro(fields, record, path),
        _ => Err(format!(
            "{path}: expected {}, got {}",
            schema_kind(schema),
            json_kind(value)
        )),
    }
}

fn union_to_avro(value: &Json, union: &UnionSchema, path: &str) -> Result<Avro, String> {
    let branch = |i: usize, v: Avro| Avro::Union(u32::try_from(i).unwrap_or(u32::MAX), Box::new(v));
    let variants = union.variants();

    if value.is_null() {
        return variants
            .iter()
            .position(|v| matches!(v, Schema::Null))
            .map(|i| branch(i, Avro::Null))
            .ok_or_else(|| format!("{path}: null is not allowed"));
    }
    variants
        .iter()
        .enumerate()
        .filter(|(_, v)| !matches!(v, Schema::Null))
        .find_map(|(i, variant)| json_to_avro(value, variant, path).ok().map(|v| branch(i, v)))
        .ok_or_else(|| format!("{path}: {} matches no union branch", json_kind(value)))
}

/// Defaults of union fields apply to the first branch.
fn default_to_avro(default: &Json, schema: &Schema, path: &str) -> Result<Avro, String> {
    match schema {
        Schema::Union(union) => {
            let first = union
                .variants()
                .first()
                .ok_or_else(|| format!("{path}: empty union"))?;
            Ok(Avro::Union(0, Box::new(json_to_avro(default, first, path)?)))
        }
        other => json_to_avro(default, other, path),
    }
}

fn accepts_null(schema: &Schema) -> bool {
    match schema {
        Schema::Null => true,
        Schema::Union(union) => union.variants().iter().any(|v| matches!(v, Schema::Null)),
        _ => false,
    }
}

fn schema_kind(schema: &Schema) -> &'static str {
    match schema {
        Schema::Null => "null",
        Schema::Boolean => "boolean",
        Schema::Int => "int",
        Schema::Long => "long",
        Schema::Float => "float",
        Schema::Double => "double",
        Schema::Bytes => "bytes",
        Schema::String => "string",
        Schema::Array(_) => "array",
        Schema::Map(_) => "map",
        Schema::Union(_) => "union",
        Schema::Record(_) => "record",
        Schema::Enum(_) => "enum",
        _ => "logical type",
    }
}

fn json_kind(value: &Json) -> &'static str {
    match value {
        Json::Null => "null",
        Json::Bool(_) => "boolean",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    }
}

// =============================================================================
// Avro -> JSON
// =============================================================================

fn avro_to_json(value: &Avro) -> Json {
    match value {
        Avro::Null => Json::Null,
        Avro::Boolean(b) => Json::Bool(*b),
        Avro::Int(i) => Json::from(*i),
        Avro::Long(l) => Json::from(*l),
        Avro::Float(f) => Json::from(f64::from(*f)),
        Avro::Double(d) => double_to_json(*d),
        Avro::Bytes(b) | Avro::Fixed(_, b) => Json::String(STANDARD.encode(b)),
        Avro::String(s) | Avro::Enum(_, s) => Json::String(s.clone()),
        Avro::Union(_, inner) => avro_to_json(inner),
        Avro::Array(items) => Json::Array(items.iter().map(avro_to_json).collect()),
        Avro::Map(entries) => Json::Object(
            entries
                .iter()
                .map(|(k, v)| (k.clone(), avro_to_json(v)))
                .collect(),
        ),
        Avro::Record(fields) => Json::Object(
            fields
                .iter()
                .map(|(k, v)| (k, avro_to_json(v)))
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), v))
                .collect(),
        ),
        Avro::Date(d) => Json::from(*d),
        Avro::TimeMillis(t) => Json::from(*t),
        Avro::TimeMicros(t) | Avro::TimestampMillis(t) | Avro::TimestampMicros(t) => {
            Json::from(*t)
        }
        Avro::Uuid(u) => Json::String(u.to_string()),
        _ => Json::Null,
    }
}

/// Integral doubles decode as JSON integers, so `"amount": 12` survives a
/// round trip unchanged. Only values exactly representable as `i64` through
/// `f64` (|d| <= 2^53) are converted.
#[allow(clippy::cast_possible_truncation)]
fn double_to_json(d: f64) -> Json {
    const MAX_EXACT: f64 = 9_007_199_254_740_992.0;
    if d.is_finite() && d.fract() == 0.0 && d.abs() <= MAX_EXACT {
        Json::from(d as i64)
    } else {
        Json::from(d)
    }
}
