//! # Dead-Letter Record
//!
//! JSON document published to `<topic>.dlq` when a message cannot be
//! processed. The original payload travels base64-encoded in `value` so the
//! record stays valid JSON whatever the original bytes were.

use crate::domain::record::ConsumedRecord;
use crate::error::SerdeError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    pub original_topic: String,
    pub original_partition: i32,
    pub original_offset: i64,
    pub error: String,
    /// Time the record was dead-lettered, ms since epoch.
    pub timestamp: i64,
    #[serde(with = "base64_payload")]
    pub value: Option<Vec<u8>>,
    /// Handler attempts made before giving up (0 when decoding failed).
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_key: Option<String>,
}

impl DeadLetterRecord {
    /// Capture the failure context for `original`.
    #[must_use]
    pub fn from_consumed(
        original: &ConsumedRecord,
        error: impl Into<String>,
        attempts: u32,
        now_ms: i64,
    ) -> Self {
        Self {
            original_topic: original.topic.clone(),
            original_partition: original.partition,
            original_offset: original.offset,
            error: error.into(),
            timestamp: now_ms,
            value: original.payload.clone(),
            attempts,
            original_key: original.key_str(),
        }
    }

    /// # Errors
    ///
    /// Propagates JSON encoding failures.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, SerdeError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// # Errors
    ///
    /// Fails when `bytes` is not a dead-letter JSON document.
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self, SerdeError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

mod base64_payload {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(bytes) => s.serialize_some(&STANDARD.encode(bytes)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        Option::<String>::deserialize(d)?
            .map(|text| STANDARD.decode(text).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn consumed() -> ConsumedRecord {
        ConsumedRecord {
            topic: "call.events".into(),
            partition: 2,
            offset: 17,
            key: Some(b"tenant-1".to_vec()),
            payload: Some(vec![0, 0, 0, 0, 1, 0xff, 0x10]),
            headers: Vec::new(),
            timestamp_ms: Some(1_000),
        }
    }

    #[test]
    fn test_from_consumed_captures_context() {
        let record = DeadLetterRecord::from_consumed(&consumed(), "boom", 3, 5_000);
        assert_eq!(record.original_topic, "call.events");
        assert_eq!(record.original_partition, 2);
        assert_eq!(record.original_offset, 17);
        assert_eq!(record.error, "boom");
        assert_eq!(record.timestamp, 5_000);
        assert_eq!(record.attempts, 3);
        assert_eq!(record.original_key.as_deref(), Some("tenant-1"));
    }

    #[test]
    fn test_value_is_base64_in_json() {
        let record = DeadLetterRecord::from_consumed(&consumed(), "boom", 1, 0);
        let json: serde_json::Value =
            serde_json::from_slice(&record.to_json_bytes().unwrap()).unwrap();
        assert_eq!(json["value"], "AAAAAAH/EA==");
        assert_eq!(json["original_topic"], "call.events");

        let back = DeadLetterRecord::from_json_bytes(&record.to_json_bytes().unwrap()).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_tombstone_value_is_null() {
        let mut original = consumed();
        original.payload = None;
        original.key = None;
        let record = DeadLetterRecord::from_consumed(&original, "empty", 0, 0);
        let json: serde_json::Value =
            serde_json::from_slice(&record.to_json_bytes().unwrap()).unwrap();
        assert!(json["value"].is_null());
        assert!(json.get("original_key").is_none());
    }
}
