//! Error types for the event bus

use thiserror::Error;

/// Errors surfaced to callers of the event bus.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("Invalid topic name: {0:?}")]
    InvalidTopic(String),

    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    #[error("Invalid replay window: start {start} is after end {end}")]
    InvalidWindow { start: i64, end: i64 },

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Serialization error: {0}")]
    Serde(#[from] SerdeError),

    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("Delivery to {topic} failed: {reason}")]
    Delivery { topic: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Event bus is shutting down")]
    ShuttingDown,
}

/// Errors reported by a broker adapter.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BrokerError {
    #[error("Broker transport error: {0}")]
    Transport(String),

    #[error("Broker unavailable (retriable): {0}")]
    Unavailable(String),

    #[error("Acknowledgement lost for {topic}/{partition}")]
    AckLost { topic: String, partition: i32 },

    #[error("Out of order sequence for {topic}/{partition}: expected {expected}, got {actual}")]
    OutOfOrderSequence {
        topic: String,
        partition: i32,
        expected: i32,
        actual: i32,
    },

    #[error("Delivery timed out after {elapsed_ms} ms: {last_error}")]
    DeliveryTimeout { elapsed_ms: u64, last_error: String },

    #[error("Unknown topic or partition: {topic}/{partition}")]
    UnknownPartition { topic: String, partition: i32 },

    #[error("Commit failed: {0}")]
    Commit(String),

    #[error("Flush timed out with {pending} deliveries outstanding")]
    FlushTimeout { pending: usize },

    #[error("Client configuration rejected: {0}")]
    Configuration(String),

    #[error("Consumer closed")]
    Closed,
}

impl BrokerError {
    /// Whether the producer should retry the same sequence number.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::Unavailable(_) | Self::AckLost { .. } | Self::OutOfOrderSequence { .. }
        )
    }
}

/// Errors from schema sources.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("Schema source unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid schema for topic {topic}: {reason}")]
    Invalid { topic: String, reason: String },

    #[error("Failed to read schema file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from the per-topic serializers and deserializers.
#[derive(Debug, Error)]
pub enum SerdeError {
    #[error("No schema registered for topic {0}")]
    NoSchema(String),

    #[error("Avro encode failed for topic {topic}: {reason}")]
    Encode { topic: String, reason: String },

    #[error("Avro decode failed for topic {topic}: {reason}")]
    Decode { topic: String, reason: String },

    #[error("Unexpected wire format on topic {topic}: {reason}")]
    Framing { topic: String, reason: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("Event bus already initialized")]
    AlreadyInitialized,
}
