//! Broker-level record types shared by the ports and adapters.

/// Ordered record headers (duplicate names allowed, as on the wire).
pub type Headers = Vec<(String, Vec<u8>)>;

/// A record ready to be handed to a broker producer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRecord {
    pub topic: String,
    pub key: Option<Vec<u8>>,
    pub payload: Vec<u8>,
    pub headers: Headers,
    /// Explicit create time; the producer stamps "now" when `None`.
    pub timestamp_ms: Option<i64>,
}

impl OutboundRecord {
    #[must_use]
    pub fn new(topic: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            key: None,
            payload,
            headers: Vec::new(),
            timestamp_ms: None,
        }
    }

    #[must_use]
    pub fn with_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.key = Some(key.into());
        self
    }

    #[must_use]
    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }
}

/// Broker acknowledgement of a delivered record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub timestamp_ms: i64,
}

/// A record read from the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumedRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    /// `None` for tombstones.
    pub payload: Option<Vec<u8>>,
    pub headers: Headers,
    pub timestamp_ms: Option<i64>,
}

impl ConsumedRecord {
    /// Key decoded as UTF-8, lossily.
    #[must_use]
    pub fn key_str(&self) -> Option<String> {
        self.key
            .as_deref()
            .map(|k| String::from_utf8_lossy(k).into_owned())
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&[u8]> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_slice())
    }
}

/// A topic-partition with an optional position.
///
/// In an offsets-for-times answer `offset` is `None` when the partition has no
/// record at or after the requested timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicPartitionOffset {
    pub topic: String,
    pub partition: i32,
    pub offset: Option<i64>,
}

impl TopicPartitionOffset {
    #[must_use]
    pub fn new(topic: impl Into<String>, partition: i32, offset: Option<i64>) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
        }
    }
}

/// Result of a single consumer poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Record(ConsumedRecord),
    /// The consumer caught up with the end of a partition.
    PartitionEof {
        topic: String,
        partition: i32,
        offset: i64,
    },
    /// Nothing arrived within the poll timeout.
    Idle,
}
