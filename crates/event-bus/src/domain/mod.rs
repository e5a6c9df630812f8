//! Domain layer: events, topics, schemas, records and configuration.

pub mod config;
pub mod dead_letter;
pub mod event;
pub mod partitioner;
pub mod record;
pub mod schema;
pub mod topic;

pub use config::{
    BrokerBackend, BusConfig, BusConfigBuilder, ConsumePolicy, ConsumerSettings,
    ProducerSettings, ReplaySettings, RetryPolicy,
};
pub use dead_letter::DeadLetterRecord;
pub use event::{now_ms, Event, EVENT_ID_FIELD, TIMESTAMP_FIELD};
pub use partitioner::{murmur2, partition_for_key};
pub use record::{
    ConsumedRecord, DeliveryReport, Headers, OutboundRecord, PollOutcome, TopicPartitionOffset,
};
pub use schema::TopicSchema;
pub use topic::{dlq_topic, is_catalog_topic, is_dlq_topic, validate_topic, TOPIC_CATALOG};
