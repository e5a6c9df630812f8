//! Outbound Ports (Driven Ports)
//!
//! What the bus needs from a broker and from a schema store. Adapters live
//! in [`crate::adapters`].

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;

use crate::domain::{
    ConsumedRecord, ConsumerSettings, DeliveryReport, OutboundRecord, PollOutcome,
    ProducerSettings, TopicPartitionOffset, TopicSchema,
};
use crate::error::{BrokerError, SchemaError};

/// Resolves once the broker acknowledged the record or gave up on it.
pub type DeliveryFuture = BoxFuture<'static, Result<DeliveryReport, BrokerError>>;

/// Producing side of a broker client.
#[async_trait]
pub trait BrokerProducer: Send + Sync {
    /// Enqueue a record for delivery.
    ///
    /// Records enqueued by one caller keep their relative order within a
    /// partition. The returned future tracks delivery; dropping it does not
    /// cancel the send.
    ///
    /// # Errors
    ///
    /// Immediate rejection (local queue full, unknown topic, client closed).
    fn enqueue(&self, record: OutboundRecord) -> Result<DeliveryFuture, BrokerError>;

    /// Wait until every enqueued record is resolved.
    async fn flush(&self, timeout: Duration) -> Result<(), BrokerError>;

    /// Records enqueued but not yet resolved.
    fn in_flight(&self) -> usize;
}

/// Consuming side of a broker client.
#[async_trait]
pub trait BrokerConsumer: Send + Sync {
    /// Join the consumer group for `topics`. Requires a group id.
    fn subscribe(&mut self, topics: &[String]) -> Result<(), BrokerError>;

    /// Read explicit partitions from explicit offsets, bypassing the group.
    fn assign(&mut self, positions: &[TopicPartitionOffset]) -> Result<(), BrokerError>;

    async fn poll(&mut self, timeout: Duration) -> Result<PollOutcome, BrokerError>;

    /// Commit `record.offset + 1` for the record's partition, synchronously.
    async fn commit(&mut self, record: &ConsumedRecord) -> Result<(), BrokerError>;

    /// Partition ids of `topic`; empty when the topic does not exist.
    async fn partitions(&self, topic: &str) -> Result<Vec<i32>, BrokerError>;

    /// Earliest offset per partition whose timestamp is at or after `timestamp_ms`.
    async fn offsets_for_timestamp(
        &self,
        topic: &str,
        timestamp_ms: i64,
    ) -> Result<Vec<TopicPartitionOffset>, BrokerError>;

    /// Leave the group and release the client. Idempotent.
    fn close(&mut self);
}

/// Factory for producers and consumers of one broker cluster.
pub trait BrokerClient: Send + Sync {
    fn name(&self) -> &'static str;

    /// # Errors
    ///
    /// Client construction failure (bad configuration, unreachable bootstrap).
    fn create_producer(
        &self,
        settings: &ProducerSettings,
    ) -> Result<Arc<dyn BrokerProducer>, BrokerError>;

    /// `group_id` is `None` for assign-only readers such as replay.
    ///
    /// # Errors
    ///
    /// Client construction failure.
    fn create_consumer(
        &self,
        settings: &ConsumerSettings,
        group_id: Option<&str>,
    ) -> Result<Box<dyn BrokerConsumer>, BrokerError>;
}

/// Where topic schemas come from.
#[async_trait]
pub trait SchemaSource: Send + Sync {
    /// `Ok(None)` when nothing is registered for `topic`.
    async fn fetch(&self, topic: &str) -> Result<Option<TopicSchema>, SchemaError>;

    fn describe(&self) -> String;
}
