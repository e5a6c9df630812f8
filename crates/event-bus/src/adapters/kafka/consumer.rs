use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::{BorrowedMessage, Headers as _, Message};
use rdkafka::topic_partition_list::{Offset, TopicPartitionList};
use rdkafka::util::Timeout;
use tracing::debug;

use super::broker_error;
use crate::domain::{ConsumedRecord, ConsumerSettings, PollOutcome, TopicPartitionOffset};
use crate::error::BrokerError;
use crate::ports::BrokerConsumer;

const METADATA_TIMEOUT: Duration = Duration::from_secs(10);

pub struct KafkaConsumer {
    inner: Arc<StreamConsumer>,
    settings: ConsumerSettings,
    /// Topics read by this consumer, used to name EOF signals.
    topics: Vec<String>,
    closed: bool,
}

impl KafkaConsumer {
    /// # Errors
    ///
    /// librdkafka rejected the configuration.
    pub fn new(config: &ClientConfig, settings: ConsumerSettings) -> Result<Self, BrokerError> {
        let inner: StreamConsumer = config
            .create()
            .map_err(|e| BrokerError::Configuration(e.to_string()))?;
        Ok(Self {
            inner: Arc::new(inner),
            settings,
            topics: Vec::new(),
            closed: false,
        })
    }

    #[must_use]
    pub fn settings(&self) -> &ConsumerSettings {
        &self.settings
    }

    fn eof_topic(&self) -> String {
        match self.topics.as_slice() {
            [only] => only.clone(),
            _ => String::new(),
        }
    }
}

fn to_record(message: &BorrowedMessage<'_>) -> ConsumedRecord {
    let headers = message
        .headers()
        .map(|headers| {
            headers
                .iter()
                .map(|h| (h.key.to_string(), h.value.map(<[u8]>::to_vec).unwrap_or_default()))
                .collect()
        })
        .unwrap_or_default();
    ConsumedRecord {
        topic: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
        key: message.key().map(<[u8]>::to_vec),
        payload: message.payload().map(<[u8]>::to_vec),
        headers,
        timestamp_ms: message.timestamp().to_millis(),
    }
}

#[async_trait]
impl BrokerConsumer for KafkaConsumer {
    fn subscribe(&mut self, topics: &[String]) -> Result<(), BrokerError> {
        if self.closed {
            return Err(BrokerError::Closed);
        }
        let names: Vec<&str> = topics.iter().map(String::as_str).collect();
        self.inner.subscribe(&names).map_err(|e| broker_error(&e))?;
        self.topics = topics.to_vec();
        Ok(())
    }

    fn assign(&mut self, positions: &[TopicPartitionOffset]) -> Result<(), BrokerError> {
        if self.closed {
            return Err(BrokerError::Closed);
        }
        let mut tpl = TopicPartitionList::new();
        let mut topics = Vec::new();
        for tpo in positions {
            let Some(offset) = tpo.offset else { continue };
            tpl.add_partition_offset(&tpo.topic, tpo.partition, Offset::Offset(offset))
                .map_err(|e| broker_error(&e))?;
            if !topics.contains(&tpo.topic) {
                topics.push(tpo.topic.clone());
            }
        }
        self.inner.assign(&tpl).map_err(|e| broker_error(&e))?;
        self.topics = topics;
        Ok(())
    }

    async fn poll(&mut self, timeout: Duration) -> Result<PollOutcome, BrokerError> {
        if self.closed {
            return Err(BrokerError::Closed);
        }
        match tokio::time::timeout(timeout, self.inner.recv()).await {
            Err(_) => Ok(PollOutcome::Idle),
            Ok(Ok(message)) => Ok(PollOutcome::Record(to_record(&message))),
            Ok(Err(KafkaError::PartitionEOF(partition))) => {
                let offset = self
                    .inner
                    .position()
                    .ok()
                    .and_then(|tpl| {
                        tpl.elements()
                            .iter()
                            .find(|e| e.partition() == partition)
                            .and_then(|e| e.offset().to_raw())
                    })
                    .unwrap_or(-1);
                Ok(PollOutcome::PartitionEof {
                    topic: self.eof_topic(),
                    partition,
                    offset,
                })
            }
            Ok(Err(e)) => Err(broker_error(&e)),
        }
    }

    async fn commit(&mut self, record: &ConsumedRecord) -> Result<(), BrokerError> {
        if self.closed {
            return Err(BrokerError::Closed);
        }
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(&record.topic, record.partition, Offset::Offset(record.offset + 1))
            .map_err(|e| broker_error(&e))?;
        let consumer = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || consumer.commit(&tpl, CommitMode::Sync))
            .await
            .map_err(|e| BrokerError::Commit(format!("commit task failed: {e}")))?
            .map_err(|e| BrokerError::Commit(e.to_string()))?;
        debug!(
            topic = %record.topic,
            partition = record.partition,
            offset = record.offset + 1,
            "Committed offset"
        );
        Ok(())
    }

    async fn partitions(&self, topic: &str) -> Result<Vec<i32>, BrokerError> {
        let consumer = Arc::clone(&self.inner);
        let name = topic.to_string();
        let metadata = tokio::task::spawn_blocking(move || {
            consumer.fetch_metadata(Some(&name), Timeout::After(METADATA_TIMEOUT))
        })
        .await
        .map_err(|e| BrokerError::Transport(format!("metadata task failed: {e}")))?
        .map_err(|e| broker_error(&e))?;

        Ok(metadata
            .topics()
            .iter()
            .filter(|t| t.name() == topic && t.error().is_none())
            .flat_map(|t| t.partitions().iter().map(|p| p.id()))
            .collect())
    }

    async fn offsets_for_timestamp(
        &self,
        topic: &str,
        timestamp_ms: i64,
    ) -> Result<Vec<TopicPartitionOffset>, BrokerError> {
        let partitions = self.partitions(topic).await?;
        if partitions.is_empty() {
            return Ok(Vec::new());
        }
        let mut query = TopicPartitionList::new();
        for partition in &partitions {
            query
                .add_partition_offset(topic, *partition, Offset::Offset(timestamp_ms))
                .map_err(|e| broker_error(&e))?;
        }

        let consumer = Arc::clone(&self.inner);
        let found = tokio::task::spawn_blocking(move || {
            consumer.offsets_for_times(query, Timeout::After(METADATA_TIMEOUT))
        })
        .await
        .map_err(|e| BrokerError::Transport(format!("offset lookup task failed: {e}")))?
        .map_err(|e| broker_error(&e))?;

        Ok(found
            .elements()
            .iter()
            .map(|e| {
                let offset = match e.offset() {
                    Offset::Offset(o) => Some(o),
                    _ => None,
                };
                TopicPartitionOffset::new(topic, e.partition(), offset)
            })
            .collect())
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.inner.unsubscribe();
        self.closed = true;
        debug!(topics = ?self.topics, "Kafka consumer closed");
    }
}

impl Drop for KafkaConsumer {
    fn drop(&mut self) {
        self.close();
    }
}
