//! Consumer for the in-memory broker.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, info};

use super::broker::InMemoryBroker;
use crate::domain::{ConsumedRecord, ConsumerSettings, PollOutcome, TopicPartitionOffset};
use crate::error::BrokerError;
use crate::ports::BrokerConsumer;

type PartitionKey = (String, i32);

#[derive(Debug, Clone, PartialEq, Eq)]
enum Mode {
    Idle,
    /// Group member; assignment follows the group generation.
    Subscribed { group: String, generation: u64 },
    /// Fixed partitions, no group membership.
    Assigned,
}

pub struct InMemoryConsumer {
    broker: InMemoryBroker,
    settings: ConsumerSettings,
    group_id: Option<String>,
    member_id: u64,
    mode: Mode,
    assignment: Vec<PartitionKey>,
    positions: HashMap<PartitionKey, i64>,
    eof_reported: HashSet<PartitionKey>,
    cursor: usize,
    closed: bool,
}

impl InMemoryConsumer {
    #[must_use]
    pub fn new(broker: InMemoryBroker, settings: ConsumerSettings, group_id: Option<String>) -> Self {
        let member_id = broker.next_client_id();
        Self {
            broker,
            settings,
            group_id,
            member_id,
            mode: Mode::Idle,
            assignment: Vec::new(),
            positions: HashMap::new(),
            eof_reported: HashSet::new(),
            cursor: 0,
            closed: false,
        }
    }

    #[must_use]
    pub fn member_id(&self) -> u64 {
        self.member_id
    }

    /// Partitions currently owned by this consumer.
    #[must_use]
    pub fn assignment(&self) -> &[PartitionKey] {
        &self.assignment
    }

    #[must_use]
    pub fn settings(&self) -> &ConsumerSettings {
        &self.settings
    }

    fn refresh_assignment(&mut self) {
        let Mode::Subscribed { group, generation } = &self.mode else {
            return;
        };
        if self.broker.generation(group) == *generation {
            return;
        }

        let group = group.clone();
        let (generation, owned) = self.broker.assignment(&group, self.member_id);
        let previous: HashSet<PartitionKey> = self.assignment.iter().cloned().collect();

        self.positions.retain(|key, _| owned.contains(key));
        self.eof_reported.retain(|key| owned.contains(key));
        for key in &owned {
            if !previous.contains(key) {
                let start = self
                    .broker
                    .committed_offset(&group, &key.0, key.1)
                    .unwrap_or(0);
                self.positions.insert(key.clone(), start);
            }
        }

        info!(
            group = %group,
            member = self.member_id,
            generation,
            partitions = owned.len(),
            "Partition assignment updated"
        );
        self.assignment = owned;
        self.cursor = 0;
        self.mode = Mode::Subscribed { group, generation };
    }

    fn next_ready(&mut self) -> Option<PollOutcome> {
        let count = self.assignment.len();
        for step in 0..count {
            let index = (self.cursor + step) % count;
            let key = self.assignment[index].clone();
            let position = self.positions.get(&key).copied().unwrap_or(0);

            if let Some(record) = self.broker.read(&key.0, key.1, position) {
                self.positions.insert(key.clone(), position + 1);
                self.eof_reported.remove(&key);
                self.cursor = index + 1;
                return Some(PollOutcome::Record(record));
            }
            if ConsumerSettings::ENABLE_PARTITION_EOF && self.eof_reported.insert(key.clone()) {
                self.cursor = index + 1;
                return Some(PollOutcome::PartitionEof {
                    topic: key.0,
                    partition: key.1,
                    offset: position,
                });
            }
        }
        None
    }
}

#[async_trait]
impl BrokerConsumer for InMemoryConsumer {
    fn subscribe(&mut self, topics: &[String]) -> Result<(), BrokerError> {
        if self.closed {
            return Err(BrokerError::Closed);
        }
        let group = self.group_id.clone().ok_or_else(|| {
            BrokerError::Configuration("subscribe requires a group id".to_string())
        })?;
        self.broker.join_group(&group, self.member_id, topics);
        self.assignment.clear();
        self.positions.clear();
        self.eof_reported.clear();
        self.mode = Mode::Subscribed {
            group,
            generation: 0,
        };
        Ok(())
    }

    fn assign(&mut self, positions: &[TopicPartitionOffset]) -> Result<(), BrokerError> {
        if self.closed {
            return Err(BrokerError::Closed);
        }
        if let Mode::Subscribed { group, .. } = &self.mode {
            self.broker.leave_group(group, self.member_id);
        }

        self.assignment.clear();
        self.positions.clear();
        self.eof_reported.clear();
        for tpo in positions {
            let Some(offset) = tpo.offset else { continue };
            let count = self.broker.partition_count(&tpo.topic).unwrap_or(0);
            if tpo.partition < 0 || tpo.partition >= count {
                return Err(BrokerError::UnknownPartition {
                    topic: tpo.topic.clone(),
                    partition: tpo.partition,
                });
            }
            let key = (tpo.topic.clone(), tpo.partition);
            self.assignment.push(key.clone());
            self.positions.insert(key, offset);
        }
        self.cursor = 0;
        self.mode = Mode::Assigned;
        Ok(())
    }

    async fn poll(&mut self, timeout: Duration) -> Result<PollOutcome, BrokerError> {
        if self.closed {
            return Err(BrokerError::Closed);
        }
        let deadline = Instant::now() + timeout;
        let state = std::sync::Arc::clone(&self.broker.state);
        loop {
            let changed = state.changed.notified();
            tokio::pin!(changed);
            changed.as_mut().enable();

            self.refresh_assignment();
            if let Some(outcome) = self.next_ready() {
                return Ok(outcome);
            }
            if tokio::time::timeout_at(deadline, changed).await.is_err() {
                return Ok(PollOutcome::Idle);
            }
        }
    }

    async fn commit(&mut self, record: &ConsumedRecord) -> Result<(), BrokerError> {
        if self.closed {
            return Err(BrokerError::Closed);
        }
        let Mode::Subscribed { group, .. } = &self.mode else {
            return Err(BrokerError::Configuration(
                "commit requires group membership".to_string(),
            ));
        };
        let group = group.clone();

        self.refresh_assignment();
        let key = (record.topic.clone(), record.partition);
        if !self.assignment.contains(&key) {
            return Err(BrokerError::Commit(format!(
                "{}/{} is no longer assigned to this member",
                record.topic, record.partition
            )));
        }
        self.broker
            .commit(&group, &record.topic, record.partition, record.offset + 1);
        debug!(
            group = %group,
            topic = %record.topic,
            partition = record.partition,
            offset = record.offset + 1,
            "Committed offset"
        );
        Ok(())
    }

    async fn partitions(&self, topic: &str) -> Result<Vec<i32>, BrokerError> {
        Ok((0..self.broker.partition_count(topic).unwrap_or(0)).collect())
    }

    async fn offsets_for_timestamp(
        &self,
        topic: &str,
        timestamp_ms: i64,
    ) -> Result<Vec<TopicPartitionOffset>, BrokerError> {
        Ok(self
            .broker
            .offsets_for_timestamp(topic, timestamp_ms)
            .into_iter()
            .map(|(partition, offset)| TopicPartitionOffset::new(topic, partition, offset))
            .collect())
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        if let Mode::Subscribed { group, .. } = &self.mode {
            self.broker.leave_group(group, self.member_id);
        }
        self.mode = Mode::Idle;
        self.assignment.clear();
        self.closed = true;
        debug!(member = self.member_id, "Consumer closed");
    }
}

impl Drop for InMemoryConsumer {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryProducer;
    use crate::domain::{OutboundRecord, ProducerSettings};
    use crate::ports::BrokerProducer;

    const POLL: Duration = Duration::from_millis(50);

    async fn produce(broker: &InMemoryBroker, topic: &str, key: &str, n: u8) {
        let producer = InMemoryProducer::new(broker.clone(), ProducerSettings::default());
        for i in 0..n {
            producer
                .enqueue(OutboundRecord::new(topic, vec![i]).with_key(key))
                .unwrap()
                .await
                .unwrap();
        }
    }

    async fn next_record(consumer: &mut InMemoryConsumer) -> Option<ConsumedRecord> {
        loop {
            match consumer.poll(POLL).await.unwrap() {
                PollOutcome::Record(record) => return Some(record),
                PollOutcome::PartitionEof { .. } => continue,
                PollOutcome::Idle => return None,
            }
        }
    }

    #[tokio::test]
    async fn test_subscribe_reads_from_earliest() {
        let broker = InMemoryBroker::new(1);
        produce(&broker, "t", "k", 3).await;

        let mut consumer =
            InMemoryConsumer::new(broker.clone(), ConsumerSettings::default(), Some("g".into()));
        consumer.subscribe(&["t".to_string()]).unwrap();

        let mut seen = Vec::new();
        while let Some(record) = next_record(&mut consumer).await {
            seen.push(record.offset);
        }
        assert_eq!(seen, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_partition_eof_reported_once() {
        let broker = InMemoryBroker::new(1);
        broker.ensure_topic("t");
        let mut consumer =
            InMemoryConsumer::new(broker.clone(), ConsumerSettings::default(), Some("g".into()));
        consumer.subscribe(&["t".to_string()]).unwrap();

        assert!(matches!(
            consumer.poll(POLL).await.unwrap(),
            PollOutcome::PartitionEof { offset: 0, .. }
        ));
        assert_eq!(consumer.poll(POLL).await.unwrap(), PollOutcome::Idle);
    }

    #[tokio::test]
    async fn test_commit_resumes_next_member() {
        let broker = InMemoryBroker::new(1);
        produce(&broker, "t", "k", 3).await;

        let mut first =
            InMemoryConsumer::new(broker.clone(), ConsumerSettings::default(), Some("g".into()));
        first.subscribe(&["t".to_string()]).unwrap();
        let record = next_record(&mut first).await.unwrap();
        first.commit(&record).await.unwrap();
        // Second record is read but never committed.
        next_record(&mut first).await.unwrap();
        drop(first);

        assert_eq!(broker.committed_offset("g", "t", 0), Some(1));
        let mut second =
            InMemoryConsumer::new(broker.clone(), ConsumerSettings::default(), Some("g".into()));
        second.subscribe(&["t".to_string()]).unwrap();
        assert_eq!(next_record(&mut second).await.unwrap().offset, 1);
    }

    #[tokio::test]
    async fn test_poll_wakes_on_append() {
        let broker = InMemoryBroker::new(1);
        broker.ensure_topic("t");
        let mut consumer =
            InMemoryConsumer::new(broker.clone(), ConsumerSettings::default(), Some("g".into()));
        consumer.subscribe(&["t".to_string()]).unwrap();
        // Drain the EOF signal.
        consumer.poll(POLL).await.unwrap();

        let producer_broker = broker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            produce(&producer_broker, "t", "k", 1).await;
        });

        let outcome = consumer.poll(Duration::from_secs(2)).await.unwrap();
        assert!(matches!(outcome, PollOutcome::Record(_)));
    }

    #[tokio::test]
    async fn test_assign_without_group() {
        let broker = InMemoryBroker::new(2);
        produce(&broker, "t", "a", 2).await;
        let partition = crate::domain::partition_for_key(b"a", 2);

        let mut consumer = InMemoryConsumer::new(broker.clone(), ConsumerSettings::default(), None);
        assert!(consumer.subscribe(&["t".to_string()]).is_err());
        consumer
            .assign(&[TopicPartitionOffset::new("t", partition, Some(1))])
            .unwrap();

        let record = next_record(&mut consumer).await.unwrap();
        assert_eq!(record.offset, 1);
        assert!(consumer.commit(&record).await.is_err());
    }

    #[tokio::test]
    async fn test_close_leaves_group() {
        let broker = InMemoryBroker::new(1);
        let mut consumer =
            InMemoryConsumer::new(broker.clone(), ConsumerSettings::default(), Some("g".into()));
        consumer.subscribe(&["t".to_string()]).unwrap();
        assert_eq!(broker.group_members("g"), 1);

        consumer.close();
        consumer.close();
        assert_eq!(broker.group_members("g"), 0);
        assert_eq!(consumer.poll(POLL).await, Err(BrokerError::Closed));
    }
}
