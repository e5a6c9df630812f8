//! # In-Memory Broker
//!
//! A partitioned, append-only log living in the process. It keeps the broker
//! behaviour the bus relies on:
//!
//! - per-partition offsets starting at 0, record timestamps
//! - idempotent producer state: `(producer id, partition) -> last sequence`,
//!   with duplicates acknowledged at their original offset and gaps rejected
//!   as out-of-order
//! - consumer groups with committed offsets and generation-based rebalance
//! - a timestamp lookup for replay
//!
//! Faults can be injected to exercise producer retries.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use tracing::{debug, info};

use crate::domain::{ConsumedRecord, Headers, ProducerSettings};
use crate::error::BrokerError;

/// Fault applied to the next append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The append is rejected before anything is written.
    Unavailable,
    /// The append is written but the acknowledgement never reaches the producer.
    AckLost,
}

#[derive(Debug)]
struct StoredRecord {
    /// `(producer id, sequence)` that wrote the record.
    origin: (u64, i32),
    key: Option<Vec<u8>>,
    payload: Option<Vec<u8>>,
    headers: Headers,
    timestamp_ms: i64,
}

#[derive(Debug)]
struct ProducerState {
    last_sequence: i32,
    /// `(sequence, offset)` of the most recent appends.
    recent: VecDeque<(i32, i64)>,
}

#[derive(Debug, Default)]
struct PartitionLog {
    records: Vec<StoredRecord>,
    producers: HashMap<u64, ProducerState>,
}

#[derive(Debug, Default)]
struct GroupState {
    generation: u64,
    members: BTreeMap<u64, Vec<String>>,
    committed: HashMap<(String, i32), i64>,
}

#[derive(Debug, Default)]
struct FaultPlan {
    queued: VecDeque<Fault>,
    unavailable: bool,
}

#[derive(Debug)]
pub(crate) struct BrokerState {
    default_partitions: i32,
    topics: RwLock<HashMap<String, Vec<PartitionLog>>>,
    groups: Mutex<HashMap<String, GroupState>>,
    faults: Mutex<FaultPlan>,
    next_client_id: AtomicU64,
    /// Signalled on every append and group change.
    pub(crate) changed: Notify,
}

/// One produce attempt.
#[derive(Debug, Clone)]
pub(crate) struct AppendRequest {
    pub topic: String,
    pub partition: i32,
    pub producer_id: u64,
    pub sequence: i32,
    pub key: Option<Vec<u8>>,
    pub payload: Vec<u8>,
    pub headers: Headers,
    pub timestamp_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct AppendAck {
    pub offset: i64,
    pub timestamp_ms: i64,
    pub duplicate: bool,
}

/// Handle to a shared in-process broker. Clones share the same log.
#[derive(Debug, Clone)]
pub struct InMemoryBroker {
    pub(crate) state: Arc<BrokerState>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new(crate::domain::config::DEFAULT_MEMORY_PARTITIONS)
    }
}

impl InMemoryBroker {
    /// Topics are auto-created with `default_partitions` partitions.
    #[must_use]
    pub fn new(default_partitions: i32) -> Self {
        Self {
            state: Arc::new(BrokerState {
                default_partitions: default_partitions.max(1),
                topics: RwLock::new(HashMap::new()),
                groups: Mutex::new(HashMap::new()),
                faults: Mutex::new(FaultPlan::default()),
                next_client_id: AtomicU64::new(1),
                changed: Notify::new(),
            }),
        }
    }

    #[must_use]
    pub fn default_partitions(&self) -> i32 {
        self.state.default_partitions
    }

    /// Create `topic` with an explicit partition count.
    ///
    /// Returns `false` if the topic already existed.
    pub fn create_topic(&self, topic: &str, partitions: i32) -> bool {
        let mut topics = self.state.topics.write();
        if topics.contains_key(topic) {
            return false;
        }
        let partitions = partitions.max(1);
        topics.insert(
            topic.to_string(),
            (0..partitions).map(|_| PartitionLog::default()).collect(),
        );
        info!(topic, partitions, "Created topic");
        true
    }

    /// Partition count, creating the topic on first use.
    pub fn ensure_topic(&self, topic: &str) -> i32 {
        if let Some(count) = self.partition_count(topic) {
            return count;
        }
        self.create_topic(topic, self.state.default_partitions);
        self.partition_count(topic)
            .unwrap_or(self.state.default_partitions)
    }

    #[must_use]
    pub fn partition_count(&self, topic: &str) -> Option<i32> {
        self.state
            .topics
            .read()
            .get(topic)
            .map(|p| i32::try_from(p.len()).unwrap_or(i32::MAX))
    }

    #[must_use]
    pub fn topic_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.topics.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Offset the next record in the partition will get.
    #[must_use]
    pub fn high_watermark(&self, topic: &str, partition: i32) -> i64 {
        self.state
            .topics
            .read()
            .get(topic)
            .and_then(|parts| parts.get(usize::try_from(partition).ok()?))
            .map_or(0, |log| log.records.len() as i64)
    }

    /// Every record of `topic`, partition by partition in offset order.
    #[must_use]
    pub fn records(&self, topic: &str) -> Vec<ConsumedRecord> {
        let topics = self.state.topics.read();
        let Some(partitions) = topics.get(topic) else {
            return Vec::new();
        };
        partitions
            .iter()
            .enumerate()
            .flat_map(|(p, log)| {
                log.records.iter().enumerate().map(move |(offset, stored)| {
                    to_consumed(topic, p as i32, offset as i64, stored)
                })
            })
            .collect()
    }

    #[must_use]
    pub fn partition_records(&self, topic: &str, partition: i32) -> Vec<ConsumedRecord> {
        self.records(topic)
            .into_iter()
            .filter(|r| r.partition == partition)
            .collect()
    }

    /// Next offset the group will read from `topic/partition`, if committed.
    #[must_use]
    pub fn committed_offset(&self, group: &str, topic: &str, partition: i32) -> Option<i64> {
        self.state
            .groups
            .lock()
            .get(group)
            .and_then(|g| g.committed.get(&(topic.to_string(), partition)).copied())
    }

    #[must_use]
    pub fn group_members(&self, group: &str) -> usize {
        self.state
            .groups
            .lock()
            .get(group)
            .map_or(0, |g| g.members.len())
    }

    /// Queue a fault for the next append.
    pub fn inject_fault(&self, fault: Fault) {
        self.inject_faults(fault, 1);
    }

    pub fn inject_faults(&self, fault: Fault, count: usize) {
        let mut plan = self.state.faults.lock();
        plan.queued.extend(std::iter::repeat(fault).take(count));
    }

    /// While set, every append is rejected as unavailable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.faults.lock().unavailable = unavailable;
    }

    #[must_use]
    pub fn pending_faults(&self) -> usize {
        self.state.faults.lock().queued.len()
    }

    // -------------------------------------------------------------------------
    // Crate-internal broker protocol
    // -------------------------------------------------------------------------

    pub(crate) fn next_client_id(&self) -> u64 {
        self.state.next_client_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn append(&self, request: &AppendRequest) -> Result<AppendAck, BrokerError> {
        let fault = {
            let mut plan = self.state.faults.lock();
            if plan.unavailable {
                Some(Fault::Unavailable)
            } else {
                plan.queued.pop_front()
            }
        };
        if fault == Some(Fault::Unavailable) {
            return Err(BrokerError::Unavailable(format!(
                "{}/{} not accepting writes",
                request.topic, request.partition
            )));
        }

        let ack = {
            let mut topics = self.state.topics.write();
            let log = topics
                .get_mut(&request.topic)
                .and_then(|parts| parts.get_mut(usize::try_from(request.partition).ok()?))
                .ok_or_else(|| BrokerError::UnknownPartition {
                    topic: request.topic.clone(),
                    partition: request.partition,
                })?;
            Self::append_to_log(log, request)?
        };

        if !ack.duplicate {
            self.state.changed.notify_waiters();
        }
        if fault == Some(Fault::AckLost) {
            debug!(
                topic = %request.topic,
                partition = request.partition,
                sequence = request.sequence,
                "Dropping acknowledgement"
            );
            return Err(BrokerError::AckLost {
                topic: request.topic.clone(),
                partition: request.partition,
            });
        }
        Ok(ack)
    }

    fn append_to_log(log: &mut PartitionLog, request: &AppendRequest) -> Result<AppendAck, BrokerError> {
        let producer = log
            .producers
            .entry(request.producer_id)
            .or_insert_with(|| ProducerState {
                last_sequence: -1,
                recent: VecDeque::with_capacity(ProducerSettings::MAX_IN_FLIGHT),
            });

        if request.sequence <= producer.last_sequence {
            let offset = producer
                .recent
                .iter()
                .find(|(seq, _)| *seq == request.sequence)
                .map(|(_, offset)| *offset)
                .or_else(|| {
                    log.records
                        .iter()
                        .rposition(|r| r.origin == (request.producer_id, request.sequence))
                        .and_then(|i| i64::try_from(i).ok())
                })
                .ok_or_else(|| {
                    BrokerError::Transport(format!(
                        "duplicate sequence {} outside the idempotence window",
                        request.sequence
                    ))
                })?;
            let timestamp_ms = usize::try_from(offset)
                .ok()
                .and_then(|i| log.records.get(i))
                .map_or(request.timestamp_ms, |r| r.timestamp_ms);
            return Ok(AppendAck {
                offset,
                timestamp_ms,
                duplicate: true,
            });
        }

        let expected = producer.last_sequence.wrapping_add(1);
        if request.sequence != expected {
            return Err(BrokerError::OutOfOrderSequence {
                topic: request.topic.clone(),
                partition: request.partition,
                expected,
                actual: request.sequence,
            });
        }

        let offset = log.records.len() as i64;
        log.records.push(StoredRecord {
            origin: (request.producer_id, request.sequence),
            key: request.key.clone(),
            payload: Some(request.payload.clone()),
            headers: request.headers.clone(),
            timestamp_ms: request.timestamp_ms,
        });
        producer.last_sequence = request.sequence;
        producer.recent.push_back((request.sequence, offset));
        if producer.recent.len() > ProducerSettings::MAX_IN_FLIGHT {
            producer.recent.pop_front();
        }

        Ok(AppendAck {
            offset,
            timestamp_ms: request.timestamp_ms,
            duplicate: false,
        })
    }

    pub(crate) fn read(&self, topic: &str, partition: i32, offset: i64) -> Option<ConsumedRecord> {
        let topics = self.state.topics.read();
        let log = topics.get(topic)?.get(usize::try_from(partition).ok()?)?;
        let stored = log.records.get(usize::try_from(offset).ok()?)?;
        Some(to_consumed(topic, partition, offset, stored))
    }

    pub(crate) fn offsets_for_timestamp(&self, topic: &str, timestamp_ms: i64) -> Vec<(i32, Option<i64>)> {
        let topics = self.state.topics.read();
        let Some(partitions) = topics.get(topic) else {
            return Vec::new();
        };
        partitions
            .iter()
            .enumerate()
            .map(|(p, log)| {
                let offset = log
                    .records
                    .iter()
                    .position(|r| r.timestamp_ms >= timestamp_ms)
                    .map(|i| i as i64);
                (p as i32, offset)
            })
            .collect()
    }

    pub(crate) fn join_group(&self, group: &str, member: u64, topics: &[String]) {
        for topic in topics {
            self.ensure_topic(topic);
        }
        {
            let mut groups = self.state.groups.lock();
            let state = groups.entry(group.to_string()).or_default();
            state.members.insert(member, topics.to_vec());
            state.generation += 1;
            info!(group, member, generation = state.generation, "Member joined group");
        }
        self.state.changed.notify_waiters();
    }

    pub(crate) fn leave_group(&self, group: &str, member: u64) {
        let left = {
            let mut groups = self.state.groups.lock();
            match groups.get_mut(group) {
                Some(state) if state.members.contains_key(&member) => {
                    state.members.remove(&member);
                    state.generation += 1;
                    info!(group, member, generation = state.generation, "Member left group");
                    true
                }
                _ => false,
            }
        };
        if left {
            self.state.changed.notify_waiters();
        }
    }

    pub(crate) fn generation(&self, group: &str) -> u64 {
        self.state
            .groups
            .lock()
            .get(group)
            .map_or(0, |g| g.generation)
    }

    /// Partitions owned by `member`: for each subscribed topic, partition `p`
    /// goes to the `p mod n`-th of the `n` members subscribed to that topic.
    pub(crate) fn assignment(&self, group: &str, member: u64) -> (u64, Vec<(String, i32)>) {
        let groups = self.state.groups.lock();
        let Some(state) = groups.get(group) else {
            return (0, Vec::new());
        };
        if !state.members.contains_key(&member) {
            return (state.generation, Vec::new());
        }

        let topics = self.state.topics.read();
        let subscribed: BTreeSet<&String> = state.members.values().flatten().collect();
        let mut owned = Vec::new();
        for topic in subscribed {
            let members: Vec<u64> = state
                .members
                .iter()
                .filter(|(_, t)| t.contains(topic))
                .map(|(id, _)| *id)
                .collect();
            let partitions = topics.get(topic.as_str()).map_or(0, Vec::len);
            for p in 0..partitions {
                if members[p % members.len()] == member {
                    owned.push((topic.clone(), p as i32));
                }
            }
        }
        (state.generation, owned)
    }

    pub(crate) fn commit(&self, group: &str, topic: &str, partition: i32, next_offset: i64) {
        let mut groups = self.state.groups.lock();
        let state = groups.entry(group.to_string()).or_default();
        state
            .committed
            .insert((topic.to_string(), partition), next_offset);
    }
}

fn to_consumed(topic: &str, partition: i32, offset: i64, stored: &StoredRecord) -> ConsumedRecord {
    ConsumedRecord {
        topic: topic.to_string(),
        partition,
        offset,
        key: stored.key.clone(),
        payload: stored.payload.clone(),
        headers: stored.headers.clone(),
        timestamp_ms: Some(stored.timestamp_ms),
    }
}
