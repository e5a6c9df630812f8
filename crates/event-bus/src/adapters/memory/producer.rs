//! Idempotent producer for the in-memory broker.
//!
//! Sequence numbers are assigned per partition at enqueue time and the first
//! append happens synchronously, so enqueue order is log order. Retries reuse
//! the same sequence; the broker acknowledges duplicates at their original
//! offset and rejects gaps, which keeps per-partition order under retries.
//!
//! Retries run on a spawned task, so a caller that drops its delivery future
//! still gets the record written.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{oneshot, Notify};
use tokio::time::Instant;
use tracing::{debug, warn};

use super::broker::{AppendAck, AppendRequest, InMemoryBroker};
use crate::domain::{now_ms, partition_for_key, DeliveryReport, OutboundRecord, ProducerSettings};
use crate::error::BrokerError;
use crate::ports::{BrokerProducer, DeliveryFuture};

/// Producer identity plus the next sequence per partition.
///
/// A delivery that times out leaves a gap the broker will never accept, so
/// the session is replaced (new producer id, sequences from 0).
#[derive(Debug)]
struct Session {
    producer_id: u64,
    sequences: HashMap<(String, i32), i32>,
}

#[derive(Debug, Default)]
struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

struct InFlightGuard(Arc<InFlight>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.0.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

pub struct InMemoryProducer {
    broker: InMemoryBroker,
    settings: ProducerSettings,
    session: Arc<Mutex<Session>>,
    round_robin: AtomicU32,
    in_flight: Arc<InFlight>,
}

impl InMemoryProducer {
    #[must_use]
    pub fn new(broker: InMemoryBroker, settings: ProducerSettings) -> Self {
        let producer_id = broker.next_client_id();
        Self {
            broker,
            settings,
            session: Arc::new(Mutex::new(Session {
                producer_id,
                sequences: HashMap::new(),
            })),
            round_robin: AtomicU32::new(0),
            in_flight: Arc::new(InFlight::default()),
        }
    }

    #[must_use]
    pub fn producer_id(&self) -> u64 {
        self.session.lock().producer_id
    }

    fn choose_partition(&self, key: Option<&[u8]>, partitions: i32) -> i32 {
        match key {
            Some(key) => partition_for_key(key, partitions),
            None => {
                let next = self.round_robin.fetch_add(1, Ordering::Relaxed);
                i32::try_from(next % partitions.unsigned_abs()).unwrap_or(0)
            }
        }
    }
}

#[async_trait]
impl BrokerProducer for InMemoryProducer {
    fn enqueue(&self, record: OutboundRecord) -> Result<DeliveryFuture, BrokerError> {
        let partitions = self.broker.ensure_topic(&record.topic);
        let partition = self.choose_partition(record.key.as_deref(), partitions);

        let (producer_id, sequence) = {
            let mut session = self.session.lock();
            let next = session
                .sequences
                .entry((record.topic.clone(), partition))
                .or_insert(0);
            let sequence = *next;
            *next = next.wrapping_add(1);
            (session.producer_id, sequence)
        };

        let request = AppendRequest {
            topic: record.topic,
            partition,
            producer_id,
            sequence,
            key: record.key,
            payload: record.payload,
            headers: record.headers,
            timestamp_ms: record.timestamp_ms.unwrap_or_else(now_ms),
        };
        let first_attempt = self.broker.append(&request);

        self.in_flight.count.fetch_add(1, Ordering::AcqRel);
        let guard = InFlightGuard(Arc::clone(&self.in_flight));
        let broker = self.broker.clone();
        let session = Arc::clone(&self.session);
        let retry_backoff = self.settings.retry_backoff;
        let delivery_timeout = self.settings.delivery_timeout;

        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let _guard = guard;
            let result = deliver(
                &broker,
                &session,
                request,
                first_attempt,
                retry_backoff,
                delivery_timeout,
            )
            .await;
            let _ = tx.send(result);
        });

        Ok(Box::pin(async move {
            rx.await.unwrap_or(Err(BrokerError::Closed))
        }))
    }

    async fn flush(&self, timeout: Duration) -> Result<(), BrokerError> {
        let deadline = Instant::now() + timeout;
        loop {
            let idle = self.in_flight.idle.notified();
            tokio::pin!(idle);
            idle.as_mut().enable();

            if self.in_flight.count.load(Ordering::Acquire) == 0 {
                return Ok(());
            }
            if tokio::time::timeout_at(deadline, idle).await.is_err() {
                return Err(BrokerError::FlushTimeout {
                    pending: self.in_flight.count.load(Ordering::Acquire),
                });
            }
        }
    }

    fn in_flight(&self) -> usize {
        self.in_flight.count.load(Ordering::Acquire)
    }
}

/// Drive one record to a verdict, retrying retriable errors with the same
/// sequence until the delivery timeout.
async fn deliver(
    broker: &InMemoryBroker,
    session: &Mutex<Session>,
    request: AppendRequest,
    first_attempt: Result<AppendAck, BrokerError>,
    retry_backoff: Duration,
    delivery_timeout: Duration,
) -> Result<DeliveryReport, BrokerError> {
    let started = Instant::now();
    let mut attempt = first_attempt;
    let mut retries = 0u32;
    loop {
        match attempt {
            Ok(ack) => {
                if ack.duplicate {
                    debug!(
                        topic = %request.topic,
                        partition = request.partition,
                        sequence = request.sequence,
                        "Retry acknowledged as duplicate"
                    );
                }
                return Ok(DeliveryReport {
                    topic: request.topic,
                    partition: request.partition,
                    offset: ack.offset,
                    timestamp_ms: ack.timestamp_ms,
                });
            }
            Err(err) if err.is_retriable() => {
                if started.elapsed() + retry_backoff >= delivery_timeout {
                    warn!(
                        topic = %request.topic,
                        partition = request.partition,
                        retries,
                        error = %err,
                        "Delivery timed out"
                    );
                    reset_session(broker, session, request.producer_id);
                    return Err(BrokerError::DeliveryTimeout {
                        elapsed_ms: u64::try_from(started.elapsed().as_millis())
                            .unwrap_or(u64::MAX),
                        last_error: err.to_string(),
                    });
                }
                retries += 1;
                debug!(
                    topic = %request.topic,
                    partition = request.partition,
                    sequence = request.sequence,
                    retries,
                    error = %err,
                    "Retrying send"
                );
                tokio::time::sleep(retry_backoff).await;
                attempt = broker.append(&request);
            }
            Err(err) => return Err(err),
        }
    }
}

fn reset_session(broker: &InMemoryBroker, session: &Mutex<Session>, failed_id: u64) {
    let mut session = session.lock();
    if session.producer_id == failed_id {
        session.producer_id = broker.next_client_id();
        session.sequences.clear();
        debug!(producer_id = session.producer_id, "Producer session reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::Fault;

    fn settings(delivery_timeout_ms: u64) -> ProducerSettings {
        ProducerSettings {
            delivery_timeout: Duration::from_millis(delivery_timeout_ms),
            retry_backoff: Duration::from_millis(2),
            ..ProducerSettings::default()
        }
    }

    #[tokio::test]
    async fn test_same_key_same_partition() {
        let broker = InMemoryBroker::new(4);
        let producer = InMemoryProducer::new(broker.clone(), settings(1_000));

        let mut partitions = Vec::new();
        for i in 0..5u8 {
            let record = OutboundRecord::new("call.events", vec![i]).with_key("tenant-7");
            partitions.push(producer.enqueue(record).unwrap().await.unwrap().partition);
        }
        assert!(partitions.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(
            partitions[0],
            partition_for_key(b"tenant-7", 4),
            "routing must follow the key partitioner"
        );
    }

    #[tokio::test]
    async fn test_lost_ack_retry_does_not_duplicate() {
        let broker = InMemoryBroker::new(1);
        let producer = InMemoryProducer::new(broker.clone(), settings(1_000));
        broker.inject_faults(Fault::AckLost, 2);

        let report = producer
            .enqueue(OutboundRecord::new("t", b"once".to_vec()).with_key("k"))
            .unwrap()
            .await
            .unwrap();

        assert_eq!(report.offset, 0);
        assert_eq!(broker.records("t").len(), 1);
    }

    #[tokio::test]
    async fn test_unavailable_preserves_order() {
        let broker = InMemoryBroker::new(1);
        let producer = InMemoryProducer::new(broker.clone(), settings(2_000));
        broker.inject_faults(Fault::Unavailable, 3);

        let futures: Vec<_> = (0..5u8)
            .map(|i| {
                producer
                    .enqueue(OutboundRecord::new("t", vec![i]).with_key("k"))
                    .unwrap()
            })
            .collect();
        for fut in futures {
            fut.await.unwrap();
        }

        let payloads: Vec<Vec<u8>> = broker
            .records("t")
            .into_iter()
            .filter_map(|r| r.payload)
            .collect();
        assert_eq!(payloads, (0..5u8).map(|i| vec![i]).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_delivery_timeout_then_recovery() {
        let broker = InMemoryBroker::new(1);
        let producer = InMemoryProducer::new(broker.clone(), settings(30));
        broker.set_unavailable(true);

        let first_id = producer.producer_id();
        let err = producer
            .enqueue(OutboundRecord::new("t", b"lost".to_vec()))
            .unwrap()
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::DeliveryTimeout { .. }));
        assert_ne!(producer.producer_id(), first_id);

        broker.set_unavailable(false);
        let report = producer
            .enqueue(OutboundRecord::new("t", b"kept".to_vec()))
            .unwrap()
            .await
            .unwrap();
        assert_eq!(report.offset, 0);
    }

    #[tokio::test]
    async fn test_flush_waits_for_in_flight() {
        let broker = InMemoryBroker::new(1);
        let producer = InMemoryProducer::new(broker.clone(), settings(1_000));
        broker.inject_fault(Fault::Unavailable);

        let pending = producer
            .enqueue(OutboundRecord::new("t", b"x".to_vec()))
            .unwrap();
        assert_eq!(producer.in_flight(), 1);
        let handle = tokio::spawn(pending);

        producer.flush(Duration::from_secs(1)).await.unwrap();
        assert_eq!(producer.in_flight(), 0);
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_flush_times_out() {
        let broker = InMemoryBroker::new(1);
        let producer = InMemoryProducer::new(broker.clone(), settings(5_000));
        broker.set_unavailable(true);
        let _pending = producer
            .enqueue(OutboundRecord::new("t", b"x".to_vec()))
            .unwrap();

        let err = producer.flush(Duration::from_millis(10)).await.unwrap_err();
        assert_eq!(err, BrokerError::FlushTimeout { pending: 1 });
        broker.set_unavailable(false);
    }

    #[tokio::test]
    async fn test_dropped_delivery_still_retries() {
        let broker = InMemoryBroker::new(1);
        let producer = InMemoryProducer::new(broker.clone(), settings(2_000));
        broker.inject_fault(Fault::Unavailable);

        drop(
            producer
                .enqueue(OutboundRecord::new("t", b"a".to_vec()).with_key("k"))
                .unwrap(),
        );
        let report = producer
            .enqueue(OutboundRecord::new("t", b"b".to_vec()).with_key("k"))
            .unwrap()
            .await
            .unwrap();
        assert_eq!(report.offset, 1);

        producer.flush(Duration::from_secs(1)).await.unwrap();
        let payloads: Vec<Vec<u8>> = broker
            .records("t")
            .into_iter()
            .filter_map(|r| r.payload)
            .collect();
        assert_eq!(payloads, vec![b"a".to_vec(), b"b".to_vec()]);
    }
}
