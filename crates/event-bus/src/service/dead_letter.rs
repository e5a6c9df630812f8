//! # Dead-Letter Router
//!
//! Re-publishes messages the consumer could not process to `<topic>.dlq` as
//! JSON [`DeadLetterRecord`]s. Routing is best-effort: failures are logged
//! and never propagate into the consumer loop.

use std::sync::Arc;

use tracing::{error, warn};

use crate::domain::{dlq_topic, now_ms, ConsumedRecord, DeadLetterRecord, OutboundRecord};
use crate::metrics::BusMetrics;
use crate::ports::BrokerProducer;

/// Header carrying the failure reason on dead-lettered records.
pub const ERROR_HEADER: &str = "dlq.error";

pub struct DeadLetterRouter {
    producer: Arc<dyn BrokerProducer>,
    metrics: Arc<dyn BusMetrics>,
}

impl DeadLetterRouter {
    #[must_use]
    pub fn new(producer: Arc<dyn BrokerProducer>, metrics: Arc<dyn BusMetrics>) -> Self {
        Self { producer, metrics }
    }

    /// Publish `original` to its dead-letter topic with the failure context.
    ///
    /// Returns whether the broker acknowledged the dead-letter record.
    pub async fn send_to_dlq(&self, original: &ConsumedRecord, error: &str, attempts: u32) -> bool {
        let dlq = dlq_topic(&original.topic);
        let record = DeadLetterRecord::from_consumed(original, error, attempts, now_ms());
        let payload = match record.to_json_bytes() {
            Ok(payload) => payload,
            Err(e) => {
                error!(topic = %original.topic, error = %e, "Failed to encode dead-letter record");
                return false;
            }
        };

        let mut headers = original.headers.clone();
        headers.push((ERROR_HEADER.to_string(), error.as_bytes().to_vec()));
        let mut outbound = OutboundRecord::new(dlq.clone(), payload).with_headers(headers);
        outbound.key.clone_from(&original.key);

        let delivery = match self.producer.enqueue(outbound) {
            Ok(delivery) => delivery,
            Err(e) => {
                error!(topic = %dlq, error = %e, "Dead-letter enqueue rejected");
                return false;
            }
        };
        match delivery.await {
            Ok(report) => {
                self.metrics.record_dead_lettered(&original.topic);
                warn!(
                    topic = %original.topic,
                    partition = original.partition,
                    offset = original.offset,
                    dlq_offset = report.offset,
                    attempts,
                    error,
                    "Message routed to dead-letter topic"
                );
                true
            }
            Err(e) => {
                error!(
                    topic = %original.topic,
                    partition = original.partition,
                    offset = original.offset,
                    error = %e,
                    "Dead-letter delivery failed"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{InMemoryBroker, InMemoryProducer};
    use crate::domain::ProducerSettings;
    use crate::metrics::Metrics;
    use std::time::Duration;

    fn original() -> ConsumedRecord {
        ConsumedRecord {
            topic: "call.events".into(),
            partition: 1,
            offset: 8,
            key: Some(b"c1".to_vec()),
            payload: Some(vec![0, 0, 0, 0, 1, 42]),
            headers: vec![("traceparent".into(), b"00-1-2-01".to_vec())],
            timestamp_ms: Some(10),
        }
    }

    #[tokio::test]
    async fn test_routes_json_record_to_dlq_topic() {
        let broker = InMemoryBroker::new(1);
        let metrics = Arc::new(Metrics::new());
        let router = DeadLetterRouter::new(
            Arc::new(InMemoryProducer::new(broker.clone(), ProducerSettings::default())),
            metrics.clone(),
        );

        assert!(router.send_to_dlq(&original(), "handler exploded", 2).await);

        let records = broker.records("call.events.dlq");
        assert_eq!(records.len(), 1);
        let dead = DeadLetterRecord::from_json_bytes(records[0].payload.as_deref().unwrap()).unwrap();
        assert_eq!(dead.original_topic, "call.events");
        assert_eq!(dead.original_partition, 1);
        assert_eq!(dead.original_offset, 8);
        assert_eq!(dead.error, "handler exploded");
        assert_eq!(dead.attempts, 2);
        assert_eq!(dead.value, Some(vec![0, 0, 0, 0, 1, 42]));
        assert_eq!(records[0].key.as_deref(), Some(&b"c1"[..]));
        assert_eq!(records[0].header("traceparent"), Some(&b"00-1-2-01"[..]));
        assert_eq!(records[0].header(ERROR_HEADER), Some(&b"handler exploded"[..]));
        assert_eq!(metrics.snapshot().dead_lettered, 1);
    }

    #[tokio::test]
    async fn test_failure_is_swallowed() {
        let broker = InMemoryBroker::new(1);
        let settings = ProducerSettings {
            delivery_timeout: Duration::from_millis(20),
            retry_backoff: Duration::from_millis(2),
            ..ProducerSettings::default()
        };
        let router = DeadLetterRouter::new(
            Arc::new(InMemoryProducer::new(broker.clone(), settings)),
            Arc::new(Metrics::new()),
        );
        broker.set_unavailable(true);

        assert!(!router.send_to_dlq(&original(), "boom", 1).await);
        assert!(broker.records("call.events.dlq").is_empty());
    }
}
