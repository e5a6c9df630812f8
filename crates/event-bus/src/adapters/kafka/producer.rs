use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use rdkafka::config::ClientConfig;
use rdkafka::error::KafkaError;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::util::Timeout;

use super::broker_error;
use crate::domain::{now_ms, DeliveryReport, OutboundRecord, ProducerSettings};
use crate::error::BrokerError;
use crate::ports::{BrokerProducer, DeliveryFuture};

/// Idempotent producer; librdkafka owns retries and sequencing.
#[derive(Clone)]
pub struct KafkaProducer {
    inner: FutureProducer,
    settings: ProducerSettings,
}

impl KafkaProducer {
    /// # Errors
    ///
    /// librdkafka rejected the configuration.
    pub fn new(config: &ClientConfig, settings: ProducerSettings) -> Result<Self, BrokerError> {
        let inner: FutureProducer = config
            .create()
            .map_err(|e| BrokerError::Configuration(e.to_string()))?;
        Ok(Self { inner, settings })
    }
}

fn delivery_error(e: &KafkaError, settings: &ProducerSettings) -> BrokerError {
    if e.rdkafka_error_code() == Some(RDKafkaErrorCode::MessageTimedOut) {
        return BrokerError::DeliveryTimeout {
            elapsed_ms: u64::try_from(settings.delivery_timeout.as_millis()).unwrap_or(u64::MAX),
            last_error: e.to_string(),
        };
    }
    broker_error(e)
}

#[async_trait]
impl BrokerProducer for KafkaProducer {
    fn enqueue(&self, record: OutboundRecord) -> Result<DeliveryFuture, BrokerError> {
        let timestamp_ms = record.timestamp_ms.unwrap_or_else(now_ms);
        let mut headers = OwnedHeaders::new_with_capacity(record.headers.len());
        for (name, value) in &record.headers {
            headers = headers.insert(Header {
                key: name.as_str(),
                value: Some(value.as_slice()),
            });
        }

        let mut outbound = FutureRecord::to(&record.topic)
            .payload(&record.payload)
            .headers(headers)
            .timestamp(timestamp_ms);
        if let Some(key) = &record.key {
            outbound = outbound.key(key);
        }

        let pending = self
            .inner
            .send_result(outbound)
            .map_err(|(e, _)| broker_error(&e))?;

        let settings = self.settings.clone();
        let topic = record.topic.clone();
        Ok(async move {
            match pending.await {
                Ok(Ok((partition, offset))) => Ok(DeliveryReport {
                    topic,
                    partition,
                    offset,
                    timestamp_ms,
                }),
                Ok(Err((e, _))) => Err(delivery_error(&e, &settings)),
                Err(_canceled) => Err(BrokerError::Closed),
            }
        }
        .boxed())
    }

    async fn flush(&self, timeout: Duration) -> Result<(), BrokerError> {
        let producer = self.inner.clone();
        tokio::task::spawn_blocking(move || producer.flush(Timeout::After(timeout)))
            .await
            .map_err(|e| BrokerError::Transport(format!("flush task failed: {e}")))?
            .map_err(|e| match e.rdkafka_error_code() {
                Some(RDKafkaErrorCode::OperationTimedOut) => BrokerError::FlushTimeout {
                    pending: usize::try_from(self.inner.in_flight_count()).unwrap_or(0),
                },
                _ => broker_error(&e),
            })
    }

    fn in_flight(&self) -> usize {
        usize::try_from(self.inner.in_flight_count()).unwrap_or(0)
    }
}
