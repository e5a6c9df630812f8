//! # Event Producer
//!
//! Turns events into framed Avro records and hands them to the broker
//! producer. Two entry points:
//!
//! - [`EventProducer::publish`] enqueues and returns a [`DeliveryHandle`]
//!   that resolves exactly once with the broker's verdict.
//! - [`EventProducer::publish_event`] waits for that verdict (and flushes),
//!   returning `Ok(true)` on acknowledgement and `Ok(false)` on a failed
//!   delivery. Invalid input and serialization failures are `Err`.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, error, warn};

use super::serde_cache::SerdeCache;
use crate::domain::{now_ms, validate_topic, DeliveryReport, Event, Headers, OutboundRecord, ProducerSettings};
use crate::error::{BrokerError, BusError};
use crate::metrics::BusMetrics;
use crate::ports::BrokerProducer;

/// Single-resolution handle for one published event.
///
/// Dropping the handle does not cancel delivery.
#[derive(Debug)]
pub struct DeliveryHandle {
    topic: String,
    event_id: String,
    rx: oneshot::Receiver<Result<DeliveryReport, BrokerError>>,
}

impl DeliveryHandle {
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Id of the event as published (generated if the caller left it out).
    #[must_use]
    pub fn event_id(&self) -> &str {
        &self.event_id
    }
}

impl Future for DeliveryHandle {
    type Output = Result<DeliveryReport, BusError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(Ok(report))) => Poll::Ready(Ok(report)),
            Poll::Ready(Ok(Err(e))) => Poll::Ready(Err(BusError::Delivery {
                topic: self.topic.clone(),
                reason: e.to_string(),
            })),
            Poll::Ready(Err(_)) => Poll::Ready(Err(BusError::Delivery {
                topic: self.topic.clone(),
                reason: "delivery task dropped before resolving".to_string(),
            })),
            Poll::Pending => Poll::Pending,
        }
    }
}

pub struct EventProducer {
    broker: Arc<dyn BrokerProducer>,
    serdes: Arc<SerdeCache>,
    settings: ProducerSettings,
    metrics: Arc<dyn BusMetrics>,
    closed: AtomicBool,
}

impl EventProducer {
    #[must_use]
    pub fn new(
        broker: Arc<dyn BrokerProducer>,
        serdes: Arc<SerdeCache>,
        settings: ProducerSettings,
        metrics: Arc<dyn BusMetrics>,
    ) -> Self {
        Self {
            broker,
            serdes,
            settings,
            metrics,
            closed: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn settings(&self) -> &ProducerSettings {
        &self.settings
    }

    /// Serialize and enqueue `event`, returning its delivery handle.
    ///
    /// # Errors
    ///
    /// `InvalidTopic`, serialization failures, `ShuttingDown`, or an
    /// immediate broker rejection.
    pub async fn publish(
        &self,
        topic: &str,
        key: &str,
        mut event: Event,
        headers: Option<Headers>,
    ) -> Result<DeliveryHandle, BusError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BusError::ShuttingDown);
        }
        validate_topic(topic)?;

        event.ensure_envelope(now_ms());
        let event_id = event.event_id().unwrap_or_default().to_string();
        let payload = self.serdes.get_serializer(topic).await.serialize(&event)?;

        let record = OutboundRecord::new(topic, payload)
            .with_key(key.as_bytes())
            .with_headers(headers.unwrap_or_default());
        let delivery = self.broker.enqueue(record).map_err(|e| {
            self.metrics.record_publish_failed(topic);
            BusError::Broker(e)
        })?;

        let (tx, rx) = oneshot::channel();
        let metrics = Arc::clone(&self.metrics);
        let owned_topic = topic.to_string();
        let owned_key = key.to_string();
        let owned_id = event_id.clone();
        tokio::spawn(async move {
            let result = delivery.await;
            match &result {
                Ok(report) => {
                    metrics.record_published(&owned_topic);
                    debug!(
                        topic = %report.topic,
                        partition = report.partition,
                        offset = report.offset,
                        key = %owned_key,
                        event_id = %owned_id,
                        "Event delivered"
                    );
                }
                Err(e) => {
                    metrics.record_publish_failed(&owned_topic);
                    error!(
                        topic = %owned_topic,
                        key = %owned_key,
                        event_id = %owned_id,
                        error = %e,
                        "Event delivery failed"
                    );
                }
            }
            let _ = tx.send(result);
        });

        Ok(DeliveryHandle {
            topic: topic.to_string(),
            event_id,
            rx,
        })
    }

    /// Publish and wait for the broker's verdict.
    ///
    /// # Errors
    ///
    /// Same as [`publish`](Self::publish); delivery failures are `Ok(false)`.
    pub async fn publish_event(
        &self,
        topic: &str,
        key: &str,
        event: Event,
        headers: Option<Headers>,
    ) -> Result<bool, BusError> {
        let handle = self.publish(topic, key, event, headers).await?;
        let outcome = handle.await;

        if self.settings.flush_on_publish {
            if let Err(e) = self.broker.flush(self.settings.flush_timeout).await {
                warn!(topic, error = %e, "Flush after publish did not complete");
            }
        }

        match outcome {
            Ok(_) => Ok(true),
            Err(BusError::Delivery { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Wait for every enqueued record to resolve.
    ///
    /// # Errors
    ///
    /// `BrokerError::FlushTimeout` if deliveries are still pending at `timeout`.
    pub async fn flush(&self, timeout: Duration) -> Result<(), BusError> {
        Ok(self.broker.flush(timeout).await?)
    }

    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.broker.in_flight()
    }

    /// Refuse further publishes and drain what is in flight.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Err(e) = self.broker.flush(self.settings.flush_timeout).await {
            warn!(error = %e, "Producer closed with undelivered records");
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
