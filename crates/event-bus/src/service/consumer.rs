//! # Consumer Loop
//!
//! ```text
//! poll ──► Idle / EOF / error ──► poll again
//!   │
//!   ▼ record
//! deserialize ──fail──► DLQ ──────────────┐
//!   │                                     │
//!   ▼                                     ▼
//! handler ──fail (after retries)──► DLQ ──► commit(offset + 1)
//!   │                                     ▲
//!   └──ok─────────────────────────────────┘
//! ```
//!
//! An offset is committed only once its message is resolved, either handled
//! or dead-lettered. Messages read but not yet resolved when the loop stops
//! are redelivered to the partition's next owner.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, trace, warn};

use super::dead_letter::DeadLetterRouter;
use super::serde_cache::SerdeCache;
use crate::domain::{ConsumePolicy, ConsumedRecord, PollOutcome};
use crate::error::BusError;
use crate::metrics::BusMetrics;
use crate::ports::{BrokerConsumer, EventHandler};

/// Closes the consumer however the loop ends, including when its future is dropped.
struct ConsumerGuard(Box<dyn BrokerConsumer>);

impl Drop for ConsumerGuard {
    fn drop(&mut self) {
        self.0.close();
    }
}

/// How a message left the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Handled,
    DeadLettered,
}

pub struct ConsumerLoop {
    topics: Vec<String>,
    group_id: String,
    serdes: Arc<SerdeCache>,
    dead_letters: Arc<DeadLetterRouter>,
    policy: ConsumePolicy,
    poll_timeout: Duration,
    metrics: Arc<dyn BusMetrics>,
}

impl ConsumerLoop {
    #[must_use]
    pub fn new(
        topics: Vec<String>,
        group_id: impl Into<String>,
        serdes: Arc<SerdeCache>,
        dead_letters: Arc<DeadLetterRouter>,
        metrics: Arc<dyn BusMetrics>,
    ) -> Self {
        Self {
            topics,
            group_id: group_id.into(),
            serdes,
            dead_letters,
            policy: ConsumePolicy::default(),
            poll_timeout: Duration::from_secs(1),
            metrics,
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: ConsumePolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Run until `shutdown` flips to `true` (or its sender is dropped).
    ///
    /// # Errors
    ///
    /// Only subscription failures; everything after that is logged and the
    /// loop keeps going.
    pub async fn run<H>(
        &self,
        consumer: Box<dyn BrokerConsumer>,
        handler: &H,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), BusError>
    where
        H: EventHandler + ?Sized,
    {
        let mut guard = ConsumerGuard(consumer);
        guard.0.subscribe(&self.topics)?;
        info!(topics = ?self.topics, group_id = %self.group_id, "Consumer loop started");

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                polled = guard.0.poll(self.poll_timeout) => match polled {
                    Ok(PollOutcome::Record(record)) => {
                        self.process(guard.0.as_mut(), handler, record).await;
                    }
                    Ok(PollOutcome::PartitionEof { topic, partition, offset }) => {
                        trace!(%topic, partition, offset, "Reached end of partition");
                    }
                    Ok(PollOutcome::Idle) => {}
                    Err(e) => {
                        warn!(group_id = %self.group_id, error = %e, "Poll failed");
                    }
                },
            }
        }

        info!(topics = ?self.topics, group_id = %self.group_id, "Consumer loop stopped");
        Ok(())
    }

    /// Resolve one message and commit it.
    pub async fn process<H>(
        &self,
        consumer: &mut dyn BrokerConsumer,
        handler: &H,
        record: ConsumedRecord,
    ) -> Resolution
    where
        H: EventHandler + ?Sized,
    {
        self.metrics.record_consumed(&record.topic);
        let resolution = self.resolve(handler, &record).await;

        if let Err(e) = consumer.commit(&record).await {
            warn!(
                topic = %record.topic,
                partition = record.partition,
                offset = record.offset,
                error = %e,
                "Offset commit failed"
            );
        }
        resolution
    }

    async fn resolve<H>(&self, handler: &H, record: &ConsumedRecord) -> Resolution
    where
        H: EventHandler + ?Sized,
    {
        let deserializer = self.serdes.get_deserializer(&record.topic).await;
        let decoded = match record.payload.as_deref() {
            Some(payload) => deserializer.deserialize(payload).map_err(|e| e.to_string()),
            None => Err("record has no payload".to_string()),
        };
        let event = match decoded {
            Ok(event) => event,
            Err(reason) => {
                warn!(
                    topic = %record.topic,
                    partition = record.partition,
                    offset = record.offset,
                    error = %reason,
                    "Undecodable message"
                );
                self.dead_letters.send_to_dlq(record, &reason, 0).await;
                return Resolution::DeadLettered;
            }
        };

        let policy = self.policy.for_topic(&record.topic);
        let mut attempts = 0;
        loop {
            attempts += 1;
            match handler.handle(event.clone()).await {
                Ok(()) => {
                    debug!(
                        topic = %record.topic,
                        partition = record.partition,
                        offset = record.offset,
                        attempts,
                        "Message handled"
                    );
                    return Resolution::Handled;
                }
                Err(e) if attempts < policy.max_attempts => {
                    let delay = policy.backoff_after(attempts);
                    warn!(
                        topic = %record.topic,
                        offset = record.offset,
                        attempts,
                        retry_in_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "Handler failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    self.metrics.record_handler_failed(&record.topic);
                    error!(
                        topic = %record.topic,
                        partition = record.partition,
                        offset = record.offset,
                        attempts,
                        error = %e,
                        "Handler failed"
                    );
                    self.dead_letters
                        .send_to_dlq(record, &format!("{e:#}"), attempts)
                        .await;
                    return Resolution::DeadLettered;
                }
            }
        }
    }
}
