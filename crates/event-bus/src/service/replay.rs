//! # Replay Engine
//!
//! Reads the events of one topic whose broker timestamps fall in
//! `[start_ms, end_ms]`. Each partition is positioned at its first offset at
//! or after `start_ms` with a direct assignment (no group, no commits) and
//! drained until it passes `end_ms` or reaches its end. A poll that returns
//! nothing ends the scan.
//!
//! [`ReplayWindow::stream`] is lazy: nothing touches the broker until the
//! stream is first polled, and every call starts a fresh scan.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt};
use tracing::{debug, info, warn};

use super::serde_cache::SerdeCache;
use crate::domain::{ConsumerSettings, Event, PollOutcome, ReplaySettings, TopicPartitionOffset};
use crate::error::BusError;
use crate::metrics::BusMetrics;
use crate::ports::{BrokerClient, BrokerConsumer};

/// Stream of replayed events; decode failures arrive as `Err` items.
pub type ReplayStream = BoxStream<'static, Result<Event, BusError>>;

/// A replayable time window over one topic.
#[derive(Clone)]
pub struct ReplayWindow {
    client: Arc<dyn BrokerClient>,
    serdes: Arc<SerdeCache>,
    metrics: Arc<dyn BusMetrics>,
    consumer_settings: ConsumerSettings,
    settings: ReplaySettings,
    topic: String,
    start_ms: i64,
    end_ms: i64,
}

impl std::fmt::Debug for ReplayWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplayWindow")
            .field("topic", &self.topic)
            .field("start_ms", &self.start_ms)
            .field("end_ms", &self.end_ms)
            .finish_non_exhaustive()
    }
}

impl ReplayWindow {
    /// # Errors
    ///
    /// `BusError::InvalidWindow` when `start_ms > end_ms`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: Arc<dyn BrokerClient>,
        serdes: Arc<SerdeCache>,
        metrics: Arc<dyn BusMetrics>,
        consumer_settings: ConsumerSettings,
        settings: ReplaySettings,
        topic: impl Into<String>,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Self, BusError> {
        if start_ms > end_ms {
            return Err(BusError::InvalidWindow {
                start: start_ms,
                end: end_ms,
            });
        }
        Ok(Self {
            client,
            serdes,
            metrics,
            consumer_settings,
            settings,
            topic: topic.into(),
            start_ms,
            end_ms,
        })
    }

    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    #[must_use]
    pub fn start_ms(&self) -> i64 {
        self.start_ms
    }

    #[must_use]
    pub fn end_ms(&self) -> i64 {
        self.end_ms
    }

    /// Start a new scan of the window.
    #[must_use]
    pub fn stream(&self) -> ReplayStream {
        stream::unfold(ScanState::Pending(self.clone()), ScanState::advance).boxed()
    }

    /// Collect the window, skipping records that fail to decode.
    ///
    /// # Errors
    ///
    /// Broker failures while positioning or reading.
    pub async fn collect(&self) -> Result<Vec<Event>, BusError> {
        let mut events = Vec::new();
        let mut skipped = 0usize;
        let mut scan = self.stream();
        while let Some(item) = scan.next().await {
            match item {
                Ok(event) => events.push(event),
                Err(BusError::Serde(e)) => {
                    skipped += 1;
                    warn!(topic = %self.topic, error = %e, "Skipping undecodable record during replay");
                }
                Err(e) => return Err(e),
            }
        }
        info!(
            topic = %self.topic,
            start_ms = self.start_ms,
            end_ms = self.end_ms,
            events = events.len(),
            skipped,
            "Replay finished"
        );
        Ok(events)
    }
}

struct Scan {
    window: ReplayWindow,
    consumer: Box<dyn BrokerConsumer>,
    positions: HashMap<i32, i64>,
    active: HashSet<i32>,
    poll_errors: u32,
}

enum ScanState {
    Pending(ReplayWindow),
    Running(Box<Scan>),
    Done,
}

impl ScanState {
    async fn advance(self) -> Option<(Result<Event, BusError>, Self)> {
        let mut scan = match self {
            Self::Done => return None,
            Self::Running(scan) => scan,
            Self::Pending(window) => match Scan::open(window).await {
                Ok(Some(scan)) => Box::new(scan),
                Ok(None) => return None,
                Err(e) => return Some((Err(e), Self::Done)),
            },
        };

        match scan.next_event().await {
            Some(Ok(event)) => Some((Ok(event), Self::Running(scan))),
            Some(Err(e @ BusError::Serde(_))) => Some((Err(e), Self::Running(scan))),
            Some(Err(e)) => {
                scan.consumer.close();
                Some((Err(e), Self::Done))
            }
            None => {
                scan.consumer.close();
                None
            }
        }
    }
}

impl Scan {
    /// Position an assign-only consumer; `None` when nothing is in range.
    async fn open(window: ReplayWindow) -> Result<Option<Self>, BusError> {
        let mut consumer = window
            .client
            .create_consumer(&window.consumer_settings, None)?;

        let offsets = consumer
            .offsets_for_timestamp(&window.topic, window.start_ms)
            .await?;
        let starts: Vec<TopicPartitionOffset> =
            offsets.into_iter().filter(|tpo| tpo.offset.is_some()).collect();
        debug!(
            topic = %window.topic,
            start_ms = window.start_ms,
            partitions = starts.len(),
            "Replay positioned"
        );
        if starts.is_empty() {
            consumer.close();
            return Ok(None);
        }

        consumer.assign(&starts)?;
        let positions = starts
            .iter()
            .filter_map(|tpo| tpo.offset.map(|o| (tpo.partition, o)))
            .collect::<HashMap<_, _>>();
        let active = positions.keys().copied().collect();
        Ok(Some(Self {
            window,
            consumer,
            positions,
            active,
            poll_errors: 0,
        }))
    }

    async fn next_event(&mut self) -> Option<Result<Event, BusError>> {
        let timeout = self.window.settings.poll_timeout;
        loop {
            if self.active.is_empty() {
                return None;
            }
            let record = match self.consumer.poll(timeout).await {
                Ok(PollOutcome::Record(record)) => record,
                Ok(PollOutcome::PartitionEof { partition, .. }) => {
                    self.finish_partition(partition);
                    continue;
                }
                Ok(PollOutcome::Idle) => return None,
                Err(e) => {
                    self.poll_errors += 1;
                    if self.poll_errors >= self.window.settings.max_poll_errors {
                        return Some(Err(e.into()));
                    }
                    warn!(topic = %self.window.topic, error = %e, "Replay poll failed");
                    continue;
                }
            };
            self.poll_errors = 0;

            if !self.active.contains(&record.partition) {
                continue;
            }
            self.positions.insert(record.partition, record.offset + 1);
            if record.timestamp_ms.is_some_and(|ts| ts > self.window.end_ms) {
                self.finish_partition(record.partition);
                continue;
            }

            let deserializer = self.window.serdes.get_deserializer(&self.window.topic).await;
            let decoded = match record.payload.as_deref() {
                Some(payload) => deserializer.deserialize(payload).map_err(BusError::from),
                None => Err(BusError::Serde(crate::error::SerdeError::Decode {
                    topic: record.topic.clone(),
                    reason: format!("empty payload at offset {}", record.offset),
                })),
            };
            if decoded.is_ok() {
                self.window.metrics.record_replayed(&self.window.topic);
            }
            return Some(decoded);
        }
    }

    /// Stop reading `partition`, keeping the others at their positions.
    fn finish_partition(&mut self, partition: i32) {
        if !self.active.remove(&partition) || self.active.is_empty() {
            return;
        }
        let remaining: Vec<TopicPartitionOffset> = self
            .active
            .iter()
            .map(|p| {
                TopicPartitionOffset::new(
                    self.window.topic.clone(),
                    *p,
                    self.positions.get(p).copied(),
                )
            })
            .collect();
        if let Err(e) = self.consumer.assign(&remaining) {
            warn!(topic = %self.window.topic, error = %e, "Failed to narrow replay assignment");
        }
    }
}
