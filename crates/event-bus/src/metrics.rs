//! # Bus Metrics
//!
//! Counters emitted by the producer, consumer loop, dead-letter router and
//! replay engine. The bus talks to a [`BusMetrics`] sink; [`Metrics`] is the
//! built-in atomic implementation and `voicecore-telemetry` provides a
//! Prometheus-backed one.

use std::sync::atomic::{AtomicU64, Ordering};

/// Sink for bus counters. Implementations must be cheap and non-blocking.
pub trait BusMetrics: Send + Sync {
    fn record_published(&self, topic: &str);
    fn record_publish_failed(&self, topic: &str);
    fn record_consumed(&self, topic: &str);
    fn record_handler_failed(&self, topic: &str);
    fn record_dead_lettered(&self, topic: &str);
    fn record_replayed(&self, topic: &str);
}

/// Process-local atomic counters.
#[derive(Debug, Default)]
pub struct Metrics {
    published: AtomicU64,
    publish_failed: AtomicU64,
    consumed: AtomicU64,
    handler_failed: AtomicU64,
    dead_lettered: AtomicU64,
    replayed: AtomicU64,
}

impl Metrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Point-in-time copy of all counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            published: self.published.load(Ordering::Relaxed),
            publish_failed: self.publish_failed.load(Ordering::Relaxed),
            consumed: self.consumed.load(Ordering::Relaxed),
            handler_failed: self.handler_failed.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            replayed: self.replayed.load(Ordering::Relaxed),
        }
    }
}

impl BusMetrics for Metrics {
    fn record_published(&self, _topic: &str) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    fn record_publish_failed(&self, _topic: &str) {
        self.publish_failed.fetch_add(1, Ordering::Relaxed);
    }

    fn record_consumed(&self, _topic: &str) {
        self.consumed.fetch_add(1, Ordering::Relaxed);
    }

    fn record_handler_failed(&self, _topic: &str) {
        self.handler_failed.fetch_add(1, Ordering::Relaxed);
    }

    fn record_dead_lettered(&self, _topic: &str) {
        self.dead_lettered.fetch_add(1, Ordering::Relaxed);
    }

    fn record_replayed(&self, _topic: &str) {
        self.replayed.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub published: u64,
    pub publish_failed: u64,
    pub consumed: u64,
    pub handler_failed: u64,
    pub dead_lettered: u64,
    pub replayed: u64,
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpMetrics;

impl BusMetrics for NoOpMetrics {
    fn record_published(&self, _topic: &str) {}
    fn record_publish_failed(&self, _topic: &str) {}
    fn record_consumed(&self, _topic: &str) {}
    fn record_handler_failed(&self, _topic: &str) {}
    fn record_dead_lettered(&self, _topic: &str) {}
    fn record_replayed(&self, _topic: &str) {}
}
