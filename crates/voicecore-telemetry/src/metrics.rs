//! Prometheus metrics for the event bus.
//!
//! All metrics follow the naming convention: `vc_bus_<metric>_<unit>` and
//! carry a `topic` label.

use lazy_static::lazy_static;
use prometheus::{CounterVec, Encoder, Opts, Registry, TextEncoder};
use voicecore_event_bus::BusMetrics;

use crate::TelemetryError;

lazy_static! {
    /// Registry the bus metrics live in.
    pub static ref REGISTRY: Registry = Registry::new();

    pub static ref EVENTS_PUBLISHED: CounterVec = CounterVec::new(
        Opts::new("vc_bus_events_published_total", "Events acknowledged by the broker"),
        &["topic"]
    ).expect("metric creation failed");

    pub static ref PUBLISH_FAILURES: CounterVec = CounterVec::new(
        Opts::new("vc_bus_publish_failures_total", "Events whose delivery failed"),
        &["topic"]
    ).expect("metric creation failed");

    pub static ref EVENTS_CONSUMED: CounterVec = CounterVec::new(
        Opts::new("vc_bus_events_consumed_total", "Messages read by consumer loops"),
        &["topic"]
    ).expect("metric creation failed");

    pub static ref HANDLER_FAILURES: CounterVec = CounterVec::new(
        Opts::new("vc_bus_handler_failures_total", "Messages whose handler failed every attempt"),
        &["topic"]
    ).expect("metric creation failed");

    /// Labeled by the original topic, not the `.dlq` topic.
    pub static ref DEAD_LETTERED: CounterVec = CounterVec::new(
        Opts::new("vc_bus_dead_lettered_total", "Messages routed to a dead-letter topic"),
        &["topic"]
    ).expect("metric creation failed");

    pub static ref EVENTS_REPLAYED: CounterVec = CounterVec::new(
        Opts::new("vc_bus_events_replayed_total", "Events returned by replay windows"),
        &["topic"]
    ).expect("metric creation failed");
}

/// Keeps the registry reachable for the lifetime of the telemetry guard.
pub struct MetricsHandle {
    registry: Registry,
}

impl MetricsHandle {
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

/// Register the bus metrics with [`REGISTRY`]. Safe to call more than once.
pub fn register_metrics() -> Result<MetricsHandle, TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(EVENTS_PUBLISHED.clone()),
        Box::new(PUBLISH_FAILURES.clone()),
        Box::new(EVENTS_CONSUMED.clone()),
        Box::new(HANDLER_FAILURES.clone()),
        Box::new(DEAD_LETTERED.clone()),
        Box::new(EVENTS_REPLAYED.clone()),
    ];

    for metric in metrics {
        match REGISTRY.register(metric) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => return Err(TelemetryError::MetricsInit(e.to_string())),
        }
    }

    Ok(MetricsHandle {
        registry: REGISTRY.clone(),
    })
}

/// Encode all metrics in the Prometheus text exposition format.
pub fn gather_text() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}

/// [`BusMetrics`] sink writing to the Prometheus counters above.
#[derive(Debug, Default, Clone, Copy)]
pub struct PrometheusBusMetrics;

impl BusMetrics for PrometheusBusMetrics {
    fn record_published(&self, topic: &str) {
        EVENTS_PUBLISHED.with_label_values(&[topic]).inc();
    }

    fn record_publish_failed(&self, topic: &str) {
        PUBLISH_FAILURES.with_label_values(&[topic]).inc();
    }

    fn record_consumed(&self, topic: &str) {
        EVENTS_CONSUMED.with_label_values(&[topic]).inc();
    }

    fn record_handler_failed(&self, topic: &str) {
        HANDLER_FAILURES.with_label_values(&[topic]).inc();
    }

    fn record_dead_lettered(&self, topic: &str) {
        DEAD_LETTERED.with_label_values(&[topic]).inc();
    }

    fn record_replayed(&self, topic: &str) {
        EVENTS_REPLAYED.with_label_values(&[topic]).inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_is_idempotent() {
        assert!(register_metrics().is_ok());
        assert!(register_metrics().is_ok());
    }

    #[test]
    fn test_bus_metrics_increment_by_topic() {
        let before = DEAD_LETTERED.with_label_values(&["crm.updates"]).get();
        PrometheusBusMetrics.record_dead_lettered("crm.updates");
        let after = DEAD_LETTERED.with_label_values(&["crm.updates"]).get();
        assert!((after - before - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_gather_text_exposes_counters() {
        register_metrics().unwrap();
        PrometheusBusMetrics.record_published("call.events");
        let text = gather_text().unwrap();
        assert!(text.contains("vc_bus_events_published_total"));
        assert!(text.contains("topic=\"call.events\""));
    }
}
