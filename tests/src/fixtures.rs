//! Shared test fixtures.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use voicecore_event_bus::adapters::memory::InMemoryBroker;
use voicecore_event_bus::adapters::schema::EmbeddedSchemaSource;
use voicecore_event_bus::{BusConfig, BusMetrics, Event, EventBus, Metrics};

/// A bus over `broker` with short poll timeouts, reporting into `metrics`.
pub fn bus_with_metrics(broker: &InMemoryBroker, metrics: Arc<dyn BusMetrics>) -> Arc<EventBus> {
    let mut config = BusConfig::in_memory();
    config.producer.retry_backoff = Duration::from_millis(5);
    config.consumer.poll_timeout = Duration::from_millis(20);
    config.replay.poll_timeout = Duration::from_millis(20);
    let bus = EventBus::with_components(
        config,
        Arc::new(broker.clone()),
        Arc::new(EmbeddedSchemaSource::new()),
        metrics,
    )
    .expect("in-memory bus");
    Arc::new(bus)
}

/// A bus over `broker` with atomic counters.
pub fn memory_bus(broker: &InMemoryBroker) -> (Arc<EventBus>, Arc<Metrics>) {
    let metrics = Arc::new(Metrics::new());
    (bus_with_metrics(broker, metrics.clone()), metrics)
}

pub fn call_event(call_id: &str, event_type: &str) -> Event {
    Event::from_value(json!({
        "tenant_id": "tenant-acme",
        "call_id": call_id,
        "event_type": event_type,
        "agent_id": "agent-12",
        "phone_number": "+15550100",
    }))
    .expect("object")
}

pub fn billing_event(transaction_id: &str, amount: f64) -> Event {
    Event::from_value(json!({
        "tenant_id": "tenant-acme",
        "transaction_id": transaction_id,
        "transaction_type": "call_charge",
        "amount": amount,
        "currency": "USD",
    }))
    .expect("object")
}

/// Poll `done` until it holds, failing the test after 10 seconds.
pub async fn wait_for(mut done: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !done() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
