//! # Telemetry Integration
//!
//! The Prometheus sink wired into a bus, and `traceparent` headers carried
//! from producer to consumer and into dead-letter records.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use voicecore_event_bus::adapters::memory::InMemoryBroker;
    use voicecore_event_bus::{ConsumePolicy, Event, Headers, RetryPolicy};
    use voicecore_telemetry::{
        extract_traceparent, gather_text, register_metrics, PrometheusBusMetrics,
        TRACEPARENT_HEADER,
    };

    use crate::fixtures::{bus_with_metrics, call_event, wait_for};

    const TRACEPARENT: &str = "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01";

    #[tokio::test]
    async fn test_prometheus_counts_published_events_by_topic() {
        register_metrics().unwrap();
        let broker = InMemoryBroker::new(1);
        let bus = bus_with_metrics(&broker, Arc::new(PrometheusBusMetrics));

        assert!(bus
            .publish_event("crm.updates", "cust-1", crm_update("cust-1"), None)
            .await
            .unwrap());

        let text = gather_text().unwrap();
        assert!(text.contains("vc_bus_events_published_total{topic=\"crm.updates\"}"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_traceparent_travels_with_record_and_dead_letter() {
        let broker = InMemoryBroker::new(1);
        let bus = bus_with_metrics(&broker, Arc::new(voicecore_event_bus::NoOpMetrics));

        let headers: Headers = vec![(TRACEPARENT_HEADER.to_string(), TRACEPARENT.as_bytes().to_vec())];
        assert!(bus
            .publish_event("call.events", "call-3", call_event("call-3", "call.initiated"), Some(headers))
            .await
            .unwrap());

        let stored = broker.records("call.events");
        let context = extract_traceparent(&stored[0].headers).unwrap();
        assert_eq!(context.to_traceparent(), TRACEPARENT);

        let consumer = {
            let bus = Arc::clone(&bus);
            tokio::spawn(async move {
                let handler =
                    |_event: Event| async { Err::<(), _>(anyhow::anyhow!("transcriber down")) };
                bus.consume_events_with_policy(
                    &["call.events"],
                    &handler,
                    Some("transcription"),
                    ConsumePolicy::new(RetryPolicy::no_retry()),
                )
                .await
            })
        };
        wait_for(|| !broker.records("call.events.dlq").is_empty()).await;
        bus.shutdown().await;
        consumer.await.unwrap().unwrap();

        let dead = broker.records("call.events.dlq");
        let context = extract_traceparent(&dead[0].headers).unwrap();
        assert_eq!(context.to_traceparent(), TRACEPARENT);
    }

    fn crm_update(customer_id: &str) -> Event {
        Event::new()
            .with("tenant_id", "tenant-acme")
            .with("entity_type", "contact")
            .with("entity_id", customer_id)
            .with("operation", "update")
            .with("customer_id", customer_id)
            .with("is_vip", true)
    }
}
