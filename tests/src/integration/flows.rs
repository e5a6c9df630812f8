//! # Event Flows
//!
//! Publish, consume, dead-letter and replay through [`EventBus`] as the
//! business services use it.
//!
//! [`EventBus`]: voicecore_event_bus::EventBus

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use parking_lot::Mutex;
    use voicecore_event_bus::adapters::memory::InMemoryBroker;
    use voicecore_event_bus::domain::now_ms;
    use voicecore_event_bus::{ConsumePolicy, DeadLetterRecord, Event, RetryPolicy};

    use crate::fixtures::{billing_event, call_event, memory_bus, wait_for};

    // =========================================================================
    // PUBLISH → CONSUME
    // =========================================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_call_events_round_trip() {
        let broker = InMemoryBroker::new(3);
        let (bus, metrics) = memory_bus(&broker);

        let seen: Arc<Mutex<Vec<Event>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let consumer = {
            let bus = Arc::clone(&bus);
            tokio::spawn(async move {
                let handler = move |event: Event| {
                    let sink = Arc::clone(&sink);
                    async move {
                        sink.lock().push(event);
                        anyhow::Ok(())
                    }
                };
                bus.consume_events(&["call.events"], &handler, Some("analytics"))
                    .await
            })
        };

        assert!(bus
            .publish_event("call.events", "call-1", call_event("call-1", "call.initiated"), None)
            .await
            .unwrap());

        wait_for(|| !seen.lock().is_empty()).await;
        bus.shutdown().await;
        consumer.await.unwrap().unwrap();

        let events = seen.lock();
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.get_str("call_id"), Some("call-1"));
        assert_eq!(event.get_str("event_type"), Some("call.initiated"));
        assert_eq!(event.get_str("phone_number"), Some("+15550100"));
        assert!(event.event_id().is_some_and(|id| !id.is_empty()));
        assert!(event.timestamp().is_some_and(|ts| ts > 0));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.published, 1);
        assert_eq!(snapshot.consumed, 1);
    }

    #[tokio::test]
    async fn test_caller_envelope_is_kept() {
        let broker = InMemoryBroker::new(1);
        let (bus, _) = memory_bus(&broker);

        let event = billing_event("txn-1", 0.42)
            .with("event_id", "evt-fixed")
            .with("timestamp", 1_700_000_000_000_i64);
        assert!(bus
            .publish_event("billing.transactions", "tenant-acme", event, None)
            .await
            .unwrap());

        let events = bus
            .replay_events("billing.transactions", 0, i64::MAX)
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_id(), Some("evt-fixed"));
        assert_eq!(events[0].timestamp(), Some(1_700_000_000_000));
    }

    // =========================================================================
    // FAILURE → DEAD LETTER
    // =========================================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_failing_handler_dead_letters_once_and_commits() {
        let broker = InMemoryBroker::new(1);
        let (bus, metrics) = memory_bus(&broker);

        assert!(bus
            .publish_event("call.events", "call-9", call_event("call-9", "call.answered"), None)
            .await
            .unwrap());

        let consumer = {
            let bus = Arc::clone(&bus);
            tokio::spawn(async move {
                let handler = |_event: Event| async {
                    Err::<(), _>(anyhow::anyhow!("crm unavailable"))
                };
                bus.consume_events_with_policy(
                    &["call.events"],
                    &handler,
                    Some("crm-sync"),
                    ConsumePolicy::new(RetryPolicy::no_retry()),
                )
                .await
            })
        };

        wait_for(|| broker.committed_offset("crm-sync", "call.events", 0) == Some(1)).await;
        bus.shutdown().await;
        consumer.await.unwrap().unwrap();

        let dead = broker.records("call.events.dlq");
        assert_eq!(dead.len(), 1);
        let record = DeadLetterRecord::from_json_bytes(dead[0].payload.as_deref().unwrap()).unwrap();
        assert_eq!(record.original_topic, "call.events");
        assert_eq!(record.original_offset, 0);
        assert!(!record.error.is_empty());
        assert!(record.error.contains("crm unavailable"));
        assert!(record.value.is_some());
        assert_eq!(metrics.snapshot().dead_lettered, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_retry_policy_per_topic() {
        let broker = InMemoryBroker::new(1);
        let (bus, _) = memory_bus(&broker);

        assert!(bus
            .publish_event("billing.transactions", "tenant-acme", billing_event("txn-2", 3.5), None)
            .await
            .unwrap());

        let attempts = Arc::new(Mutex::new(0_u32));
        let counter = Arc::clone(&attempts);
        let consumer = {
            let bus = Arc::clone(&bus);
            tokio::spawn(async move {
                let handler = move |_event: Event| {
                    let counter = Arc::clone(&counter);
                    async move {
                        let mut n = counter.lock();
                        *n += 1;
                        if *n < 3 {
                            Err::<(), _>(anyhow::anyhow!("ledger busy"))
                        } else {
                            Ok(())
                        }
                    }
                };
                let policy = ConsumePolicy::default().with_topic(
                    "billing.transactions",
                    RetryPolicy::exponential(
                        5,
                        Duration::from_millis(1),
                        Duration::from_millis(4),
                    ),
                );
                bus.consume_events_with_policy(
                    &["billing.transactions"],
                    &handler,
                    Some("ledger"),
                    policy,
                )
                .await
            })
        };

        wait_for(|| broker.committed_offset("ledger", "billing.transactions", 0) == Some(1)).await;
        bus.shutdown().await;
        consumer.await.unwrap().unwrap();

        assert_eq!(*attempts.lock(), 3);
        assert!(broker.records("billing.transactions.dlq").is_empty());
    }

    // =========================================================================
    // REPLAY
    // =========================================================================

    #[tokio::test]
    async fn test_replay_window_returns_published_events() {
        let broker = InMemoryBroker::new(3);
        let (bus, metrics) = memory_bus(&broker);

        let t0 = now_ms();
        let mut ids = Vec::new();
        for i in 0..5 {
            let id = format!("replay-{i}");
            let event = call_event(&format!("call-{i}"), "call.completed").with("event_id", id.clone());
            assert!(bus
                .publish_event("call.events", &format!("call-{i}"), event, None)
                .await
                .unwrap());
            ids.push(id);
        }
        let t1 = now_ms();

        let events = bus.replay_events("call.events", t0, t1).await.unwrap();
        assert!(events.len() >= 5);
        for id in &ids {
            assert!(events.iter().any(|e| e.event_id() == Some(id.as_str())));
        }
        assert!(metrics.snapshot().replayed >= 5);

        // Windows are restartable.
        let window = bus.replay("call.events", t0, t1).unwrap();
        assert_eq!(window.collect().await.unwrap().len(), events.len());
        assert_eq!(window.collect().await.unwrap().len(), events.len());
    }

    #[tokio::test]
    async fn test_replay_before_any_traffic_is_empty() {
        let broker = InMemoryBroker::new(1);
        let (bus, _) = memory_bus(&broker);

        let events = bus.replay_events("security.audit", 0, now_ms()).await.unwrap();
        assert!(events.is_empty());
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    #[tokio::test]
    async fn test_publish_after_shutdown_is_refused() {
        let broker = InMemoryBroker::new(1);
        let (bus, _) = memory_bus(&broker);
        bus.shutdown().await;

        let result = bus
            .publish_event("call.events", "call-1", call_event("call-1", "call.initiated"), None)
            .await;
        assert!(matches!(
            result,
            Err(voicecore_event_bus::BusError::ShuttingDown)
        ));
        assert!(broker.records("call.events").is_empty());
    }
}
