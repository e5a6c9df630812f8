//! # Publish Throughput
//!
//! Many services publish through one shared bus at once. Every concurrent
//! publish must be acknowledged and the bus must sustain at least 100
//! events per second.

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::time::Instant;

    use futures::future::join_all;
    use voicecore_event_bus::adapters::memory::{Fault, InMemoryBroker};

    use crate::fixtures::{call_event, memory_bus};

    const CONCURRENT_PUBLISHES: usize = 100;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_publishes_all_acknowledged() {
        let broker = InMemoryBroker::new(3);
        let (bus, metrics) = memory_bus(&broker);

        let started = Instant::now();
        let results = join_all((0..CONCURRENT_PUBLISHES).map(|i| {
            let bus = bus.clone();
            async move {
                let call_id = format!("call-{i}");
                bus.publish_event("call.events", &call_id, call_event(&call_id, "call.completed"), None)
                    .await
            }
        }))
        .await;
        let elapsed = started.elapsed();

        assert!(results.iter().all(|r| matches!(r, Ok(true))));
        let rate = CONCURRENT_PUBLISHES as f64 / elapsed.as_secs_f64();
        assert!(rate >= 100.0, "only {rate:.1} events/s");

        assert_eq!(broker.records("call.events").len(), CONCURRENT_PUBLISHES);
        assert_eq!(metrics.snapshot().published, CONCURRENT_PUBLISHES as u64);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_publishes_survive_lost_acks_without_duplicates() {
        let broker = InMemoryBroker::new(3);
        let (bus, _) = memory_bus(&broker);
        broker.inject_faults(Fault::AckLost, 10);

        let results = join_all((0..50).map(|i| {
            let bus = bus.clone();
            async move {
                bus.publish_event(
                    "call.events",
                    "tenant-acme",
                    call_event(&format!("call-{i}"), "call.transferred"),
                    None,
                )
                .await
            }
        }))
        .await;

        assert!(results.iter().all(|r| matches!(r, Ok(true))));
        let records = broker.records("call.events");
        assert_eq!(records.len(), 50);
        let offsets: HashSet<(i32, i64)> = records.iter().map(|r| (r.partition, r.offset)).collect();
        assert_eq!(offsets.len(), 50);
        assert_eq!(broker.pending_faults(), 0);
    }
}
