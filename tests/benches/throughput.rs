//! # Event Bus Publish Benchmarks
//!
//! | Path | Target |
//! |------|--------|
//! | `publish_event` (acknowledged) | ≥ 100 events/s |
//! | `publish` batch + flush | pipelined, bounded by 5 in flight |
//! | Avro encode only | < 50µs per event |

use std::sync::Arc;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::json;
use tokio::runtime::Runtime;
use voicecore_event_bus::adapters::memory::InMemoryBroker;
use voicecore_event_bus::adapters::schema::EmbeddedSchemaSource;
use voicecore_event_bus::service::{SchemaRegistryClient, SerdeCache};
use voicecore_event_bus::{BusConfig, Event, EventBus, NoOpMetrics};

fn bench_bus(runtime: &Runtime) -> Arc<EventBus> {
    let _guard = runtime.enter();
    let bus = EventBus::with_components(
        BusConfig::in_memory(),
        Arc::new(InMemoryBroker::new(3)),
        Arc::new(EmbeddedSchemaSource::new()),
        Arc::new(NoOpMetrics),
    )
    .expect("in-memory bus");
    Arc::new(bus)
}

fn call_event(i: u64) -> Event {
    Event::from_value(json!({
        "tenant_id": "tenant-bench",
        "call_id": format!("call-{i}"),
        "event_type": "call.completed",
        "duration_seconds": 180,
    }))
    .expect("object")
}

fn bench_publish_event(c: &mut Criterion) {
    let runtime = Runtime::new().expect("tokio runtime");
    let bus = bench_bus(&runtime);

    let mut group = c.benchmark_group("publish_event");
    group.measurement_time(Duration::from_secs(5));
    group.throughput(Throughput::Elements(1));
    group.bench_function("acknowledged", |b| {
        let mut i = 0_u64;
        b.to_async(&runtime).iter(|| {
            i += 1;
            let bus = Arc::clone(&bus);
            let event = call_event(i);
            async move {
                black_box(
                    bus.publish_event("call.events", "call-bench", event, None)
                        .await
                        .expect("publish"),
                )
            }
        });
    });
    group.finish();
}

fn bench_publish_batch(c: &mut Criterion) {
    let runtime = Runtime::new().expect("tokio runtime");
    let bus = bench_bus(&runtime);

    let mut group = c.benchmark_group("publish_batch");
    for size in [10_u64, 100, 500] {
        group.throughput(Throughput::Elements(size));
        group.bench_with_input(BenchmarkId::new("enqueue_then_flush", size), &size, |b, &size| {
            b.to_async(&runtime).iter(|| {
                let bus = Arc::clone(&bus);
                async move {
                    for i in 0..size {
                        let key = format!("call-{}", i % 16);
                        // Handles resolve in the background; flush waits for them.
                        let _handle = bus
                            .publish("call.events", &key, call_event(i), None)
                            .await
                            .expect("enqueue");
                    }
                    bus.flush(Duration::from_secs(10)).await.expect("flush");
                }
            });
        });
    }
    group.finish();
}

fn bench_avro_encode(c: &mut Criterion) {
    let runtime = Runtime::new().expect("tokio runtime");
    let serdes = SerdeCache::new(Arc::new(SchemaRegistryClient::embedded()));
    let serializer = runtime.block_on(serdes.get_serializer("call.events"));
    let mut event = call_event(1);
    event.ensure_envelope(1_700_000_000_000);

    c.bench_function("avro_encode_call_event", |b| {
        b.iter(|| black_box(serializer.serialize(black_box(&event)).expect("encode")));
    });
}

criterion_group!(benches, bench_publish_event, bench_publish_batch, bench_avro_encode);
criterion_main!(benches);
