//! Subcommand implementations.
//!
//! Each command takes the bus and an output sink so it can run against the
//! in-memory backend in tests.

use std::io::Write;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use futures::StreamExt;
use tracing::{info, info_span, warn, Instrument};
use voicecore_event_bus::domain::dlq_topic;
use voicecore_event_bus::{BusError, Event, EventBus, Headers, TOPIC_CATALOG};
use voicecore_telemetry::{extract_traceparent, inject_traceparent};

/// Consume `topics` and log each event until the bus shuts down.
pub async fn tail(bus: Arc<EventBus>, topics: Vec<String>, group: Option<String>) -> Result<()> {
    let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
    let group = group.as_deref();
    info!(topics = ?topic_refs, group = group.unwrap_or(&bus.config().default_group_id), "Tailing");

    let handler = |event: Event| async move {
        info!(
            event_id = event.event_id().unwrap_or("-"),
            timestamp = event.timestamp().unwrap_or_default(),
            event = %event.clone().into_value(),
            "Event"
        );
        anyhow::Ok(())
    };

    bus.consume_events(&topic_refs, &handler, group)
        .await
        .context("consumer loop failed")
}

/// Write every event of `topic` in `[start, end]` to `out`, one JSON object per line.
///
/// Returns the number of events written.
pub async fn replay<W: Write + Send>(
    bus: &EventBus,
    topic: &str,
    start: i64,
    end: i64,
    out: &mut W,
) -> Result<usize> {
    let window = bus.replay(topic, start, end)?;
    let mut stream = window.stream();
    let mut written = 0;

    while let Some(item) = stream.next().await {
        match item {
            Ok(event) => {
                writeln!(out, "{}", event.into_value())?;
                written += 1;
            }
            Err(BusError::Serde(e)) => warn!(topic, error = %e, "Skipping undecodable record"),
            Err(e) => return Err(e).context("replay failed"),
        }
    }
    out.flush()?;
    Ok(written)
}

/// Publish one JSON event and report the outcome on `out`.
pub async fn publish<W: Write + Send>(
    bus: &EventBus,
    topic: &str,
    key: &str,
    event_json: &str,
    out: &mut W,
) -> Result<()> {
    let value: serde_json::Value =
        serde_json::from_str(event_json).context("--event is not valid JSON")?;
    let event = Event::from_value(value)?;

    let span = info_span!("publish", topic, key);
    let acked = async {
        let mut headers = Headers::new();
        inject_traceparent(&mut headers);
        let trace = extract_traceparent(&headers).map(|c| c.to_traceparent());
        bus.publish_event(topic, key, event, Some(headers))
            .await
            .map(|acked| (acked, trace))
    }
    .instrument(span)
    .await?;

    match acked {
        (true, trace) => {
            writeln!(out, "published to {topic} (key {key})")?;
            if let Some(trace) = trace {
                writeln!(out, "traceparent {trace}")?;
            }
            Ok(())
        }
        (false, _) => bail!("delivery to {topic} was not acknowledged"),
    }
}

/// Print the catalog: topic, schema id, record name and dead-letter topic.
pub async fn topics<W: Write + Send>(bus: &EventBus, out: &mut W) -> Result<()> {
    writeln!(out, "{:<22} {:>6}  {:<24} DLQ", "TOPIC", "SCHEMA", "RECORD")?;
    for topic in TOPIC_CATALOG {
        let schema = bus.get_schema(topic).await;
        let id = schema
            .id()
            .map_or_else(|| "-".to_string(), |id| id.to_string());
        writeln!(
            out,
            "{:<22} {:>6}  {:<24} {}",
            topic,
            id,
            schema.record_name().unwrap_or("-"),
            dlq_topic(topic)
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use voicecore_event_bus::BusConfig;

    fn memory_bus() -> Arc<EventBus> {
        let mut config = BusConfig::in_memory();
        config.consumer.poll_timeout = Duration::from_millis(20);
        config.replay.poll_timeout = Duration::from_millis(20);
        Arc::new(EventBus::connect(config).unwrap())
    }

    const CALL: &str =
        r#"{"tenant_id":"t1","call_id":"c1","event_type":"call.started","duration_seconds":0}"#;

    #[tokio::test]
    async fn test_publish_then_replay_prints_json_lines() {
        let bus = memory_bus();
        let mut out = Vec::new();
        publish(&bus, "call.events", "c1", CALL, &mut out).await.unwrap();
        assert!(String::from_utf8_lossy(&out).starts_with("published to call.events"));

        let mut lines = Vec::new();
        let written = replay(&bus, "call.events", 0, i64::MAX, &mut lines)
            .await
            .unwrap();
        assert_eq!(written, 1);

        let text = String::from_utf8(lines).unwrap();
        let value: serde_json::Value = serde_json::from_str(text.trim()).unwrap();
        assert_eq!(value["call_id"], "c1");
        assert_eq!(value["event_type"], "call.started");
    }

    #[tokio::test]
    async fn test_publish_rejects_non_object() {
        let bus = memory_bus();
        let mut out = Vec::new();
        assert!(publish(&bus, "call.events", "c1", "[1,2]", &mut out).await.is_err());
        assert!(publish(&bus, "call.events", "c1", "{oops", &mut out).await.is_err());
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_replay_rejects_inverted_window() {
        let bus = memory_bus();
        let mut out = Vec::new();
        assert!(replay(&bus, "call.events", 10, 5, &mut out).await.is_err());
    }

    #[tokio::test]
    async fn test_topics_lists_catalog_with_ids() {
        let bus = memory_bus();
        let mut out = Vec::new();
        topics(&bus, &mut out).await.unwrap();

        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().count(), TOPIC_CATALOG.len() + 1);
        let billing = text
            .lines()
            .find(|l| l.starts_with("billing.transactions"))
            .unwrap();
        assert!(billing.contains("billing.transactions.dlq"));
        assert!(billing.split_whitespace().nth(1).unwrap().parse::<u32>().is_ok());
    }

    #[tokio::test]
    async fn test_tail_returns_after_shutdown() {
        let bus = memory_bus();
        let runner = tokio::spawn(tail(Arc::clone(&bus), vec!["call.events".to_string()], None));
        tokio::time::sleep(Duration::from_millis(50)).await;
        bus.shutdown().await;

        let result = tokio::time::timeout(Duration::from_secs(2), runner)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }
}
