//! # Event Bus Facade
//!
//! Owns the schema registry client, serde cache, producer, dead-letter
//! router and metrics, and hands out consumer loops and replay windows over
//! one broker client.
//!
//! ## Construction
//!
//! - [`EventBus::connect`] builds everything from a [`BusConfig`].
//! - [`EventBus::with_components`] takes the broker client, schema source and
//!   metrics sink explicitly.
//! - [`get_event_bus`] returns the process-wide instance, created from the
//!   environment on first use. [`install_event_bus`] sets it explicitly.
//!
//! ## Shutdown
//!
//! [`EventBus::shutdown`] stops every running consumer loop, refuses new
//! publishes and drains in-flight deliveries.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, OnceCell};
use tracing::{info, warn};

use super::consumer::ConsumerLoop;
use super::dead_letter::DeadLetterRouter;
use super::producer::{DeliveryHandle, EventProducer};
use super::replay::ReplayWindow;
use super::schema_registry::SchemaRegistryClient;
use super::serde_cache::SerdeCache;
use crate::adapters::memory::InMemoryBroker;
use crate::adapters::schema::{EmbeddedSchemaSource, FileSchemaSource, HttpSchemaSource};
use crate::domain::{
    validate_topic, BrokerBackend, BusConfig, ConsumePolicy, Event, Headers, TopicSchema,
};
use crate::error::{BusError, ConfigError};
use crate::metrics::{BusMetrics, Metrics};
use crate::ports::{BrokerClient, EventHandler, EventPublisher, SchemaSource};

static EVENT_BUS: OnceCell<Arc<EventBus>> = OnceCell::const_new();

/// Process-wide bus, created from [`BusConfig::from_env`] on first call.
///
/// Concurrent first calls initialize exactly once.
///
/// # Errors
///
/// Configuration or client construction failures. A failed initialization
/// is retried on the next call.
pub async fn get_event_bus() -> Result<Arc<EventBus>, BusError> {
    EVENT_BUS
        .get_or_try_init(|| async {
            let config = BusConfig::from_env()?;
            EventBus::connect(config).map(Arc::new)
        })
        .await
        .cloned()
}

/// Install `bus` as the process-wide instance.
///
/// # Errors
///
/// `ConfigError::AlreadyInitialized` if a bus was already installed or
/// created by [`get_event_bus`].
pub fn install_event_bus(bus: Arc<EventBus>) -> Result<(), BusError> {
    EVENT_BUS
        .set(bus)
        .map_err(|_| BusError::Config(ConfigError::AlreadyInitialized))
}

pub struct EventBus {
    config: BusConfig,
    client: Arc<dyn BrokerClient>,
    serdes: Arc<SerdeCache>,
    producer: Arc<EventProducer>,
    dead_letters: Arc<DeadLetterRouter>,
    metrics: Arc<dyn BusMetrics>,
    shutdown_tx: watch::Sender<bool>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("backend", &self.client.name())
            .field("client_id", &self.config.client_id)
            .field("shutting_down", &self.is_shutting_down())
            .finish_non_exhaustive()
    }
}

impl EventBus {
    /// Build a bus from configuration.
    ///
    /// Schemas come from `schema_registry_url` if set, else `schema_dir`,
    /// else the embedded catalog.
    ///
    /// # Errors
    ///
    /// Invalid configuration or broker client construction failure.
    pub fn connect(config: BusConfig) -> Result<Self, BusError> {
        Self::connect_with_metrics(config, Arc::new(Metrics::new()))
    }

    /// [`connect`](Self::connect) reporting into `metrics`.
    ///
    /// # Errors
    ///
    /// Same as [`connect`](Self::connect).
    pub fn connect_with_metrics(
        config: BusConfig,
        metrics: Arc<dyn BusMetrics>,
    ) -> Result<Self, BusError> {
        config.validate()?;
        let client = broker_client(&config)?;
        let schemas = schema_source(&config)?;
        Self::with_components(config, client, schemas, metrics)
    }

    /// Build a bus over explicit components.
    ///
    /// # Errors
    ///
    /// Producer construction failure.
    pub fn with_components(
        config: BusConfig,
        client: Arc<dyn BrokerClient>,
        schemas: Arc<dyn SchemaSource>,
        metrics: Arc<dyn BusMetrics>,
    ) -> Result<Self, BusError> {
        let registry = Arc::new(SchemaRegistryClient::new(schemas));
        let serdes = Arc::new(SerdeCache::new(registry));
        let broker_producer = client.create_producer(&config.producer)?;
        let producer = Arc::new(EventProducer::new(
            Arc::clone(&broker_producer),
            Arc::clone(&serdes),
            config.producer.clone(),
            Arc::clone(&metrics),
        ));
        let dead_letters = Arc::new(DeadLetterRouter::new(broker_producer, Arc::clone(&metrics)));
        let (shutdown_tx, _) = watch::channel(false);

        info!(
            backend = client.name(),
            client_id = %config.client_id,
            schemas = %serdes.registry().source_description(),
            "Event bus ready"
        );

        Ok(Self {
            config,
            client,
            serdes,
            producer,
            dead_letters,
            metrics,
            shutdown_tx,
        })
    }

    #[must_use]
    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    #[must_use]
    pub fn metrics(&self) -> &Arc<dyn BusMetrics> {
        &self.metrics
    }

    #[must_use]
    pub fn backend_name(&self) -> &'static str {
        self.client.name()
    }

    /// Publish one event and wait for the broker's verdict.
    ///
    /// # Errors
    ///
    /// Invalid topic, serialization failure, or `ShuttingDown`. A failed
    /// delivery is `Ok(false)`.
    pub async fn publish_event(
        &self,
        topic: &str,
        key: &str,
        event: Event,
        headers: Option<Headers>,
    ) -> Result<bool, BusError> {
        self.producer.publish_event(topic, key, event, headers).await
    }

    /// Enqueue one event without waiting for acknowledgement.
    ///
    /// # Errors
    ///
    /// Invalid topic, serialization failure, or `ShuttingDown`.
    pub async fn publish(
        &self,
        topic: &str,
        key: &str,
        event: Event,
        headers: Option<Headers>,
    ) -> Result<DeliveryHandle, BusError> {
        self.producer.publish(topic, key, event, headers).await
    }

    /// # Errors
    ///
    /// Deliveries still pending at `timeout`.
    pub async fn flush(&self, timeout: Duration) -> Result<(), BusError> {
        self.producer.flush(timeout).await
    }

    /// Run a consumer loop over `topics` until shutdown.
    ///
    /// `group_id` defaults to the configured group.
    ///
    /// # Errors
    ///
    /// Invalid topics, `ShuttingDown`, or consumer construction failure.
    pub async fn consume_events<H>(
        &self,
        topics: &[&str],
        handler: &H,
        group_id: Option<&str>,
    ) -> Result<(), BusError>
    where
        H: EventHandler + ?Sized,
    {
        self.consume_events_with_policy(topics, handler, group_id, ConsumePolicy::default())
            .await
    }

    /// [`consume_events`](Self::consume_events) with per-topic retries.
    ///
    /// # Errors
    ///
    /// Same as [`consume_events`](Self::consume_events).
    pub async fn consume_events_with_policy<H>(
        &self,
        topics: &[&str],
        handler: &H,
        group_id: Option<&str>,
        policy: ConsumePolicy,
    ) -> Result<(), BusError>
    where
        H: EventHandler + ?Sized,
    {
        if self.is_shutting_down() {
            return Err(BusError::ShuttingDown);
        }
        if topics.is_empty() {
            return Err(BusError::InvalidTopic(String::new()));
        }
        for topic in topics {
            validate_topic(topic)?;
        }

        let group_id = group_id.unwrap_or(&self.config.default_group_id);
        let consumer = self
            .client
            .create_consumer(&self.config.consumer, Some(group_id))?;
        let consumer_loop = ConsumerLoop::new(
            topics.iter().map(|t| (*t).to_string()).collect(),
            group_id,
            Arc::clone(&self.serdes),
            Arc::clone(&self.dead_letters),
            Arc::clone(&self.metrics),
        )
        .with_policy(policy)
        .with_poll_timeout(self.config.consumer.poll_timeout);

        consumer_loop
            .run(consumer, handler, self.shutdown_tx.subscribe())
            .await
    }

    /// A replayable window over `topic`.
    ///
    /// # Errors
    ///
    /// Invalid topic or `start_ms > end_ms`.
    pub fn replay(&self, topic: &str, start_ms: i64, end_ms: i64) -> Result<ReplayWindow, BusError> {
        validate_topic(topic)?;
        ReplayWindow::new(
            Arc::clone(&self.client),
            Arc::clone(&self.serdes),
            Arc::clone(&self.metrics),
            self.config.consumer.clone(),
            self.config.replay.clone(),
            topic,
            start_ms,
            end_ms,
        )
    }

    /// Events of `topic` with broker timestamps in `[start_ms, end_ms]`.
    ///
    /// # Errors
    ///
    /// Invalid window or broker failures. Undecodable records are skipped.
    pub async fn replay_events(
        &self,
        topic: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<Event>, BusError> {
        self.replay(topic, start_ms, end_ms)?.collect().await
    }

    pub async fn get_schema(&self, topic: &str) -> Arc<TopicSchema> {
        self.serdes.registry().get_schema(topic).await
    }

    /// Stop consumer loops, refuse new publishes, and drain deliveries.
    pub async fn shutdown(&self) {
        if self.shutdown_tx.send_replace(true) {
            return;
        }
        info!(
            consumers = self.shutdown_tx.receiver_count(),
            in_flight = self.producer.in_flight(),
            "Event bus shutting down"
        );
        self.producer.close().await;
        if self.producer.in_flight() > 0 {
            warn!(in_flight = self.producer.in_flight(), "Deliveries outstanding at shutdown");
        }
    }

    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }
}

#[async_trait::async_trait]
impl EventPublisher for EventBus {
    async fn publish_event(
        &self,
        topic: &str,
        key: &str,
        event: Event,
        headers: Option<Headers>,
    ) -> Result<bool, BusError> {
        Self::publish_event(self, topic, key, event, headers).await
    }
}

fn broker_client(config: &BusConfig) -> Result<Arc<dyn BrokerClient>, BusError> {
    match config.backend {
        BrokerBackend::Memory => Ok(Arc::new(InMemoryBroker::new(config.memory_partitions))),
        #[cfg(feature = "kafka")]
        BrokerBackend::Kafka => Ok(Arc::new(crate::adapters::kafka::KafkaClient::new(config))),
        #[cfg(not(feature = "kafka"))]
        BrokerBackend::Kafka => Err(BusError::Config(ConfigError::Invalid {
            key: "VC_BUS_BACKEND",
            reason: "built without the `kafka` feature; use `memory`".to_string(),
        })),
    }
}

fn schema_source(config: &BusConfig) -> Result<Arc<dyn SchemaSource>, BusError> {
    if let Some(url) = &config.schema_registry_url {
        return Ok(Arc::new(HttpSchemaSource::new(url.as_str())?));
    }
    if let Some(dir) = &config.schema_dir {
        return Ok(Arc::new(FileSchemaSource::new(dir.as_str())));
    }
    Ok(Arc::new(EmbeddedSchemaSource::new()))
}
