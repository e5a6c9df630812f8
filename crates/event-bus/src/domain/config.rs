//! Event bus configuration and validation
//!
//! # Example
//!
//! ```ignore
//! use voicecore_event_bus::domain::{BrokerBackend, BusConfigBuilder};
//!
//! let config = BusConfigBuilder::new()
//!     .backend(BrokerBackend::Memory)
//!     .memory_partitions(4)
//!     .build()?;
//! ```

use crate::error::ConfigError;
use std::collections::HashMap;
use std::env;
use std::time::Duration;

pub const DEFAULT_BOOTSTRAP_SERVERS: &str = "localhost:9092";
pub const DEFAULT_CLIENT_ID: &str = "voicecore-event-bus";
pub const DEFAULT_GROUP_ID: &str = "voicecore-consumers";
pub const DEFAULT_MEMORY_PARTITIONS: i32 = 3;

// =============================================================================
// Broker backend
// =============================================================================

/// Which broker implementation the bus talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BrokerBackend {
    #[default]
    Kafka,
    /// In-process partitioned log.
    Memory,
}

impl std::str::FromStr for BrokerBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "kafka" => Ok(Self::Kafka),
            "memory" | "in-memory" | "inmemory" => Ok(Self::Memory),
            other => Err(ConfigError::Invalid {
                key: "VC_BUS_BACKEND",
                reason: format!("unknown backend {other:?}, expected kafka or memory"),
            }),
        }
    }
}

// =============================================================================
// Producer settings
// =============================================================================

/// Producer configuration.
///
/// Durability settings are constants: every record is acknowledged by all
/// in-sync replicas and retried with idempotent sequence numbers until
/// `delivery_timeout` runs out.
#[derive(Debug, Clone, PartialEq)]
pub struct ProducerSettings {
    /// Upper bound on send + retries for one record.
    pub delivery_timeout: Duration,
    pub request_timeout: Duration,
    /// Pause between retries of the same record.
    pub retry_backoff: Duration,
    /// Flush after every `publish_event` so it returns only once resolved.
    pub flush_on_publish: bool,
    pub flush_timeout: Duration,
}

impl ProducerSettings {
    pub const ACKS: &'static str = "all";
    pub const ENABLE_IDEMPOTENCE: bool = true;
    pub const MAX_IN_FLIGHT: usize = 5;
    pub const RETRIES: i32 = i32::MAX;
    pub const COMPRESSION: &'static str = "snappy";
    pub const LINGER_MS: u64 = 10;
    pub const BATCH_SIZE: usize = 32_768;

    /// librdkafka properties for this producer.
    #[must_use]
    pub fn client_properties(&self) -> Vec<(&'static str, String)> {
        vec![
            ("acks", Self::ACKS.to_string()),
            ("enable.idempotence", Self::ENABLE_IDEMPOTENCE.to_string()),
            (
                "max.in.flight.requests.per.connection",
                Self::MAX_IN_FLIGHT.to_string(),
            ),
            ("retries", Self::RETRIES.to_string()),
            ("retry.backoff.ms", self.retry_backoff.as_millis().to_string()),
            (
                "delivery.timeout.ms",
                self.delivery_timeout.as_millis().to_string(),
            ),
            (
                "request.timeout.ms",
                self.request_timeout.as_millis().to_string(),
            ),
            ("compression.type", Self::COMPRESSION.to_string()),
            ("linger.ms", Self::LINGER_MS.to_string()),
            ("batch.size", Self::BATCH_SIZE.to_string()),
        ]
    }
}

impl Default for ProducerSettings {
    fn default() -> Self {
        Self {
            delivery_timeout: Duration::from_secs(120),
            request_timeout: Duration::from_secs(30),
            retry_backoff: Duration::from_millis(100),
            flush_on_publish: true,
            flush_timeout: Duration::from_secs(30),
        }
    }
}

// =============================================================================
// Consumer settings
// =============================================================================

/// Consumer configuration. Offsets are only ever committed explicitly.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumerSettings {
    pub poll_timeout: Duration,
    pub session_timeout: Duration,
    pub max_poll_interval: Duration,
}

impl ConsumerSettings {
    pub const ENABLE_AUTO_COMMIT: bool = false;
    pub const ISOLATION_LEVEL: &'static str = "read_committed";
    pub const AUTO_OFFSET_RESET: &'static str = "earliest";
    pub const ENABLE_PARTITION_EOF: bool = true;

    /// librdkafka properties for a consumer in `group_id`.
    #[must_use]
    pub fn client_properties(&self, group_id: &str) -> Vec<(&'static str, String)> {
        vec![
            ("group.id", group_id.to_string()),
            ("enable.auto.commit", Self::ENABLE_AUTO_COMMIT.to_string()),
            ("isolation.level", Self::ISOLATION_LEVEL.to_string()),
            ("auto.offset.reset", Self::AUTO_OFFSET_RESET.to_string()),
            ("enable.partition.eof", Self::ENABLE_PARTITION_EOF.to_string()),
            (
                "session.timeout.ms",
                self.session_timeout.as_millis().to_string(),
            ),
            (
                "max.poll.interval.ms",
                self.max_poll_interval.as_millis().to_string(),
            ),
        ]
    }
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_secs(1),
            session_timeout: Duration::from_secs(45),
            max_poll_interval: Duration::from_secs(300),
        }
    }
}

/// Replay read-path configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplaySettings {
    /// A poll that returns nothing within this timeout ends the scan.
    pub poll_timeout: Duration,
    /// Consecutive poll errors tolerated before the scan fails.
    pub max_poll_errors: u32,
}

impl Default for ReplaySettings {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_secs(1),
            max_poll_errors: 5,
        }
    }
}

// =============================================================================
// Handler retry policy
// =============================================================================

/// How often a failing handler is retried before the message is dead-lettered.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total handler invocations, including the first. At least 1.
    pub max_attempts: u32,
    pub backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Single attempt, then dead-letter.
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    #[must_use]
    pub fn exponential(max_attempts: u32, backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
            max_backoff,
        }
    }

    /// Delay before attempt `failed_attempts + 1`: doubling from `backoff`,
    /// capped at `max_backoff`.
    #[must_use]
    pub fn backoff_after(&self, failed_attempts: u32) -> Duration {
        let exponent = failed_attempts.saturating_sub(1).min(16);
        self.backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff.max(self.backoff))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::no_retry()
    }
}

/// Retry policies for a consumer loop, overridable per topic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConsumePolicy {
    pub default: RetryPolicy,
    pub per_topic: HashMap<String, RetryPolicy>,
}

impl ConsumePolicy {
    #[must_use]
    pub fn new(default: RetryPolicy) -> Self {
        Self {
            default,
            per_topic: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_topic(mut self, topic: impl Into<String>, policy: RetryPolicy) -> Self {
        self.per_topic.insert(topic.into(), policy);
        self
    }

    #[must_use]
    pub fn for_topic(&self, topic: &str) -> &RetryPolicy {
        self.per_topic.get(topic).unwrap_or(&self.default)
    }
}

// =============================================================================
// Bus configuration
// =============================================================================

/// Top-level event bus configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct BusConfig {
    pub bootstrap_servers: String,
    pub client_id: String,
    /// Confluent-compatible registry; takes precedence over `schema_dir`.
    pub schema_registry_url: Option<String>,
    /// Directory of `<topic>.avsc` files.
    pub schema_dir: Option<String>,
    pub default_group_id: String,
    pub backend: BrokerBackend,
    /// Partitions per topic on the in-memory backend.
    pub memory_partitions: i32,
    pub producer: ProducerSettings,
    pub consumer: ConsumerSettings,
    pub replay: ReplaySettings,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: DEFAULT_BOOTSTRAP_SERVERS.to_string(),
            client_id: DEFAULT_CLIENT_ID.to_string(),
            schema_registry_url: None,
            schema_dir: None,
            default_group_id: DEFAULT_GROUP_ID.to_string(),
            backend: BrokerBackend::Kafka,
            memory_partitions: DEFAULT_MEMORY_PARTITIONS,
            producer: ProducerSettings::default(),
            consumer: ConsumerSettings::default(),
            replay: ReplaySettings::default(),
        }
    }
}

impl BusConfig {
    /// Configuration for the in-memory backend with default settings.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            backend: BrokerBackend::Memory,
            ..Self::default()
        }
    }

    /// Read configuration from the process environment.
    ///
    /// # Environment Variables
    ///
    /// - `KAFKA_BOOTSTRAP_SERVERS`: broker list (default: localhost:9092)
    /// - `SCHEMA_REGISTRY_URL`: HTTP schema registry (optional)
    /// - `VC_SCHEMA_DIR`: directory of `.avsc` files (optional)
    /// - `VC_BUS_CLIENT_ID`: client id (default: voicecore-event-bus)
    /// - `VC_CONSUMER_GROUP`: default group (default: voicecore-consumers)
    /// - `VC_BUS_BACKEND`: `kafka` or `memory` (default: kafka)
    /// - `VC_DELIVERY_TIMEOUT_MS`: producer delivery timeout (default: 120000)
    /// - `VC_FLUSH_ON_PUBLISH`: flush after each publish (default: true)
    /// - `VC_MEMORY_PARTITIONS`: in-memory partitions per topic (default: 3)
    ///
    /// # Errors
    ///
    /// Fails on unparsable values or when the result does not validate.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable variable source.
    ///
    /// # Errors
    ///
    /// Fails on unparsable values or when the result does not validate.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(servers) = non_empty("KAFKA_BOOTSTRAP_SERVERS") {
            config.bootstrap_servers = servers;
        }
        config.schema_registry_url = non_empty("SCHEMA_REGISTRY_URL");
        config.schema_dir = non_empty("VC_SCHEMA_DIR");
        if let Some(client_id) = non_empty("VC_BUS_CLIENT_ID") {
            config.client_id = client_id;
        }
        if let Some(group) = non_empty("VC_CONSUMER_GROUP") {
            config.default_group_id = group;
        }
        if let Some(backend) = non_empty("VC_BUS_BACKEND") {
            config.backend = backend.parse()?;
        }
        if let Some(ms) = non_empty("VC_DELIVERY_TIMEOUT_MS") {
            let ms: u64 = ms.trim().parse().map_err(|_| ConfigError::Invalid {
                key: "VC_DELIVERY_TIMEOUT_MS",
                reason: format!("{ms:?} is not a number of milliseconds"),
            })?;
            config.producer.delivery_timeout = Duration::from_millis(ms);
        }
        if let Some(flag) = non_empty("VC_FLUSH_ON_PUBLISH") {
            config.producer.flush_on_publish = parse_flag("VC_FLUSH_ON_PUBLISH", &flag)?;
        }
        if let Some(n) = non_empty("VC_MEMORY_PARTITIONS") {
            config.memory_partitions = n.trim().parse().map_err(|_| ConfigError::Invalid {
                key: "VC_MEMORY_PARTITIONS",
                reason: format!("{n:?} is not an integer"),
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// # Errors
    ///
    /// Returns the first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backend == BrokerBackend::Kafka && self.bootstrap_servers.trim().is_empty() {
            return Err(ConfigError::Missing("KAFKA_BOOTSTRAP_SERVERS"));
        }
        if self.client_id.trim().is_empty() {
            return Err(ConfigError::Missing("VC_BUS_CLIENT_ID"));
        }
        if self.default_group_id.trim().is_empty() {
            return Err(ConfigError::Missing("VC_CONSUMER_GROUP"));
        }
        if self.memory_partitions < 1 {
            return Err(ConfigError::Invalid {
                key: "VC_MEMORY_PARTITIONS",
                reason: "must be at least 1".to_string(),
            });
        }

        // librdkafka rejects delivery.timeout.ms < linger.ms + request.timeout.ms
        let floor = self.producer.request_timeout
            + Duration::from_millis(ProducerSettings::LINGER_MS);
        if self.backend == BrokerBackend::Kafka && self.producer.delivery_timeout < floor {
            return Err(ConfigError::Invalid {
                key: "VC_DELIVERY_TIMEOUT_MS",
                reason: format!(
                    "must be at least linger.ms + request.timeout.ms ({} ms)",
                    floor.as_millis()
                ),
            });
        }
        if self.producer.delivery_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                key: "VC_DELIVERY_TIMEOUT_MS",
                reason: "must be positive".to_string(),
            });
        }
        if self.consumer.poll_timeout.is_zero() || self.replay.poll_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                key: "poll_timeout",
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}

fn parse_flag(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::Invalid {
            key,
            reason: format!("{other:?} is not a boolean"),
        }),
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Fluent builder for [`BusConfig`]; `build` validates.
#[derive(Debug, Default)]
pub struct BusConfigBuilder {
    config: BusConfig,
}

impl BusConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn bootstrap_servers(mut self, servers: impl Into<String>) -> Self {
        self.config.bootstrap_servers = servers.into();
        self
    }

    #[must_use]
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.config.client_id = client_id.into();
        self
    }

    #[must_use]
    pub fn schema_registry_url(mut self, url: impl Into<String>) -> Self {
        self.config.schema_registry_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn schema_dir(mut self, dir: impl Into<String>) -> Self {
        self.config.schema_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn default_group_id(mut self, group: impl Into<String>) -> Self {
        self.config.default_group_id = group.into();
        self
    }

    #[must_use]
    pub fn backend(mut self, backend: BrokerBackend) -> Self {
        self.config.backend = backend;
        self
    }

    #[must_use]
    pub fn memory_partitions(mut self, partitions: i32) -> Self {
        self.config.memory_partitions = partitions;
        self
    }

    #[must_use]
    pub fn delivery_timeout(mut self, timeout: Duration) -> Self {
        self.config.producer.delivery_timeout = timeout;
        self
    }

    #[must_use]
    pub fn retry_backoff(mut self, backoff: Duration) -> Self {
        self.config.producer.retry_backoff = backoff;
        self
    }

    #[must_use]
    pub fn flush_on_publish(mut self, flush: bool) -> Self {
        self.config.producer.flush_on_publish = flush;
        self
    }

    #[must_use]
    pub fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.config.consumer.poll_timeout = timeout;
        self
    }

    #[must_use]
    pub fn replay_poll_timeout(mut self, timeout: Duration) -> Self {
        self.config.replay.poll_timeout = timeout;
        self
    }

    /// # Errors
    ///
    /// Fails when the assembled configuration does not validate.
    pub fn build(self) -> Result<BusConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
