//! # VoiceCore Event Bus - Partitioned-Log Messaging Core
//!
//! Producer/consumer abstraction over a partitioned log for the VoiceCore
//! call-center backend. Business services publish domain events and react
//! to them without talking to each other directly.
//!
//! ## Guarantees
//!
//! - **Acknowledged, idempotent production:** `acks=all`, idempotent
//!   sequences, at most 5 in-flight requests per connection.
//! - **Per-key ordering:** the key picks the partition (murmur2), and a
//!   partition is consumed in order.
//! - **Commit after resolution:** an offset is committed only once its
//!   message was handled or dead-lettered.
//! - **Schema-checked payloads:** every topic has an Avro record schema;
//!   payloads use the Confluent wire framing.
//!
//! ## Flow
//!
//! ```text
//! ┌──────────────┐  publish_event()   ┌──────────────┐   poll    ┌───────────────┐
//! │   Service A  │ ─────────────────► │  Partitioned │ ────────► │ Consumer Loop │
//! └──────────────┘                    │     Log      │           └──────┬────────┘
//!                                     └──────────────┘                  │ handler Err
//!                                            ▲                          ▼
//!                                            │ <topic>.dlq     ┌────────────────┐
//!                                            └──────────────── │ Dead-Letter    │
//!                                                              │ Router         │
//!                                                              └────────────────┘
//! ```
//!
//! ## Layout
//!
//! - [`domain`]: events, topics, schemas, records, configuration
//! - [`ports`]: traits the services depend on
//! - [`adapters`]: in-memory broker, Kafka (feature `kafka`), schema sources
//! - [`service`]: codecs, producer, consumer loop, DLQ, replay, [`EventBus`]

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_name_repetitions)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod adapters;
pub mod domain;
pub mod error;
pub mod metrics;
pub mod ports;
pub mod service;

// Re-export main types
pub use domain::{
    BrokerBackend, BusConfig, BusConfigBuilder, ConsumePolicy, DeadLetterRecord, Event, Headers,
    RetryPolicy, TopicSchema, TOPIC_CATALOG,
};
pub use error::{BrokerError, BusError, ConfigError, SchemaError, SerdeError};
pub use metrics::{BusMetrics, Metrics, MetricsSnapshot, NoOpMetrics};
pub use ports::{EventHandler, EventPublisher};
pub use service::{get_event_bus, install_event_bus, DeliveryHandle, EventBus, ReplayWindow};

/// Crate version, reported by the runtime binary.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
