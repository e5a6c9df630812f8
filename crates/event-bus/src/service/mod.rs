//! Application services: codecs, schema resolution, producer, consumer
//! loop, dead-letter routing, replay, and the [`EventBus`] facade.

pub mod bus;
pub mod codec;
pub mod consumer;
pub mod dead_letter;
pub mod producer;
pub mod replay;
pub mod schema_registry;
pub mod serde_cache;

pub use bus::{get_event_bus, install_event_bus, EventBus};
pub use codec::{AvroDeserializer, AvroSerializer, HEADER_LEN, MAGIC_BYTE};
pub use consumer::{ConsumerLoop, Resolution};
pub use dead_letter::{DeadLetterRouter, ERROR_HEADER};
pub use producer::{DeliveryHandle, EventProducer};
pub use replay::{ReplayStream, ReplayWindow};
pub use schema_registry::SchemaRegistryClient;
pub use serde_cache::SerdeCache;
