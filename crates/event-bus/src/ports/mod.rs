//! Ports layer (hexagonal architecture).

pub mod inbound;
pub mod outbound;

pub use inbound::{EventHandler, EventPublisher};
pub use outbound::{
    BrokerClient, BrokerConsumer, BrokerProducer, DeliveryFuture, SchemaSource,
};
