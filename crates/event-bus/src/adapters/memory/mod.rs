//! In-process broker adapter.

mod broker;
mod consumer;
mod producer;

pub use broker::{Fault, InMemoryBroker};
pub use consumer::InMemoryConsumer;
pub use producer::InMemoryProducer;

use std::sync::Arc;

use crate::domain::{ConsumerSettings, ProducerSettings};
use crate::error::BrokerError;
use crate::ports::{BrokerClient, BrokerConsumer, BrokerProducer};

impl BrokerClient for InMemoryBroker {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn create_producer(
        &self,
        settings: &ProducerSettings,
    ) -> Result<Arc<dyn BrokerProducer>, BrokerError> {
        Ok(Arc::new(InMemoryProducer::new(self.clone(), settings.clone())))
    }

    fn create_consumer(
        &self,
        settings: &ConsumerSettings,
        group_id: Option<&str>,
    ) -> Result<Box<dyn BrokerConsumer>, BrokerError> {
        Ok(Box::new(InMemoryConsumer::new(
            self.clone(),
            settings.clone(),
            group_id.map(str::to_string),
        )))
    }
}
