//! librdkafka-backed broker adapter.
//!
//! Producer and consumer properties come from
//! [`ProducerSettings::client_properties`] and
//! [`ConsumerSettings::client_properties`]; this module only adds the
//! connection settings and translates errors.

mod consumer;
mod producer;

pub use consumer::KafkaConsumer;
pub use producer::KafkaProducer;

use std::sync::Arc;

use rdkafka::config::ClientConfig;
use rdkafka::error::KafkaError;
use rdkafka::types::RDKafkaErrorCode;
use tracing::info;
use uuid::Uuid;

use crate::domain::{BusConfig, ConsumerSettings, ProducerSettings};
use crate::error::BrokerError;
use crate::ports::{BrokerClient, BrokerConsumer, BrokerProducer};

/// Factory for Kafka producers and consumers of one cluster.
#[derive(Debug, Clone)]
pub struct KafkaClient {
    bootstrap_servers: String,
    client_id: String,
}

impl KafkaClient {
    #[must_use]
    pub fn new(config: &BusConfig) -> Self {
        Self {
            bootstrap_servers: config.bootstrap_servers.clone(),
            client_id: config.client_id.clone(),
        }
    }

    fn base_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &self.bootstrap_servers)
            .set("client.id", &self.client_id);
        config
    }
}

impl BrokerClient for KafkaClient {
    fn name(&self) -> &'static str {
        "kafka"
    }

    fn create_producer(
        &self,
        settings: &ProducerSettings,
    ) -> Result<Arc<dyn BrokerProducer>, BrokerError> {
        let mut config = self.base_config();
        for (key, value) in settings.client_properties() {
            config.set(key, value);
        }
        let producer = KafkaProducer::new(&config, settings.clone())?;
        info!(bootstrap = %self.bootstrap_servers, "Kafka producer created");
        Ok(Arc::new(producer))
    }

    fn create_consumer(
        &self,
        settings: &ConsumerSettings,
        group_id: Option<&str>,
    ) -> Result<Box<dyn BrokerConsumer>, BrokerError> {
        let group_id = group_id.map_or_else(
            || format!("voicecore-replay-{}", Uuid::new_v4()),
            str::to_string,
        );
        let mut config = self.base_config();
        for (key, value) in settings.client_properties(&group_id) {
            config.set(key, value);
        }
        let consumer = KafkaConsumer::new(&config, settings.clone())?;
        info!(bootstrap = %self.bootstrap_servers, group_id = %group_id, "Kafka consumer created");
        Ok(Box::new(consumer))
    }
}

pub(crate) fn broker_error(e: &KafkaError) -> BrokerError {
    match e.rdkafka_error_code() {
        Some(RDKafkaErrorCode::BrokerTransportFailure | RDKafkaErrorCode::AllBrokersDown) => {
            BrokerError::Unavailable(e.to_string())
        }
        _ => BrokerError::Transport(e.to_string()),
    }
}
