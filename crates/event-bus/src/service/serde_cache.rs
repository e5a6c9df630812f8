//! Serializer/deserializer cache: one codec per topic for the process lifetime.
//!
//! Codecs built over a schema the registry did not cache (a failed lookup)
//! are handed out but not kept.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::codec::{AvroDeserializer, AvroSerializer};
use super::schema_registry::SchemaRegistryClient;

pub struct SerdeCache {
    registry: Arc<SchemaRegistryClient>,
    serializers: RwLock<HashMap<String, Arc<AvroSerializer>>>,
    deserializers: RwLock<HashMap<String, Arc<AvroDeserializer>>>,
}

impl SerdeCache {
    #[must_use]
    pub fn new(registry: Arc<SchemaRegistryClient>) -> Self {
        Self {
            registry,
            serializers: RwLock::new(HashMap::new()),
            deserializers: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<SchemaRegistryClient> {
        &self.registry
    }

    pub async fn get_serializer(&self, topic: &str) -> Arc<AvroSerializer> {
        let cached = self.serializers.read().get(topic).cloned();
        if let Some(serializer) = cached {
            return serializer;
        }
        let schema = self.registry.get_schema(topic).await;
        if !self.registry.is_resolved(topic) {
            return Arc::new(AvroSerializer::new(schema));
        }
        let mut cache = self.serializers.write();
        Arc::clone(
            cache
                .entry(topic.to_string())
                .or_insert_with(|| Arc::new(AvroSerializer::new(schema))),
        )
    }

    pub async fn get_deserializer(&self, topic: &str) -> Arc<AvroDeserializer> {
        let cached = self.deserializers.read().get(topic).cloned();
        if let Some(deserializer) = cached {
            return deserializer;
        }
        let schema = self.registry.get_schema(topic).await;
        if !self.registry.is_resolved(topic) {
            return Arc::new(AvroDeserializer::new(schema));
        }
        let mut cache = self.deserializers.write();
        Arc::clone(
            cache
                .entry(topic.to_string())
                .or_insert_with(|| Arc::new(AvroDeserializer::new(schema))),
        )
    }
}
