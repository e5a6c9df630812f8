//! # Schema Registry Client
//!
//! Resolves each topic's schema once and keeps it for the life of the
//! process. Lookups after the first return the same `Arc`.
//!
//! Resolution fails closed: a topic the source does not know yields
//! [`TopicSchema::empty`], which is cached like any other result. A source
//! error also yields the empty schema but is not cached, so the next lookup
//! asks the source again.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::adapters::schema::EmbeddedSchemaSource;
use crate::domain::TopicSchema;
use crate::ports::SchemaSource;

pub struct SchemaRegistryClient {
    source: Arc<dyn SchemaSource>,
    cache: RwLock<HashMap<String, Arc<TopicSchema>>>,
    fetches: AtomicU64,
}

impl SchemaRegistryClient {
    #[must_use]
    pub fn new(source: Arc<dyn SchemaSource>) -> Self {
        Self {
            source,
            cache: RwLock::new(HashMap::new()),
            fetches: AtomicU64::new(0),
        }
    }

    /// Client over the built-in catalog.
    #[must_use]
    pub fn embedded() -> Self {
        Self::new(Arc::new(EmbeddedSchemaSource::new()))
    }

    pub async fn get_schema(&self, topic: &str) -> Arc<TopicSchema> {
        let cached = self.cache.read().get(topic).cloned();
        if let Some(schema) = cached {
            return schema;
        }

        self.fetches.fetch_add(1, Ordering::Relaxed);
        let resolved = match self.source.fetch(topic).await {
            Ok(Some(schema)) => {
                debug!(topic, id = ?schema.id(), source = %self.source.describe(), "Resolved schema");
                schema
            }
            Ok(None) => {
                warn!(topic, source = %self.source.describe(), "No schema registered for topic");
                TopicSchema::empty(topic)
            }
            Err(e) => {
                warn!(topic, error = %e, source = %self.source.describe(), "Schema lookup failed");
                return Arc::new(TopicSchema::empty(topic));
            }
        };

        // Concurrent first lookups may both fetch; the first insert wins so
        // every caller still sees one schema per topic.
        let mut cache = self.cache.write();
        Arc::clone(
            cache
                .entry(topic.to_string())
                .or_insert_with(|| Arc::new(resolved)),
        )
    }

    /// Whether `topic` has a cached resolution.
    #[must_use]
    pub fn is_resolved(&self, topic: &str) -> bool {
        self.cache.read().contains_key(topic)
    }

    /// Topics resolved so far.
    #[must_use]
    pub fn cached_topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.cache.read().keys().cloned().collect();
        topics.sort();
        topics
    }

    /// Number of source fetches performed.
    #[must_use]
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn source_description(&self) -> String {
        self.source.describe()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::domain::TOPIC_CATALOG;
    use crate::error::SchemaError;
    use async_trait::async_trait;

    /// Fails the first `failures` fetches, then serves the embedded catalog.
    pub(crate) struct FlakySource {
        failures: AtomicU64,
    }

    impl FlakySource {
        pub(crate) fn new(failures: u64) -> Self {
            Self {
                failures: AtomicU64::new(failures),
            }
        }
    }

    #[async_trait]
    impl SchemaSource for FlakySource {
        async fn fetch(&self, topic: &str) -> Result<Option<TopicSchema>, SchemaError> {
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(SchemaError::Unavailable("registry down".into()));
            }
            EmbeddedSchemaSource::new().fetch(topic).await
        }

        fn describe(&self) -> String {
            "flaky".into()
        }
    }

    #[tokio::test]
    async fn test_catalog_schemas_are_records() {
        let registry = SchemaRegistryClient::embedded();
        for topic in TOPIC_CATALOG {
            let schema = registry.get_schema(topic).await;
            assert!(!schema.is_empty());
            assert_eq!(schema.definition()["type"], "record");
        }
    }

    #[tokio::test]
    async fn test_unknown_topic_is_empty() {
        let registry = SchemaRegistryClient::embedded();
        let schema = registry.get_schema("not.in.catalog").await;
        assert!(schema.is_empty());
        assert_eq!(schema.definition(), &serde_json::json!({}));
    }

    #[tokio::test]
    async fn test_lookup_is_cached() {
        let registry = SchemaRegistryClient::embedded();
        let first = registry.get_schema("call.events").await;
        let second = registry.get_schema("call.events").await;
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.fetch_count(), 1);
        assert_eq!(registry.cached_topics(), vec!["call.events".to_string()]);
    }

    #[tokio::test]
    async fn test_source_error_fails_closed_then_recovers() {
        let registry = SchemaRegistryClient::new(Arc::new(FlakySource::new(1)));
        assert!(registry.get_schema("call.events").await.is_empty());
        assert!(!registry.is_resolved("call.events"));

        let schema = registry.get_schema("call.events").await;
        assert!(!schema.is_empty());
        assert_eq!(schema.id(), Some(1));
        assert_eq!(registry.fetch_count(), 2);
        assert!(registry.is_resolved("call.events"));
    }

    #[tokio::test]
    async fn test_unknown_topic_is_cached() {
        let registry = SchemaRegistryClient::embedded();
        registry.get_schema("not.in.catalog").await;
        registry.get_schema("not.in.catalog").await;
        assert_eq!(registry.fetch_count(), 1);
    }
}
