//! Schemas compiled into the binary for the built-in topic catalog.

use async_trait::async_trait;

use crate::domain::topic::{
    AI_INTERACTIONS, BILLING_TRANSACTIONS, CALL_EVENTS, CRM_UPDATES, SECURITY_AUDIT,
    SYSTEM_METRICS,
};
use crate::domain::TopicSchema;
use crate::error::SchemaError;
use crate::ports::SchemaSource;

/// `(topic, registry id, .avsc text)`
const CATALOG: [(&str, u32, &str); 6] = [
    (CALL_EVENTS, 1, include_str!("../../../schemas/call_events.avsc")),
    (AI_INTERACTIONS, 2, include_str!("../../../schemas/ai_interactions.avsc")),
    (CRM_UPDATES, 3, include_str!("../../../schemas/crm_updates.avsc")),
    (
        BILLING_TRANSACTIONS,
        4,
        include_str!("../../../schemas/billing_transactions.avsc"),
    ),
    (SECURITY_AUDIT, 5, include_str!("../../../schemas/security_audit.avsc")),
    (SYSTEM_METRICS, 6, include_str!("../../../schemas/system_metrics.avsc")),
];

#[derive(Debug, Default, Clone, Copy)]
pub struct EmbeddedSchemaSource;

impl EmbeddedSchemaSource {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Topics with a bundled schema, with their ids.
    #[must_use]
    pub fn topics() -> Vec<(&'static str, u32)> {
        CATALOG.iter().map(|(topic, id, _)| (*topic, *id)).collect()
    }
}

#[async_trait]
impl SchemaSource for EmbeddedSchemaSource {
    async fn fetch(&self, topic: &str) -> Result<Option<TopicSchema>, SchemaError> {
        CATALOG
            .iter()
            .find(|(name, _, _)| *name == topic)
            .map(|(name, id, text)| TopicSchema::parse(*name, *id, text))
            .transpose()
    }

    fn describe(&self) -> String {
        "embedded catalog".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TOPIC_CATALOG;

    #[tokio::test]
    async fn test_every_catalog_topic_has_a_record_schema() {
        let source = EmbeddedSchemaSource::new();
        for topic in TOPIC_CATALOG {
            let schema = source.fetch(topic).await.unwrap().unwrap();
            assert_eq!(schema.definition()["type"], "record", "{topic}");
            let fields = schema.field_names();
            assert!(fields.contains(&"event_id"), "{topic}");
            assert!(fields.contains(&"timestamp"), "{topic}");
        }
    }

    #[tokio::test]
    async fn test_unknown_topic_is_none() {
        let source = EmbeddedSchemaSource::new();
        assert!(source.fetch("payments.legacy").await.unwrap().is_none());
    }

    #[test]
    fn test_ids_are_unique() {
        let mut ids: Vec<u32> = EmbeddedSchemaSource::topics().iter().map(|(_, id)| *id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), TOPIC_CATALOG.len());
    }
}
