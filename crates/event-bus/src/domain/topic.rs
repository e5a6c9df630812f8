//! Topic catalog and naming rules.

use crate::error::BusError;

pub const CALL_EVENTS: &str = "call.events";
pub const AI_INTERACTIONS: &str = "ai.interactions";
pub const CRM_UPDATES: &str = "crm.updates";
pub const BILLING_TRANSACTIONS: &str = "billing.transactions";
pub const SECURITY_AUDIT: &str = "security.audit";
pub const SYSTEM_METRICS: &str = "system.metrics";

/// Topics with a built-in schema.
pub const TOPIC_CATALOG: [&str; 6] = [
    CALL_EVENTS,
    AI_INTERACTIONS,
    CRM_UPDATES,
    BILLING_TRANSACTIONS,
    SECURITY_AUDIT,
    SYSTEM_METRICS,
];

/// Suffix of the dead-letter companion topic.
pub const DLQ_SUFFIX: &str = ".dlq";

/// Broker limit on topic name length.
pub const MAX_TOPIC_LEN: usize = 249;

/// Name of the dead-letter topic for `topic`.
#[must_use]
pub fn dlq_topic(topic: &str) -> String {
    format!("{topic}{DLQ_SUFFIX}")
}

#[must_use]
pub fn is_dlq_topic(topic: &str) -> bool {
    topic.ends_with(DLQ_SUFFIX)
}

#[must_use]
pub fn is_catalog_topic(topic: &str) -> bool {
    TOPIC_CATALOG.contains(&topic)
}

/// Check a topic name against the broker's naming rules.
///
/// # Errors
///
/// `BusError::InvalidTopic` for empty names, `.`/`..`, names longer than
/// 249 characters, or characters outside `[A-Za-z0-9._-]`.
pub fn validate_topic(topic: &str) -> Result<(), BusError> {
    let legal = |c: char| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-');
    if topic.is_empty()
        || topic == "."
        || topic == ".."
        || topic.len() > MAX_TOPIC_LEN
        || !topic.chars().all(legal)
    {
        return Err(BusError::InvalidTopic(topic.to_string()));
    }
    Ok(())
}
