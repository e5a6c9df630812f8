//! Confluent-compatible schema registry client.
//!
//! Subjects follow the topic-name strategy: the value schema of topic `t` is
//! registered under subject `t-value`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

use crate::domain::TopicSchema;
use crate::error::SchemaError;
use crate::ports::SchemaSource;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct LatestVersion {
    id: u32,
    schema: String,
}

#[derive(Debug, Clone)]
pub struct HttpSchemaSource {
    base_url: String,
    client: reqwest::Client,
}

impl HttpSchemaSource {
    /// # Errors
    ///
    /// Fails when the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>) -> Result<Self, SchemaError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| SchemaError::Unavailable(e.to_string()))?;
        Ok(Self::with_client(base_url, client))
    }

    #[must_use]
    pub fn with_client(base_url: impl Into<String>, client: reqwest::Client) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { base_url, client }
    }

    /// URL of the latest value schema for `topic`.
    #[must_use]
    pub fn latest_url(&self, topic: &str) -> String {
        format!("{}/subjects/{topic}-value/versions/latest", self.base_url)
    }
}

#[async_trait]
impl SchemaSource for HttpSchemaSource {
    async fn fetch(&self, topic: &str) -> Result<Option<TopicSchema>, SchemaError> {
        let url = self.latest_url(topic);
        let response = self
            .client
            .get(&url)
            .header("Accept", "application/vnd.schemaregistry.v1+json")
            .send()
            .await
            .map_err(|e| SchemaError::Unavailable(format!("GET {url}: {e}")))?;

        if response.status() == StatusCode::NOT_FOUND {
            debug!(topic, "Subject not registered");
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(SchemaError::Unavailable(format!(
                "GET {url}: HTTP {}",
                response.status()
            )));
        }

        let latest: LatestVersion = response
            .json()
            .await
            .map_err(|e| SchemaError::Invalid {
                topic: topic.to_string(),
                reason: format!("unexpected registry response: {e}"),
            })?;
        TopicSchema::parse(topic, latest.id, &latest.schema).map(Some)
    }

    fn describe(&self) -> String {
        format!("registry {}", self.base_url)
    }
}
