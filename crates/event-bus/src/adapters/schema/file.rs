//! Schemas read from a directory of `<topic>.avsc` files.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use crate::domain::{murmur2, TopicSchema};
use crate::error::SchemaError;
use crate::ports::SchemaSource;

/// Loads `<dir>/<topic>.avsc`.
///
/// The registry id is a fingerprint of the file contents, so every process
/// reading the same file frames records with the same id.
#[derive(Debug, Clone)]
pub struct FileSchemaSource {
    dir: PathBuf,
}

impl FileSchemaSource {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, topic: &str) -> PathBuf {
        self.dir.join(format!("{topic}.avsc"))
    }
}

/// Stable 31-bit id derived from the schema text.
#[must_use]
pub fn fingerprint_id(text: &str) -> u32 {
    (murmur2(text.trim().as_bytes()) & 0x7fff_ffff).unsigned_abs()
}

#[async_trait]
impl SchemaSource for FileSchemaSource {
    async fn fetch(&self, topic: &str) -> Result<Option<TopicSchema>, SchemaError> {
        let path = self.path_for(topic);
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(topic, path = %path.display(), "No schema file");
                return Ok(None);
            }
            Err(source) => {
                return Err(SchemaError::Io {
                    path: path.display().to_string(),
                    source,
                })
            }
        };
        TopicSchema::parse(topic, fingerprint_id(&text), &text).map(Some)
    }

    fn describe(&self) -> String {
        format!("directory {}", self.dir.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA: &str = r#"{"type":"record","name":"Tenant","fields":[{"name":"tenant_id","type":"string"}]}"#;

    #[tokio::test]
    async fn test_reads_schema_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("tenants.avsc"), SCHEMA).unwrap();

        let source = FileSchemaSource::new(dir.path());
        let schema = source.fetch("tenants").await.unwrap().unwrap();
        assert_eq!(schema.record_name(), Some("Tenant"));
        assert_eq!(schema.id(), Some(fingerprint_id(SCHEMA)));
    }

    #[tokio::test]
    async fn test_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let source = FileSchemaSource::new(dir.path());
        assert!(source.fetch("absent").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalid_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.avsc"), "{").unwrap();
        let source = FileSchemaSource::new(dir.path());
        assert!(source.fetch("broken").await.is_err());
    }

    #[test]
    fn test_fingerprint_ignores_surrounding_whitespace() {
        assert_eq!(fingerprint_id(SCHEMA), fingerprint_id(&format!("\n{SCHEMA}\n")));
    }
}
