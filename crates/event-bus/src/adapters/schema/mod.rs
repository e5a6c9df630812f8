//! Schema sources.

mod embedded;
mod file;
mod http;

pub use embedded::EmbeddedSchemaSource;
pub use file::{fingerprint_id, FileSchemaSource};
pub use http::HttpSchemaSource;
