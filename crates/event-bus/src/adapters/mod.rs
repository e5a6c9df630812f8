//! Adapters implementing the outbound ports.

#[cfg(feature = "kafka")]
pub mod kafka;
pub mod memory;
pub mod schema;
