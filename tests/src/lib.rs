//! # VoiceCore Test Suite
//!
//! Cross-crate flows that exercise the event bus through its public API on
//! the in-memory broker, together with the telemetry crate.
//!
//! ## Structure
//!
//! ```text
//! tests/
//! ├── src/
//! │   ├── fixtures.rs       # Bus construction, sample events, waiting helpers
//! │   └── integration/
//! │       ├── flows.rs      # Publish, consume, dead-letter, replay
//! │       ├── throughput.rs # Concurrent publish rate
//! │       └── telemetry.rs  # Prometheus sink, trace context headers
//! └── benches/
//!     └── throughput.rs     # Criterion publish benchmarks
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p voicecore-tests
//! cargo test -p voicecore-tests integration::flows::
//! cargo bench -p voicecore-tests
//! ```

pub mod fixtures;
pub mod integration;
