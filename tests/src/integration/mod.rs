//! Integration flows across the bus and telemetry crates.

pub mod flows;
pub mod telemetry;
pub mod throughput;
