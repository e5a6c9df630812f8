//! # VoiceCore Bus Runtime
//!
//! Wires environment configuration, telemetry and the [`EventBus`] together
//! for the operator commands in [`cli`].
//!
//! [`EventBus`]: voicecore_event_bus::EventBus

pub mod cli;
pub mod commands;
pub mod metrics_server;

use std::sync::Arc;

use anyhow::{Context, Result};
use voicecore_event_bus::{install_event_bus, BrokerBackend, BusConfig, EventBus};
use voicecore_telemetry::PrometheusBusMetrics;

/// Build the bus from the environment, apply CLI overrides and install it
/// as the process-wide instance.
pub fn build_bus(backend: Option<BrokerBackend>) -> Result<Arc<EventBus>> {
    let mut config = BusConfig::from_env().context("invalid bus configuration")?;
    if let Some(backend) = backend {
        config.backend = backend;
    }
    let bus = Arc::new(
        EventBus::connect_with_metrics(config, Arc::new(PrometheusBusMetrics))
            .context("failed to connect event bus")?,
    );
    install_event_bus(Arc::clone(&bus)).context("event bus already installed")?;
    Ok(bus)
}
