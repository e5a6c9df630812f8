//! # VoiceCore Bus Runtime
//!
//! Operator entry point for the event bus.
//!
//! ## Startup Sequence
//!
//! 1. Parse the command line
//! 2. Initialize telemetry (logs, optional OTLP spans, Prometheus registry)
//! 3. Build the bus from the environment and install it globally
//! 4. Run the command; Ctrl-C shuts the bus down and lets the command drain
//! 5. Shut the bus down, flushing outstanding deliveries

use std::io;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use voicecore_bus_runtime::cli::{Cli, Command};
use voicecore_bus_runtime::{build_bus, commands, metrics_server};
use voicecore_telemetry::{init_telemetry, TelemetryConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let telemetry_config = TelemetryConfig::from_env();
    let metrics_port = telemetry_config.metrics_port;
    let _telemetry = init_telemetry(telemetry_config)
        .await
        .context("failed to initialize telemetry")?;

    let bus = build_bus(cli.backend)?;
    info!(
        version = voicecore_event_bus::VERSION,
        backend = bus.backend_name(),
        "VoiceCore bus runtime started"
    );

    let command = async {
        match cli.command {
            Command::Tail { topics, group } => {
                let _metrics = metrics_server::spawn(metrics_port);
                commands::tail(bus.clone(), topics, group).await
            }
            Command::Replay { topic, start, end } => {
                let count =
                    commands::replay(&bus, &topic, start, end, &mut io::stdout()).await?;
                info!(topic = %topic, count, "Replay complete");
                Ok(())
            }
            Command::Publish { topic, key, event } => {
                commands::publish(&bus, &topic, &key, &event, &mut io::stdout()).await
            }
            Command::Topics => commands::topics(&bus, &mut io::stdout()).await,
        }
    };
    tokio::pin!(command);

    let result = tokio::select! {
        result = &mut command => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, initiating graceful shutdown...");
            bus.shutdown().await;
            command.await
        }
    };

    bus.shutdown().await;
    info!("VoiceCore bus runtime stopped");
    result
}
