//! # VoiceCore Telemetry
//!
//! Logging, tracing and metrics for the event bus and its runtime.
//!
//! ## Components
//!
//! - **Logs:** `tracing-subscriber` with an `EnvFilter` and a human or JSON
//!   console layer
//! - **Traces:** OpenTelemetry spans exported over OTLP, plus `traceparent`
//!   propagation through record headers
//! - **Metrics:** Prometheus counters behind [`PrometheusBusMetrics`]
//!
//! ## Usage
//!
//! ```rust,ignore
//! use voicecore_telemetry::{init_telemetry, TelemetryConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let _guard = init_telemetry(TelemetryConfig::from_env()).await?;
//!     // Spans are flushed when the guard drops.
//!     Ok(())
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | `http://localhost:4317` | OTLP collector |
//! | `OTEL_SERVICE_NAME` | `voicecore-event-bus` | Service name in traces |
//! | `VC_OTLP_ENABLED` | set iff endpoint given | Export spans |
//! | `VC_LOG_LEVEL` / `RUST_LOG` | `info` | Log filter |
//! | `VC_JSON_LOGS` | `false` (`true` in containers) | JSON log lines |
//! | `VC_CONSOLE_OUTPUT` | `true` | Write logs to stdout |
//! | `VC_METRICS_PORT` | `9464` | Prometheus scrape port |
//! | `VC_ENVIRONMENT` | `development` | Deployment environment |

mod config;
mod context;
mod logging;
mod metrics;
mod tracing_setup;

pub use config::TelemetryConfig;
pub use context::{
    extract_traceparent, inject_traceparent, link_parent, PropagatedContext, TRACEPARENT_HEADER,
};
pub use logging::init_logging;
pub use metrics::{gather_text, register_metrics, MetricsHandle, PrometheusBusMetrics};
pub use tracing_setup::TracingGuard;

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to initialize OpenTelemetry tracer: {0}")]
    TracerInit(String),

    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Initialize logging, optional span export, and the metrics registry.
///
/// Returns a guard that must be held for the lifetime of the application.
/// When dropped, it flushes pending spans.
pub async fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    let metrics = register_metrics()?;

    let tracing = if config.otlp_enabled {
        Some(tracing_setup::init_tracing(&config).await?)
    } else {
        logging::init_logging(&config)?;
        None
    };

    Ok(TelemetryGuard {
        _tracing: tracing,
        metrics,
    })
}

/// Guard that keeps telemetry active. Drop to flush and shutdown.
pub struct TelemetryGuard {
    _tracing: Option<TracingGuard>,
    metrics: MetricsHandle,
}

impl TelemetryGuard {
    #[must_use]
    pub fn metrics(&self) -> &MetricsHandle {
        &self.metrics
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        tracing::info!("Shutting down telemetry");
    }
}
