//! Telemetry configuration from environment variables.

use std::env;

/// Configuration for logging, tracing and metrics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Service name for traces and logs
    pub service_name: String,

    /// Deployment environment (development, staging, production)
    pub environment: String,

    /// OpenTelemetry OTLP collector endpoint
    pub otlp_endpoint: String,

    /// Export spans over OTLP
    pub otlp_enabled: bool,

    /// Log filter directive (trace, debug, info, warn, error, or a full `EnvFilter`)
    pub log_level: String,

    /// Whether to write logs to stdout
    pub console_output: bool,

    /// Whether to emit JSON formatted logs
    pub json_logs: bool,

    /// Port the runtime serves `/metrics` on
    pub metrics_port: u16,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "voicecore-event-bus".to_string(),
            environment: "development".to_string(),
            otlp_endpoint: "http://localhost:4317".to_string(),
            otlp_enabled: false,
            log_level: "info".to_string(),
            console_output: true,
            json_logs: false,
            metrics_port: 9464,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `OTEL_SERVICE_NAME`: Service name (default: voicecore-event-bus)
    /// - `VC_ENVIRONMENT`: Deployment environment (default: development)
    /// - `OTEL_EXPORTER_OTLP_ENDPOINT`: Collector endpoint (default: http://localhost:4317)
    /// - `VC_OTLP_ENABLED`: Export spans (default: true when the endpoint is set)
    /// - `VC_LOG_LEVEL` or `RUST_LOG`: Log filter (default: info)
    /// - `VC_CONSOLE_OUTPUT`: Enable console output (default: true)
    /// - `VC_JSON_LOGS`: Enable JSON logs (default: false in dev, true in containers)
    /// - `VC_METRICS_PORT`: Prometheus metrics port (default: 9464)
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) over an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let is_container =
            lookup("KUBERNETES_SERVICE_HOST").is_some() || lookup("DOCKER_CONTAINER").is_some();
        let endpoint = lookup("OTEL_EXPORTER_OTLP_ENDPOINT");

        Self {
            service_name: lookup("OTEL_SERVICE_NAME").unwrap_or(defaults.service_name),
            environment: lookup("VC_ENVIRONMENT").unwrap_or(defaults.environment),
            otlp_enabled: lookup("VC_OTLP_ENABLED")
                .map(|v| is_truthy(&v))
                .unwrap_or(endpoint.is_some()),
            otlp_endpoint: endpoint.unwrap_or(defaults.otlp_endpoint),
            log_level: lookup("VC_LOG_LEVEL")
                .or_else(|| lookup("RUST_LOG"))
                .unwrap_or(defaults.log_level),
            console_output: lookup("VC_CONSOLE_OUTPUT")
                .map(|v| v.to_lowercase() != "false" && v != "0")
                .unwrap_or(true),
            json_logs: lookup("VC_JSON_LOGS")
                .map(|v| is_truthy(&v))
                .unwrap_or(is_container),
            metrics_port: lookup("VC_METRICS_PORT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.metrics_port),
        }
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "true" | "1" | "yes" | "on")
}
