//! Prometheus scrape endpoint.

use std::net::SocketAddr;

use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use tokio::task::JoinHandle;
use tracing::{error, info};

pub fn router() -> Router {
    Router::new()
        .route("/metrics", get(metrics))
        .route("/health", get(|| async { "ok" }))
}

async fn metrics() -> Result<String, (StatusCode, String)> {
    voicecore_telemetry::gather_text().map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

/// Serve [`router`] on `0.0.0.0:port` in the background. Port 0 disables it.
pub fn spawn(port: u16) -> Option<JoinHandle<()>> {
    if port == 0 {
        return None;
    }
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(addr = %addr, "Starting metrics endpoint");
    Some(tokio::spawn(async move {
        let result = match tokio::net::TcpListener::bind(addr).await {
            Ok(listener) => axum::serve(listener, router()).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            error!(addr = %addr, error = %e, "Metrics endpoint stopped");
        }
    }))
}
