use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::health::HealthState;
use crate::metrics::WorkerMetrics;

/// Shared state for the liveness/metrics HTTP surface.
#[derive(Clone)]
pub struct MonitorState {
    pub health: Arc<HealthState>,
    pub metrics: Arc<WorkerMetrics>,
}

#[derive(Serialize)]
struct StatusResponse {
    healthy: bool,
    check_state: String,
    last_check_ms: Option<i64>,
    active_transcodes: i64,
}

/// Build the monitor router: `/health`, `/metrics` and `/status`.
pub fn monitor_router(state: MonitorState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/status", get(status_handler))
        .layer(cors)
        .with_state(state)
}

/// Serve the monitor router until the token is cancelled.
pub async fn run_monitor(addr: SocketAddr, state: MonitorState, cancel: CancellationToken) {
    let app = monitor_router(state);

    tracing::info!(addr = %addr, "Starting monitor server");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %addr, error = %e, "Failed to bind monitor server");
            return;
        }
    };

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
    {
        tracing::error!(error = %e, "Monitor server failed");
    }
}

async fn health_handler(State(state): State<MonitorState>) -> impl IntoResponse {
    if state.health.is_healthy() {
        (StatusCode::OK, "OK")
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, "Health check failed")
    }
}

async fn metrics_handler(State(state): State<MonitorState>) -> impl IntoResponse {
    match state.metrics.render() {
        Ok(text) => (StatusCode::OK, text).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to render metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Error gathering metrics: {}", e),
            )
                .into_response()
        }
    }
}

async fn status_handler(State(state): State<MonitorState>) -> impl IntoResponse {
    Json(StatusResponse {
        healthy: state.health.is_healthy(),
        check_state: state.health.check_state().to_string(),
        last_check_ms: state.health.last_check().map(|dt| dt.timestamp_millis()),
        active_transcodes: state.metrics.active_transcodes(),
    })
}
