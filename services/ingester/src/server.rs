//! HTTP status server for the ingester service.
//!
//! Provides endpoints for:
//! - `GET /health` - Health check
//! - `GET /status` - Report of the most recent cycle
//! - `GET /stations` - Configured station ids grouped by project
//! - `GET /metrics` - Prometheus metrics (when enabled)

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::pipeline::SharedPipeline;

/// Shared state for the HTTP server.
pub struct ServerState {
    pub pipeline: SharedPipeline,
    pub prometheus: Option<PrometheusHandle>,
}

pub fn create_router(state: Arc<ServerState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/stations", get(stations_handler))
        .route("/metrics", get(metrics_handler))
        .layer(cors)
        .layer(Extension(state))
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn status_handler(Extension(state): Extension<Arc<ServerState>>) -> Response {
    match state.pipeline.last_report().await {
        Some(report) => Json(report).into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "starting", "message": "no cycle has completed yet" })),
        )
            .into_response(),
    }
}

async fn stations_handler(Extension(state): Extension<Arc<ServerState>>) -> impl IntoResponse {
    Json(state.pipeline.stations_by_project())
}

async fn metrics_handler(Extension(state): Extension<Arc<ServerState>>) -> Response {
    match &state.prometheus {
        Some(handle) => (StatusCode::OK, handle.render()).into_response(),
        None => (StatusCode::NOT_FOUND, "metrics disabled\n").into_response(),
    }
}

pub async fn run_server(state: Arc<ServerState>, port: u16) -> anyhow::Result<()> {
    let app = create_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    info!(port = port, "Starting ingester status server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
