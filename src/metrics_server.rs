// HTTP admin server
//
// Listens on 0.0.0.0:<port> (default 9090):
// - /metrics            Prometheus scrape endpoint
// - /health             store connectivity and limits (503 when the store is down)
// - /stats/{caller_id}  usage statistics for one caller

use anyhow::{Context, Result};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::metrics;
use crate::rate_limit::{AdmissionError, AdmissionManager};

/// Build the admin router over a shared admission manager
pub fn router(manager: Arc<AdmissionManager>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .route("/stats/{caller_id}", get(stats_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(manager)
}

/// Start the admin HTTP server
///
/// Runs until the listener fails.
pub async fn start_admin_server(port: u16, manager: Arc<AdmissionManager>) -> Result<()> {
    metrics::init().context("Failed to initialize metrics")?;

    let app = router(manager);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    info!("Starting admin server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind admin server")?;

    axum::serve(listener, app)
        .await
        .context("Admin server error")?;

    Ok(())
}

/// Metrics endpoint handler
async fn metrics_handler() -> Response {
    match metrics::gather_metrics() {
        Ok(metrics_text) => (StatusCode::OK, metrics_text).into_response(),
        Err(e) => {
            error!("Failed to gather metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Error gathering metrics: {}", e),
            )
                .into_response()
        }
    }
}

/// Health check endpoint
async fn health_handler(State(manager): State<Arc<AdmissionManager>>) -> Response {
    let report = manager.health_check().await;
    let status = if report.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report)).into_response()
}

async fn stats_handler(
    State(manager): State<Arc<AdmissionManager>>,
    Path(caller_id): Path<String>,
) -> Response {
    match manager.get_user_stats(&caller_id).await {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => error_response(e),
    }
}

fn error_response(err: AdmissionError) -> Response {
    let status =
        StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(json!({ "error": err.to_string() }))).into_response()
}
