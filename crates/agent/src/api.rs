//! HTTP API for health checks, Prometheus metrics and local ingestion

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use ingest_lib::{
    error::ErrorKind,
    health::{ComponentStatus, HealthRegistry},
    observability::{encode_metrics, IngestMetrics},
    sync::{LocalSynchronizer, SyncState, SyncStats},
};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub metrics: IngestMetrics,
    pub synchronizer: LocalSynchronizer,
}

impl AppState {
    pub fn new(
        health_registry: HealthRegistry,
        metrics: IngestMetrics,
        synchronizer: LocalSynchronizer,
    ) -> Self {
        Self {
            health_registry,
            metrics,
            synchronizer,
        }
    }
}

/// Body of `GET /v1/status`
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub queue_depth: usize,
    pub state: SyncState,
    pub stats: SyncStats,
}

/// Health check response - returns 200 if healthy or degraded, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Still accepting points
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint; the queue depth gauge is refreshed per scrape
async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state
        .metrics
        .set_queue_depth(state.synchronizer.queue().len());

    match encode_metrics() {
        Ok(text) => (
            StatusCode::OK,
            [("content-type", "text/plain; charset=utf-8")],
            text,
        ),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain; charset=utf-8")],
                e.to_string(),
            )
        }
    }
}

/// Durably enqueue one data point; 202 once it is on disk
async fn ingest(State(state): State<Arc<AppState>>, Json(body): Json<Value>) -> impl IntoResponse {
    match state.synchronizer.add_value(body).await {
        Ok(entry) => (StatusCode::ACCEPTED, Json(json!({ "seq": entry.id }))),
        Err(e) => {
            let status = if e.kind() == ErrorKind::InvalidDataPoint {
                StatusCode::BAD_REQUEST
            } else {
                error!(error = %e, "Failed to enqueue data point");
                StatusCode::INTERNAL_SERVER_ERROR
            };
            (
                status,
                Json(json!({ "error": e.to_string(), "kind": e.kind() })),
            )
        }
    }
}

/// Run a sync pass and report its outcome
async fn sync_now(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.synchronizer.sync_now().await {
        Ok(outcome) => (StatusCode::OK, Json(json!(outcome))),
        Err(e) => {
            warn!(error = %e, "Sync request rejected");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "error": e.to_string(), "kind": e.kind() })),
            )
        }
    }
}

async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let sync = &state.synchronizer;
    Json(StatusResponse {
        queue_depth: sync.queue().len(),
        state: sync.state(),
        stats: sync.stats().await,
    })
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/v1/datapoints", post(ingest))
        .route("/v1/sync", post(sync_now))
        .route("/v1/status", get(status))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
