//! Integration tests for the agent API endpoints

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use ingest_agent::api::{create_router, AppState};
use ingest_lib::{
    health::{Component, HealthRegistry},
    observability::IngestMetrics,
    queue::{DurableQueue, QueueConfig},
    store::MemoryStore,
    sync::LocalSynchronizer,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

struct TestApp {
    router: Router,
    state: Arc<AppState>,
    store: MemoryStore,
    _dir: TempDir,
}

async fn setup_test_app() -> TestApp {
    let dir = TempDir::new().unwrap();

    let health_registry = HealthRegistry::new();
    for component in Component::ALL {
        health_registry.register(component).await;
    }

    let queue = DurableQueue::open(QueueConfig::new(dir.path().join("queue")))
        .await
        .unwrap();
    let store = MemoryStore::new();
    let (synchronizer, worker) = LocalSynchronizer::builder(queue, Arc::new(store.clone()))
        .initial_backoff(Duration::from_secs(60))
        .health(health_registry.clone())
        .build();
    tokio::spawn(worker.run());

    let state = Arc::new(AppState::new(
        health_registry,
        IngestMetrics::new(),
        synchronizer,
    ));
    let router = create_router(state.clone());

    TestApp {
        router,
        state,
        store,
        _dir: dir,
    }
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Vec<u8>) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body.to_vec())
}

async fn post_json(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn test_healthz_returns_ok_when_healthy() {
    let app = setup_test_app().await;

    let (status, body) = get(&app.router, "/healthz").await;

    assert_eq!(status, StatusCode::OK);
    let health: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "healthy");
    assert!(health["components"]["queue"].is_object());
    assert!(health["components"]["local_store"].is_object());
}

#[tokio::test]
async fn test_healthz_returns_ok_when_degraded() {
    let app = setup_test_app().await;

    app.state
        .health_registry
        .set_degraded(Component::LocalStore, "Transaction failed")
        .await;

    let (status, body) = get(&app.router, "/healthz").await;

    // Degraded still accepts points
    assert_eq!(status, StatusCode::OK);
    let health: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "degraded");
}

#[tokio::test]
async fn test_healthz_returns_503_when_unhealthy() {
    let app = setup_test_app().await;

    app.state
        .health_registry
        .set_unhealthy(Component::Queue, "Queue file unreadable")
        .await;

    let (status, body) = get(&app.router, "/healthz").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let health: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "unhealthy");
}

#[tokio::test]
async fn test_readyz_follows_ready_flag() {
    let app = setup_test_app().await;

    let (status, body) = get(&app.router, "/readyz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let readiness: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(readiness["ready"], false);

    app.state.health_registry.set_ready(true).await;

    let (status, body) = get(&app.router, "/readyz").await;
    assert_eq!(status, StatusCode::OK);
    let readiness: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(readiness["ready"], true);
}

#[tokio::test]
async fn test_readyz_returns_503_when_ready_but_unhealthy() {
    let app = setup_test_app().await;

    app.state.health_registry.set_ready(true).await;
    app.state
        .health_registry
        .set_unhealthy(Component::Synchronizer, "Worker stopped")
        .await;

    let (status, _) = get(&app.router, "/readyz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_metrics_endpoint_returns_prometheus_format() {
    let app = setup_test_app().await;

    app.state.metrics.set_queue_depth(4);
    app.state
        .metrics
        .observe_sync_pass(Duration::from_millis(3));

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers().get("content-type").unwrap();
    assert!(content_type.to_str().unwrap().contains("text/plain"));

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();

    assert!(text.contains("ingest_queue_depth"));
    assert!(text.contains("ingest_sync_pass_latency_seconds_bucket"));
    assert!(text.contains("ingest_sync_pass_latency_seconds_count"));
}

#[tokio::test]
async fn test_metrics_scrape_reports_current_queue_depth() {
    let app = setup_test_app().await;
    for i in 0..3 {
        app.state
            .synchronizer
            .queue()
            .add_value(json!({"pending": i}))
            .await
            .unwrap();
    }

    let (status, body) = get(&app.router, "/metrics").await;
    assert_eq!(status, StatusCode::OK);

    // Metrics are process-global and other tests run alongside, so only
    // check that the gauge is exported with some value.
    let text = String::from_utf8(body).unwrap();
    let depth = text
        .lines()
        .find(|line| line.starts_with("ingest_queue_depth "))
        .expect("queue depth gauge missing");
    assert!(depth["ingest_queue_depth ".len()..].parse::<f64>().is_ok());
}

#[tokio::test]
async fn test_ingest_accepts_object_and_commits_on_sync() {
    let app = setup_test_app().await;

    let (status, body) = post_json(
        &app.router,
        "/v1/datapoints",
        json!({"header": {"id": "p-1"}, "body": {"steps": 12}}),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert!(body["seq"].is_u64());

    let (status, body) = post_json(&app.router, "/v1/sync", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    // Either this request or an earlier triggered pass committed the point
    assert!(body["outcome"] == "committed" || body["outcome"] == "skipped");

    assert_eq!(app.store.len(), 1);
    assert!(app.state.synchronizer.queue().is_empty());
}

#[tokio::test]
async fn test_ingest_rejects_non_object() {
    let app = setup_test_app().await;

    let (status, body) = post_json(&app.router, "/v1/datapoints", json!([1, 2, 3])).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "invalid_data_point");
    assert!(app.state.synchronizer.queue().is_empty());
}

#[tokio::test]
async fn test_sync_on_empty_queue_is_skipped() {
    let app = setup_test_app().await;

    let (status, body) = post_json(&app.router, "/v1/sync", json!({})).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"outcome": "skipped", "detail": "empty"}));
}

#[tokio::test]
async fn test_status_reports_queue_and_stats() {
    let app = setup_test_app().await;

    app.state
        .synchronizer
        .queue()
        .add_value(json!({"pending": true}))
        .await
        .unwrap();

    let (status, body) = get(&app.router, "/v1/status").await;

    assert_eq!(status, StatusCode::OK);
    let report: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(report["queue_depth"], 1);
    assert_eq!(report["state"], "idle");
    assert_eq!(report["stats"]["passes"], 0);
}
