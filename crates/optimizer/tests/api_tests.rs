//! Integration tests for the optimizer API endpoints

#[path = "../src/api.rs"]
#[allow(dead_code)]
mod api;

use api::{create_router, AppState};
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use optimizer_lib::{
    action::ActionContext,
    applier::Applier,
    collector::{CollectorConfig, CollectorManager},
    decision::DecisionEngine,
    health::{components, HealthRegistry},
    observability::OptimizerMetrics,
    retry::RetryPolicy,
    rpc::{Dispatcher, RpcResponse, APPLIER_TOPIC, DECISION_ENGINE_TOPIC},
    simulator::SimulatedCloud,
    store::InMemoryStore,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use uuid::Uuid;

async fn setup_test_app() -> (Router, Arc<AppState>) {
    let health_registry = HealthRegistry::new();
    health_registry.register(components::DECISION_ENGINE).await;
    health_registry.register(components::COMPUTE_COLLECTOR).await;

    let store = Arc::new(InMemoryStore::new());
    let cloud = Arc::new(SimulatedCloud::default());
    let collectors = CollectorManager::for_provider(
        cloud.clone(),
        CollectorConfig {
            period: Duration::from_secs(3600),
            retry: RetryPolicy::new(1, Duration::from_millis(1)),
        },
    );
    let applier = Applier::builder()
        .store(store.clone())
        .context(ActionContext::new().with_compute(cloud))
        .build()
        .unwrap();
    let engine = DecisionEngine::builder()
        .store(store)
        .collectors(Arc::new(collectors))
        .applier(applier.clone())
        .build()
        .unwrap();

    let state = Arc::new(AppState::new(
        health_registry,
        OptimizerMetrics::new(),
        Dispatcher::new(engine, applier),
    ));
    let router = create_router(state.clone());

    (router, state)
}

async fn get(app: Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
}

async fn rpc(app: Router, topic: &str, method: &str, params: Value) -> (StatusCode, RpcResponse) {
    let request = json!({
        "request_id": Uuid::new_v4(),
        "version": "1.0",
        "method": method,
        "params": params,
    });
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/rpc/{}", topic))
                .header("content-type", "application/json")
                .body(Body::from(request.to_string()))
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
    let (app, _state) = setup_test_app().await;

    let (status, health) = get(app, "/healthz").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "healthy");
}

#[tokio::test]
async fn test_healthz_returns_ok_when_degraded() {
    let (app, state) = setup_test_app().await;

    state
        .health_registry
        .set_degraded(components::COMPUTE_COLLECTOR, "model is stale")
        .await;

    let (status, health) = get(app, "/healthz").await;

    // A stale model keeps the process operational
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "degraded");
    assert_eq!(
        health["components"]["compute_collector"]["message"],
        "model is stale"
    );
}

#[tokio::test]
async fn test_healthz_returns_503_when_unhealthy() {
    let (app, state) = setup_test_app().await;

    state
        .health_registry
        .set_unhealthy(components::DECISION_ENGINE, "Plugin synchronization failed")
        .await;

    let (status, health) = get(app, "/healthz").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(health["status"], "unhealthy");
}

#[tokio::test]
async fn test_readyz_follows_readiness() {
    let (app, state) = setup_test_app().await;

    let (status, readiness) = get(app.clone(), "/readyz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(readiness["ready"], false);

    state.health_registry.set_ready(true).await;
    let (status, readiness) = get(app, "/readyz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(readiness["ready"], true);
}

#[tokio::test]
async fn test_metrics_endpoint_returns_prometheus_format() {
    let (app, _state) = setup_test_app().await;

    let response = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers().get("content-type").unwrap();
    assert!(content_type.to_str().unwrap().contains("text/plain"));
}

#[tokio::test]
async fn test_rpc_creates_and_reads_audit() {
    let (app, _state) = setup_test_app().await;

    let (status, created) = rpc(
        app.clone(),
        DECISION_ENGINE_TOPIC,
        "create_audit",
        json!({"goal": "dummy", "name": "nightly"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let audit = created.result.unwrap();
    assert_eq!(audit["name"], "nightly");
    assert_eq!(audit["state"], "PENDING");

    let (status, fetched) = rpc(
        app.clone(),
        DECISION_ENGINE_TOPIC,
        "get_audit",
        json!({"audit_uuid": audit["uuid"]}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched.result.unwrap()["uuid"], audit["uuid"]);

    let (status, plans) = rpc(
        app,
        APPLIER_TOPIC,
        "list_action_plans",
        json!({"audit_uuid": audit["uuid"]}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(plans.result, Some(json!([])));
}

#[tokio::test]
async fn test_rpc_errors_map_to_http_status() {
    let (app, _state) = setup_test_app().await;

    let (status, response) = rpc(app.clone(), "nowhere.conductor", "get_audit", Value::Null).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(response.error.is_some());

    let (status, _) = rpc(app.clone(), DECISION_ENGINE_TOPIC, "explode", Value::Null).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = rpc(
        app.clone(),
        APPLIER_TOPIC,
        "launch_action_plan",
        json!({"action_plan_uuid": Uuid::new_v4()}),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, created) = rpc(app.clone(), DECISION_ENGINE_TOPIC, "create_audit", json!({"goal": "dummy"})).await;
    let audit_uuid = created.result.unwrap()["uuid"].clone();
    let (status, _) = rpc(app.clone(), DECISION_ENGINE_TOPIC, "cancel_audit", json!({"audit_uuid": audit_uuid})).await;
    assert_eq!(status, StatusCode::OK);
    let (status, response) = rpc(app, DECISION_ENGINE_TOPIC, "cancel_audit", json!({"audit_uuid": audit_uuid})).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(response.error.unwrap().kind.to_string(), "conflict");
}

#[tokio::test]
async fn test_rpc_rejects_malformed_body() {
    let (app, _state) = setup_test_app().await;

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/rpc/{}", DECISION_ENGINE_TOPIC))
                .header("content-type", "application/json")
                .body(Body::from("{\"params\": {}}"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert!(response.status().is_client_error());
}
