//! HTTP API for health checks, Prometheus metrics and RPC

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use optimizer_lib::{
    error::ErrorKind,
    health::HealthRegistry,
    observability::OptimizerMetrics,
    rpc::{Dispatcher, RpcRequest},
};
use prometheus::{Encoder, TextEncoder};
use std::sync::Arc;
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub metrics: OptimizerMetrics,
    pub dispatcher: Dispatcher,
}

impl AppState {
    pub fn new(
        health_registry: HealthRegistry,
        metrics: OptimizerMetrics,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            health_registry,
            metrics,
            dispatcher,
        }
    }
}

/// HTTP status reported alongside an RPC error
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::CdmEmpty | ErrorKind::EfficacyViolation => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::CdmStale | ErrorKind::ExternalUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn availability(up: bool) -> StatusCode {
    if up {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// 200 while every component is operational; a stale model only degrades
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;
    (availability(health.status.is_operational()), Json(health))
}

/// 200 once the runtime has started and no component is unhealthy
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;
    (availability(readiness.ready), Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!(error = %e, "Failed to encode metrics");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            e.to_string().into_bytes(),
        );
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
}

/// RPC endpoint, one path per conductor topic
async fn rpc(
    State(state): State<Arc<AppState>>,
    Path(topic): Path<String>,
    Json(request): Json<RpcRequest>,
) -> impl IntoResponse {
    let response = state.dispatcher.dispatch(&topic, request).await;
    let status_code = response
        .error
        .as_ref()
        .map_or(StatusCode::OK, |e| status_for(e.kind));
    (status_code, Json(response))
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/rpc/:topic", post(rpc))
        .with_state(state)
}

/// Start the API server
pub async fn serve(
    port: u16,
    state: Arc<AppState>,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
