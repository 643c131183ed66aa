//! Master HTTP API
//!
//! Agent protocol routes under `/api/agent/*` plus health checks and
//! Prometheus exposition. Every agent route answers with the
//! `{success, data?, error?}` envelope, errors included.

mod agent;

pub use agent::ApiError;

use crate::auth::{RegistrationGuard, TokenService};
use crate::health::{ComponentStatus, HealthRegistry};
use crate::observability::MasterMetrics;
use crate::reconcile::ReconciliationEngine;
use crate::store::{ActivityLog, Store};
use crate::sync::{CONTAINERS_PATH, HEARTBEAT_PATH, METRICS_PATH, REGISTER_PATH};
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub engine: Arc<ReconciliationEngine>,
    pub tokens: Arc<TokenService>,
    pub guard: RegistrationGuard,
    pub health_registry: HealthRegistry,
    pub metrics: MasterMetrics,
}

impl AppState {
    pub fn new(
        store: Arc<dyn Store>,
        activities: Arc<dyn ActivityLog>,
        tokens: TokenService,
        guard: RegistrationGuard,
        health_registry: HealthRegistry,
    ) -> Self {
        Self {
            engine: Arc::new(ReconciliationEngine::new(store.clone(), activities)),
            store,
            tokens: Arc::new(tokens),
            guard,
            health_registry,
            metrics: MasterMetrics::new(),
        }
    }
}

/// Health check response - returns 200 if healthy, 503 if degraded/unhealthy
async fn healthz(State(registry): State<HealthRegistry>) -> impl IntoResponse {
    let health = registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Still operational
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(registry): State<HealthRegistry>) -> impl IntoResponse {
    let readiness = registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus text exposition of the global registry
pub async fn prometheus_metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            Vec::new(),
        );
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
}

/// `/healthz`, `/readyz` and `/metrics`, shared by the agent and the master
pub fn health_router(registry: HealthRegistry) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(prometheus_metrics))
        .with_state(registry)
}

/// Create the master router
pub fn create_router(state: Arc<AppState>) -> Router {
    let health = health_router(state.health_registry.clone());

    Router::new()
        .route(&format!("/{REGISTER_PATH}"), post(agent::register))
        .route(&format!("/{HEARTBEAT_PATH}"), post(agent::heartbeat))
        .route(&format!("/{METRICS_PATH}"), post(agent::metrics))
        .route(&format!("/{CONTAINERS_PATH}"), post(agent::containers))
        .with_state(state)
        .merge(health)
}

/// Bind and serve a router until the shutdown future completes
pub async fn serve<F>(addr: SocketAddr, app: Router, shutdown: F) -> anyhow::Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
