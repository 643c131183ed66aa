//! Agent protocol handlers

use super::AppState;
use crate::auth::{extract_bearer, VerifiedToken};
use crate::health::components;
use crate::models::{
    ApiResponse, ContainerInfo, HeartbeatResponse, MetricsReport, RegistrationRequest,
    RegistrationResponse, SyncSummary,
};
use crate::store::StoreError;
use crate::sync::AGENT_SECRET_HEADER;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Error answered with the shared envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    MissingToken,
    InvalidToken,
    InvalidSecret,
    BadRequest(&'static str),
    /// Fixed message; the cause is only logged
    Internal(&'static str),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingToken | ApiError::InvalidToken | ApiError::InvalidSecret => {
                StatusCode::UNAUTHORIZED
            }
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            ApiError::MissingToken => "Missing authorization token",
            ApiError::InvalidToken => "Invalid or expired token",
            ApiError::InvalidSecret => "Invalid or missing agent secret",
            ApiError::BadRequest(message) | ApiError::Internal(message) => message,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(ApiResponse::<()>::err(self.message()))).into_response()
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

/// Verify the bearer and that it still names a known server
async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<VerifiedToken, ApiError> {
    let header = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
    let token = extract_bearer(header).ok_or(ApiError::MissingToken)?;

    let verified = state.tokens.verify(token).map_err(|e| {
        debug!(error = %e, "Rejected bearer token");
        ApiError::InvalidToken
    })?;

    match state.store.get_server(verified.server_id).await {
        Ok(Some(_)) => Ok(verified),
        Ok(None) => {
            warn!(server_id = verified.server_id, "Token names an unknown server");
            Err(ApiError::InvalidToken)
        }
        Err(e) => Err(store_failure(state, e, "Failed to verify server").await),
    }
}

async fn store_failure(state: &AppState, e: StoreError, message: &'static str) -> ApiError {
    error!(error = %e, "{}", message);
    state
        .health_registry
        .record_failure(components::STORE, e.to_string())
        .await;
    ApiError::Internal(message)
}

pub(super) async fn register(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Json<RegistrationRequest>, JsonRejection>,
) -> ApiResult<RegistrationResponse> {
    let secret = headers
        .get(AGENT_SECRET_HEADER)
        .and_then(|v| v.to_str().ok());
    if !state.guard.check(secret) {
        return Err(ApiError::InvalidSecret);
    }

    const MISSING_FIELDS: &str = "Missing required fields: serverName, serverInfo";
    let Json(request) = body.map_err(|e| {
        debug!(error = %e, "Malformed registration body");
        ApiError::BadRequest(MISSING_FIELDS)
    })?;
    if request.server_name.trim().is_empty() {
        return Err(ApiError::BadRequest(MISSING_FIELDS));
    }

    let server = match state
        .store
        .upsert_server(&request.server_name, &request.server_info, &request.agent_version)
        .await
    {
        Ok(server) => server,
        Err(e) => return Err(store_failure(&state, e, "Registration failed").await),
    };

    let token = state.tokens.issue(server.id, &server.name).map_err(|e| {
        error!(error = %e, "Failed to issue token");
        ApiError::Internal("Registration failed")
    })?;

    state.metrics.inc_registrations();
    state.health_registry.record_success(components::STORE).await;
    info!(
        server_id = server.id,
        server_name = %server.name,
        agent_version = %request.agent_version,
        "Agent registered"
    );

    Ok(Json(ApiResponse::ok(RegistrationResponse {
        server_id: server.id,
        token,
    })))
}

pub(super) async fn heartbeat(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<HeartbeatResponse> {
    let verified = authenticate(&state, &headers).await?;
    let now = Utc::now();

    if let Err(e) = state.store.mark_server_online(verified.server_id, now).await {
        return Err(store_failure(&state, e, "Heartbeat failed").await);
    }

    let token_expires_in = verified.time_to_expiry(now);
    debug!(
        server_id = verified.server_id,
        server_name = %verified.server_name,
        token_expires_in = token_expires_in,
        "Heartbeat"
    );

    Ok(Json(ApiResponse::ok(HeartbeatResponse {
        server_time: now,
        token_expires_in,
    })))
}

pub(super) async fn metrics(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Json<MetricsReport>, JsonRejection>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    let verified = authenticate(&state, &headers).await?;

    const MISSING_METRICS: &str = "Missing or empty metrics array";
    let Json(report) = body.map_err(|e| {
        debug!(error = %e, "Malformed metrics body");
        ApiError::BadRequest(MISSING_METRICS)
    })?;
    if report.metrics.is_empty() {
        return Err(ApiError::BadRequest(MISSING_METRICS));
    }

    let inserted = match state
        .store
        .insert_metrics(verified.server_id, &report.metrics)
        .await
    {
        Ok(inserted) => inserted,
        Err(e) => return Err(store_failure(&state, e, "Failed to store metrics").await),
    };

    state.metrics.add_samples_ingested(inserted);
    state.health_registry.record_success(components::STORE).await;
    debug!(
        server_id = verified.server_id,
        received = report.metrics.len(),
        inserted = inserted,
        "Metrics stored"
    );

    Ok(Json(ApiResponse::empty()))
}

pub(super) async fn containers(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult<SyncSummary> {
    let verified = authenticate(&state, &headers).await?;

    let Json(body) = body.map_err(|e| {
        debug!(error = %e, "Malformed containers body");
        ApiError::BadRequest("Missing containers array")
    })?;
    let containers = decode_containers(body)?;

    let summary = match state
        .engine
        .sync(verified.server_id, &verified.server_name, &containers)
        .await
    {
        Ok(summary) => summary,
        Err(e) => {
            state
                .health_registry
                .record_failure(components::RECONCILER, e.to_string())
                .await;
            return Err(store_failure(&state, e, "Failed to sync containers").await);
        }
    };

    state.health_registry.record_success(components::RECONCILER).await;
    state.health_registry.record_success(components::STORE).await;

    Ok(Json(ApiResponse::ok(summary)))
}

/// An absent array and an undecodable entry are reported separately
fn decode_containers(mut body: Value) -> Result<Vec<ContainerInfo>, ApiError> {
    let Some(items) = body
        .get_mut("containers")
        .filter(|v| v.is_array())
        .map(Value::take)
    else {
        return Err(ApiError::BadRequest("Missing containers array"));
    };

    serde_json::from_value(items).map_err(|e| {
        debug!(error = %e, "Undecodable container entry");
        ApiError::BadRequest("Invalid container entry")
    })
}
