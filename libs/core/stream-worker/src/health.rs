//! Health, readiness and DLQ admin endpoints for worker and API binaries.
//!
//! - `/health`, `/healthz` - liveness (process is up)
//! - `/ready`, `/readyz` - readiness (stream store reachable)
//! - `/stream/info` - queue depth and stream metadata
//! - `/metrics` - Prometheus exposition
//! - `/admin/dlq*` - dead letter inspection, guarded by a shared secret
//!   header and an optional IP allow-list

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use redis::aio::ConnectionManager;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::dlq::DlqManager;
use crate::metrics;

/// Maximum DLQ entries returned per request.
const DLQ_LIST_MAX: usize = 200;
const DLQ_LIST_DEFAULT: usize = 50;

/// Shared state for the health and admin endpoints.
#[derive(Clone)]
pub struct HealthState {
    pub redis: ConnectionManager,
    pub app_name: String,
    pub app_version: String,
    pub stream_name: String,
    pub dlq_stream_name: String,
    /// Shared secret required in `x-admin-token` for admin routes.
    /// `None` disables the admin routes entirely.
    pub admin_token: Option<String>,
    /// Client IPs allowed on admin routes; empty means any.
    pub admin_allow_ips: Vec<String>,
}

impl HealthState {
    pub fn new(
        redis: ConnectionManager,
        app_name: impl Into<String>,
        app_version: impl Into<String>,
        stream_name: impl Into<String>,
        dlq_stream_name: impl Into<String>,
    ) -> Self {
        Self {
            redis,
            app_name: app_name.into(),
            app_version: app_version.into(),
            stream_name: stream_name.into(),
            dlq_stream_name: dlq_stream_name.into(),
            admin_token: None,
            admin_allow_ips: Vec::new(),
        }
    }

    pub fn with_admin_token(mut self, token: Option<String>) -> Self {
        self.admin_token = token;
        self
    }

    pub fn with_admin_allow_ips(mut self, ips: Vec<String>) -> Self {
        self.admin_allow_ips = ips;
        self
    }

    pub fn dlq_manager(&self) -> DlqManager {
        DlqManager::new(
            self.redis.clone(),
            self.stream_name.clone(),
            self.dlq_stream_name.clone(),
        )
    }
}

/// Router with liveness, readiness, stream info and metrics endpoints.
pub fn health_router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/readyz", get(ready_handler))
        .route("/stream/info", get(stream_info_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Router with the guarded DLQ admin endpoints.
pub fn admin_router(state: HealthState) -> Router {
    Router::new()
        .route("/admin/dlq", get(dlq_list_handler))
        .route("/admin/dlq/stats", get(dlq_stats_handler))
        .route("/admin/dlq/{id}", delete(dlq_delete_handler))
        .route("/admin/dlq/{id}/requeue", post(dlq_requeue_handler))
        .with_state(state)
}

/// Liveness probe; responds whenever the process is running.
pub async fn health_handler(State(state): State<HealthState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "name": state.app_name,
        "version": state.app_version,
    }))
}

/// Readiness probe; verifies the stream store answers PING.
pub async fn ready_handler(
    State(state): State<HealthState>,
) -> Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)> {
    let mut conn = state.redis.clone();

    let result: Result<String, _> = redis::cmd("PING").query_async(&mut conn).await;

    match result {
        Ok(response) if response == "PONG" => Ok((
            StatusCode::OK,
            Json(json!({ "status": "ready", "checks": { "redis": "ok" } })),
        )),
        Ok(response) => Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "not_ready",
                "checks": { "redis": format!("unexpected response: {}", response) }
            })),
        )),
        Err(e) => Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "not_ready",
                "checks": { "redis": format!("error: {}", e) }
            })),
        )),
    }
}

/// Queue depth and stream metadata for monitoring.
pub async fn stream_info_handler(
    State(state): State<HealthState>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let mut conn = state.redis.clone();

    let result: Result<redis::streams::StreamInfoStreamReply, _> = redis::cmd("XINFO")
        .arg("STREAM")
        .arg(&state.stream_name)
        .query_async(&mut conn)
        .await;

    match result {
        Ok(info) => {
            metrics::set_queue_depth(&state.stream_name, info.length as f64);
            Ok(Json(json!({
                "stream": state.stream_name,
                "length": info.length,
                "first_entry_id": info.first_entry.id,
                "last_entry_id": info.last_entry.id,
                "groups": info.groups,
            })))
        }
        Err(e) if e.to_string().contains("no such key") => Ok(Json(json!({
            "stream": state.stream_name,
            "length": 0,
            "first_entry_id": null,
            "last_entry_id": null,
            "message": "stream does not exist yet",
        }))),
        Err(e) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": format!("failed to get stream info: {}", e) })),
        )),
    }
}

/// Prometheus metrics exposition.
pub async fn metrics_handler() -> impl IntoResponse {
    match metrics::get_metrics_handle() {
        Some(handle) => handle.render(),
        None => "# Metrics not initialized\n".to_string(),
    }
}

#[derive(Debug, Deserialize)]
pub struct DlqListQuery {
    pub limit: Option<usize>,
    pub offset: Option<String>,
}

/// List DLQ entries (newest last), up to the limit cap.
pub async fn dlq_list_handler(
    State(state): State<HealthState>,
    headers: HeaderMap,
    Query(query): Query<DlqListQuery>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    authorize_admin(&state, &headers)?;

    let limit = query.limit.unwrap_or(DLQ_LIST_DEFAULT).min(DLQ_LIST_MAX);

    let entries = state
        .dlq_manager()
        .list(limit, query.offset.as_deref())
        .await
        .map_err(internal_error)?;

    Ok(Json(json!({
        "count": entries.len(),
        "entries": entries,
    })))
}

/// DLQ length plus oldest and newest entry ids.
pub async fn dlq_stats_handler(
    State(state): State<HealthState>,
    headers: HeaderMap,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    authorize_admin(&state, &headers)?;

    let stats = state.dlq_manager().stats().await.map_err(internal_error)?;

    Ok(Json(json!(stats)))
}

/// Delete one DLQ entry.
pub async fn dlq_delete_handler(
    State(state): State<HealthState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    authorize_admin(&state, &headers)?;

    let deleted = state
        .dlq_manager()
        .delete(&id)
        .await
        .map_err(internal_error)?;

    Ok(Json(json!({ "deleted": deleted, "id": id })))
}

/// Re-queue one DLQ entry onto the main stream with a reset attempt
/// counter.
pub async fn dlq_requeue_handler(
    State(state): State<HealthState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    authorize_admin(&state, &headers)?;

    let requeued = state
        .dlq_manager()
        .requeue(&id)
        .await
        .map_err(internal_error)?;

    if requeued {
        Ok(Json(json!({ "requeued": true, "id": id })))
    } else {
        Err((
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "entry not found", "id": id })),
        ))
    }
}

/// Shared-secret and allow-list check for admin routes.
fn authorize_admin(
    state: &HealthState,
    headers: &HeaderMap,
) -> Result<(), (StatusCode, Json<Value>)> {
    let Some(expected) = state.admin_token.as_deref() else {
        return Err((
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "admin endpoints disabled" })),
        ));
    };

    let provided = headers
        .get("x-admin-token")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if provided != expected {
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "invalid admin token" })),
        ));
    }

    if !state.admin_allow_ips.is_empty() {
        let client_ip = client_ip_from_headers(headers);
        let allowed = client_ip
            .as_deref()
            .map(|ip| state.admin_allow_ips.iter().any(|allow| allow == ip))
            .unwrap_or(false);

        if !allowed {
            return Err((
                StatusCode::FORBIDDEN,
                Json(json!({ "error": "ip not allowed" })),
            ));
        }
    }

    Ok(())
}

/// First hop of `x-forwarded-for`, falling back to `x-real-ip`.
fn client_ip_from_headers(headers: &HeaderMap) -> Option<String> {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = forwarded.split(',').next() {
            let trimmed = first.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }

    headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
}

fn internal_error(e: crate::StreamError) -> (StatusCode, Json<Value>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": e.to_string() })),
    )
}
