//! Health, readiness and admin HTTP server for the worker.
//!
//! - `/health`, `/healthz` - liveness
//! - `/ready`, `/readyz` - Redis PING, DB `SELECT 1`, runtime ping and
//!   blob root reachability
//! - `/stream/info`, `/metrics` - queue monitoring
//! - `/admin/dlq*` - guarded dead-letter administration

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use blobstore::{BlobStore, FsBlobStore};
use redis::aio::ConnectionManager;
use sandbox::ContainerRuntime;
use sea_orm::DatabaseConnection;
use serde_json::{json, Value};
use std::sync::Arc;
use stream_worker::health::{health_handler, metrics_handler, stream_info_handler};
use stream_worker::HealthState;
use tokio::net::TcpListener;
use tracing::info;

/// State for the worker's readiness probe.
#[derive(Clone)]
pub struct ReadyState {
    pub db: DatabaseConnection,
    pub redis: ConnectionManager,
    pub runtime: Arc<dyn ContainerRuntime>,
    pub blobs: Arc<FsBlobStore>,
}

/// Serve the health, monitoring and admin endpoints.
pub async fn serve(
    health_state: HealthState,
    ready_state: ReadyState,
    port: u16,
) -> eyre::Result<()> {
    let monitor = Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(health_handler))
        .route("/stream/info", get(stream_info_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(health_state.clone());

    let ready = Router::new()
        .route("/ready", get(ready_handler))
        .route("/readyz", get(ready_handler))
        .with_state(ready_state);

    let app = monitor
        .merge(ready)
        .merge(stream_worker::admin_router(health_state));

    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;

    info!(port, "Health and admin server listening");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Readiness: every dependency the worker needs to process a job.
async fn ready_handler(
    State(state): State<ReadyState>,
) -> Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)> {
    let redis = database::redis::check_health(&state.redis).await;
    let postgres = database::postgres::check_health(&state.db).await;
    let runtime = state.runtime.ping().await;
    let blobs = state.blobs.ping().await;

    let checks = json!({
        "redis": label(redis.as_ref().err().map(|e| e.to_string())),
        "postgres": label(postgres.as_ref().err().map(|e| e.to_string())),
        "runtime": label(runtime.as_ref().err().map(|e| e.to_string())),
        "blobstore": label(blobs.as_ref().err().map(|e| e.to_string())),
    });

    if redis.is_ok() && postgres.is_ok() && runtime.is_ok() && blobs.is_ok() {
        Ok((
            StatusCode::OK,
            Json(json!({ "status": "ready", "checks": checks })),
        ))
    } else {
        Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "not_ready", "checks": checks })),
        ))
    }
}

fn label(error: Option<String>) -> Value {
    match error {
        None => json!("ok"),
        Some(message) => json!({ "error": message }),
    }
}
