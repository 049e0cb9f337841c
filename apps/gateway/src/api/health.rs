use crate::state::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use blobstore::BlobStore;
use serde_json::{json, Value};

/// Liveness and readiness routes for the gateway.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .with_state(state)
}

/// Liveness: the process is serving requests.
async fn health_handler() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Readiness: all three backing stores answer.
async fn ready_handler(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)> {
    let postgres = database::postgres::check_health(&state.db).await;
    let redis = database::redis::check_health(&state.redis).await;
    let blobs = state.blobs.ping().await;

    let checks = json!({
        "postgres": check_label(postgres.as_ref().err().map(|e| e.to_string())),
        "redis": check_label(redis.as_ref().err().map(|e| e.to_string())),
        "blobstore": check_label(blobs.as_ref().err().map(|e| e.to_string())),
    });

    if postgres.is_ok() && redis.is_ok() && blobs.is_ok() {
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

fn check_label(error: Option<String>) -> Value {
    match error {
        None => json!("ok"),
        Some(message) => json!({ "error": message }),
    }
}
