pub mod health;
pub mod submissions;
pub mod submit;

use crate::state::AppState;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;

/// Body cap: the 10 MiB code limit plus envelope allowance.
const BODY_LIMIT_BYTES: usize = 10 * 1024 * 1024 + 64 * 1024;

/// The public API routes.
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/api/submit", post(submit::submit_handler))
        .route(
            "/api/submissions/{id}",
            get(submissions::get_submission_handler),
        )
        .layer(DefaultBodyLimit::max(BODY_LIMIT_BYTES))
        .with_state(state)
}
