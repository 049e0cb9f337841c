use crate::state::AppState;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use domain_submissions::SubmissionError;
use uuid::Uuid;

/// Fetch the current state of one submission.
#[utoipa::path(
    get,
    path = "/api/submissions/{id}",
    params(("id" = Uuid, Path, description = "Submission id")),
    responses(
        (status = 200, description = "Submission state", body = domain_submissions::SubmissionView),
        (status = 404, description = "Unknown submission id"),
    ),
    tag = "submissions"
)]
pub async fn get_submission_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    let Ok(id) = Uuid::parse_str(&id) else {
        return SubmissionError::NotFound(Uuid::nil()).into_response();
    };

    match state.intake.get_submission(id).await {
        Ok(view) => Json(view).into_response(),
        Err(e) => e.into_response(),
    }
}
