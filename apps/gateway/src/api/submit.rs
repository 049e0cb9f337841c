use crate::state::AppState;
use axum::extract::rejection::JsonRejection;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use domain_submissions::{SubmissionError, SubmitOutcome, SubmitRequest};
use serde_json::json;
use std::net::SocketAddr;

/// Accept a code submission.
///
/// Returns 201 when stored and queued, 202 when stored but the queue push
/// failed (the record stays pending for the sweeper). Validation and
/// rate-limit failures surface as stable short codes.
#[utoipa::path(
    post,
    path = "/api/submit",
    request_body = SubmitRequest,
    responses(
        (status = 201, description = "Accepted and queued"),
        (status = 202, description = "Accepted, queueing delayed"),
        (status = 400, description = "Validation failed"),
        (status = 413, description = "Code exceeds 10 MiB"),
        (status = 429, description = "Rate limit exceeded"),
        (status = 500, description = "Storage or database failure"),
    ),
    tag = "submissions"
)]
pub async fn submit_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Result<Json<SubmitRequest>, JsonRejection>,
) -> Response {
    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => return map_json_rejection(rejection).into_response(),
    };

    let client_ip = client_ip(&headers, peer);

    match state.intake.submit(request, &client_ip).await {
        Ok(SubmitOutcome::Queued {
            submission_id,
            timestamp,
        }) => (
            StatusCode::CREATED,
            Json(json!({
                "success": true,
                "submissionId": submission_id,
                "timestamp": timestamp.to_rfc3339(),
            })),
        )
            .into_response(),
        Ok(SubmitOutcome::Deferred {
            submission_id,
            timestamp,
        }) => (
            StatusCode::ACCEPTED,
            Json(json!({
                "success": true,
                "submissionId": submission_id,
                "timestamp": timestamp.to_rfc3339(),
                "message": "queuing delayed",
            })),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

/// Map body extraction failures onto the contract's error codes.
fn map_json_rejection(rejection: JsonRejection) -> SubmissionError {
    // A body over the limit surfaces as a failed buffering rejection
    if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return SubmissionError::CodeTooLarge;
    }

    match rejection {
        JsonRejection::JsonDataError(_) => SubmissionError::InvalidTypes,
        JsonRejection::JsonSyntaxError(_) => SubmissionError::InvalidTypes,
        JsonRejection::MissingJsonContentType(_) => SubmissionError::MissingFields,
        other => SubmissionError::Internal(other.to_string()),
    }
}

/// Resolve the client IP: first `x-forwarded-for` hop, then `x-real-ip`,
/// then the socket peer.
fn client_ip(headers: &HeaderMap, peer: SocketAddr) -> String {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = forwarded.split(',').next() {
            let trimmed = first.trim();
            if !trimmed.is_empty() {
                return trimmed.to_string();
            }
        }
    }

    if let Some(real_ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        let trimmed = real_ip.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    peer.ip().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_client_ip_prefers_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.9, 10.0.0.1"),
        );

        let peer: SocketAddr = "192.0.2.1:9999".parse().unwrap();
        assert_eq!(client_ip(&headers, peer), "203.0.113.9");
    }

    #[test]
    fn test_client_ip_falls_back_to_peer() {
        let headers = HeaderMap::new();
        let peer: SocketAddr = "192.0.2.1:9999".parse().unwrap();
        assert_eq!(client_ip(&headers, peer), "192.0.2.1");
    }
}
