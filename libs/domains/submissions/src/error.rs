use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

/// Submission pipeline errors.
///
/// Every variant carries a stable short code for the API surface; stack
/// traces and internal detail stay in the logs.
#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("missing required fields")]
    MissingFields,

    #[error("required fields must be strings")]
    InvalidTypes,

    #[error("code must not be empty")]
    EmptyCode,

    #[error("code exceeds the 10 MiB limit")]
    CodeTooLarge,

    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("invalid problem id")]
    InvalidProblemId,

    #[error("invalid user id")]
    InvalidUserId,

    #[error("time limit out of range")]
    InvalidTimeLimit,

    #[error("invalid priority")]
    InvalidPriority,

    #[error("invalid test cases: {0}")]
    InvalidTestCases(String),

    #[error("rate limit exceeded")]
    RateLimitExceeded { retry_after_ms: u64 },

    #[error("submission not found: {0}")]
    NotFound(Uuid),

    #[error("blob store error: {0}")]
    Storage(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type SubmissionResult<T> = Result<T, SubmissionError>;

impl SubmissionError {
    /// Stable short code from the public API contract.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingFields => "MISSING_FIELDS",
            Self::InvalidTypes => "INVALID_TYPES",
            Self::EmptyCode => "EMPTY_CODE",
            Self::CodeTooLarge => "CODE_TOO_LARGE",
            Self::UnsupportedLanguage(_) => "UNSUPPORTED_LANGUAGE",
            Self::InvalidProblemId => "INVALID_PROBLEM_ID",
            Self::InvalidUserId => "INVALID_USER_ID",
            Self::InvalidTimeLimit => "INVALID_TIME_LIMIT",
            Self::InvalidPriority => "INVALID_PRIORITY",
            Self::InvalidTestCases(_) => "INVALID_TEST_CASES",
            Self::RateLimitExceeded { .. } => "RATE_LIMIT_EXCEEDED",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Internal(_) => "UNKNOWN_ERROR",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingFields
            | Self::InvalidTypes
            | Self::EmptyCode
            | Self::UnsupportedLanguage(_)
            | Self::InvalidProblemId
            | Self::InvalidUserId
            | Self::InvalidTimeLimit
            | Self::InvalidPriority
            | Self::InvalidTestCases(_) => StatusCode::BAD_REQUEST,
            Self::CodeTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Storage(_) | Self::Database(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for SubmissionError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = json!({
            "success": false,
            "error": self.code(),
            "message": self.to_string(),
        });

        if status.is_server_error() {
            tracing::error!(error = %self, code = self.code(), "Submission pipeline error");
        }

        let mut response = (status, Json(body)).into_response();

        if let Self::RateLimitExceeded { retry_after_ms } = self {
            let retry_secs = retry_after_ms.div_ceil(1000).max(1);
            if let Ok(value) = retry_secs.to_string().parse() {
                response.headers_mut().insert("retry-after", value);
            }
        }

        response
    }
}

impl From<blobstore::BlobError> for SubmissionError {
    fn from(e: blobstore::BlobError) -> Self {
        SubmissionError::Storage(e.to_string())
    }
}

impl From<sea_orm::DbErr> for SubmissionError {
    fn from(e: sea_orm::DbErr) -> Self {
        SubmissionError::Database(e.to_string())
    }
}
