use chrono::{DateTime, Utc};
use sea_orm::{DeriveActiveEnum, EnumIter};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::Display;
use utoipa::ToSchema;
use uuid::Uuid;

use judge::JudgeConfig;
use sandbox::TestCase;
use stream_worker::JobPriority;

/// Code size cap: 10 MiB inclusive.
pub const MAX_CODE_SIZE_BYTES: usize = 10 * 1024 * 1024;
/// Identifier length cap for user and problem ids.
pub const MAX_ID_LENGTH: usize = 255;
/// Time limit bounds in milliseconds.
pub const MIN_TIME_LIMIT_MS: u64 = 100;
pub const MAX_TIME_LIMIT_MS: u64 = 30_000;
pub const DEFAULT_TIME_LIMIT_MS: u64 = 5000;
/// Default memory limit: 256 MiB expressed in KB.
pub const DEFAULT_MEMORY_LIMIT_KB: u64 = 262_144;
/// Test case count cap per submission.
pub const MAX_TEST_CASES: usize = 100;

/// Submission lifecycle status.
///
/// Transitions form the DAG
/// `pending → queued → processing → {completed, failed, timeout}`; a
/// worker may also take `pending → processing` directly when the queued
/// mark was lost.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    Display,
    DeriveActiveEnum,
    EnumIter,
    ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "submission_status")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SubmissionStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "queued")]
    Queued,
    #[sea_orm(string_value = "processing")]
    Processing,
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "failed")]
    Failed,
    #[sea_orm(string_value = "timeout")]
    Timeout,
}

impl SubmissionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Timeout)
    }

    /// Whether the status may move to `next`.
    pub fn can_transition_to(&self, next: SubmissionStatus) -> bool {
        use SubmissionStatus::*;
        matches!(
            (self, next),
            (Pending, Queued)
                | (Pending, Processing)
                | (Queued, Processing)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Processing, Timeout)
        )
    }
}

/// A submission record as stored in the relational store.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Submission {
    pub id: Uuid,
    pub user_id: String,
    pub problem_id: String,
    pub language: String,
    pub blob_key: String,
    pub code_size_bytes: i64,
    pub status: SubmissionStatus,
    /// Final verdict code (AC, WA, ...), set at terminal states.
    pub verdict: Option<String>,
    /// Score percentage in [0, 100].
    pub score: Option<f64>,
    /// Sum of test weights.
    pub max_score: Option<f64>,
    pub passed_test_cases: i32,
    pub total_test_cases: i32,
    pub execution_time_ms: Option<i64>,
    pub peak_memory_kb: Option<i64>,
    pub error_message: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub queued_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub metadata: Option<Value>,
}

/// Insert payload for a new submission row.
#[derive(Debug, Clone)]
pub struct NewSubmission {
    pub user_id: String,
    pub problem_id: String,
    pub language: String,
    pub blob_key: String,
    pub code_size_bytes: i64,
    pub metadata: Option<Value>,
}

/// Terminal outcome persisted by the worker.
#[derive(Debug, Clone)]
pub struct SubmissionOutcome {
    pub status: SubmissionStatus,
    pub verdict: String,
    pub score: f64,
    pub max_score: f64,
    pub passed_test_cases: i32,
    pub total_test_cases: i32,
    pub execution_time_ms: i64,
    pub peak_memory_kb: i64,
    /// Bounded error/diagnostic text (compiler stderr, runtime error).
    pub error_message: Option<String>,
}

/// Raw submit request body. Required fields arrive as untyped JSON so
/// validation can distinguish "missing" from "wrong type" per field.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    #[schema(value_type = String)]
    pub code: Option<Value>,
    #[schema(value_type = String)]
    pub language: Option<Value>,
    #[schema(value_type = String)]
    pub problem_id: Option<Value>,
    #[schema(value_type = String)]
    pub user_id: Option<Value>,
    #[schema(value_type = Object)]
    pub metadata: Option<Value>,
}

/// A submit request after validation.
#[derive(Debug, Clone)]
pub struct ValidSubmission {
    pub code: String,
    pub language: sandbox::Language,
    pub problem_id: String,
    pub user_id: String,
    pub time_limit_ms: u64,
    pub memory_limit_kb: u64,
    pub priority: JobPriority,
    pub test_cases: Vec<TestCase>,
    pub judge_config: Option<JudgeConfig>,
    /// The original metadata document, persisted verbatim.
    pub metadata: Option<Value>,
}

/// Result of the intake pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Stored and enqueued.
    Queued {
        submission_id: Uuid,
        timestamp: DateTime<Utc>,
    },
    /// Stored but not yet enqueued (queue push failed); a sweeper will
    /// re-enqueue pending records.
    Deferred {
        submission_id: Uuid,
        timestamp: DateTime<Utc>,
    },
}

/// Public read model for `GET /api/submissions/{id}`.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionView {
    pub submission_id: Uuid,
    pub status: SubmissionStatus,
    pub verdict: Option<String>,
    pub score: Option<f64>,
    pub passed_test_cases: i32,
    pub total_test_cases: i32,
    pub execution_time_ms: Option<i64>,
    pub peak_memory_kb: Option<i64>,
    pub error_message: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<Submission> for SubmissionView {
    fn from(submission: Submission) -> Self {
        Self {
            submission_id: submission.id,
            status: submission.status,
            verdict: submission.verdict,
            score: submission.score,
            passed_test_cases: submission.passed_test_cases,
            total_test_cases: submission.total_test_cases,
            execution_time_ms: submission.execution_time_ms,
            peak_memory_kb: submission.peak_memory_kb,
            error_message: submission.error_message,
            submitted_at: submission.submitted_at,
            completed_at: submission.completed_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_dag() {
        use SubmissionStatus::*;

        assert!(Pending.can_transition_to(Queued));
        assert!(Pending.can_transition_to(Processing));
        assert!(Queued.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Failed));
        assert!(Processing.can_transition_to(Timeout));

        // No going back
        assert!(!Queued.can_transition_to(Pending));
        assert!(!Completed.can_transition_to(Processing));
        assert!(!Failed.can_transition_to(Queued));
        // No skipping straight to terminal
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Queued.can_transition_to(Failed));
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(SubmissionStatus::Completed.is_terminal());
        assert!(SubmissionStatus::Failed.is_terminal());
        assert!(SubmissionStatus::Timeout.is_terminal());
        assert!(!SubmissionStatus::Pending.is_terminal());
        assert!(!SubmissionStatus::Queued.is_terminal());
        assert!(!SubmissionStatus::Processing.is_terminal());
    }

    #[test]
    fn test_status_serde_lowercase() {
        let json = serde_json::to_string(&SubmissionStatus::Processing).unwrap();
        assert_eq!(json, "\"processing\"");
    }

    #[test]
    fn test_submit_request_accepts_partial_bodies() {
        let request: SubmitRequest = serde_json::from_str(r#"{"code": "x"}"#).unwrap();
        assert!(request.code.is_some());
        assert!(request.language.is_none());
    }

    #[test]
    fn test_submit_request_keeps_wrong_types_for_validation() {
        let request: SubmitRequest = serde_json::from_str(r#"{"code": 42}"#).unwrap();
        assert!(request.code.is_some());
        assert!(!request.code.unwrap().is_string());
    }
}
