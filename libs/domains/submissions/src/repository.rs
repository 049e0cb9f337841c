use crate::error::SubmissionResult;
use crate::models::{NewSubmission, Submission, SubmissionOutcome};
use async_trait::async_trait;
use uuid::Uuid;

/// Persistence seam for submission records.
///
/// Transition methods enforce the status DAG and keep timestamps
/// monotonic; callers never write statuses directly. Each transition is a
/// guarded update so the at-least-once worker can observe "already
/// advanced" instead of clobbering a terminal row.
#[async_trait]
pub trait SubmissionRepository: Send + Sync {
    /// Insert a new `pending` record and return its id.
    async fn insert(&self, submission: NewSubmission) -> SubmissionResult<Submission>;

    async fn find_by_id(&self, id: Uuid) -> SubmissionResult<Option<Submission>>;

    /// `pending → queued`. Non-fatal when the row already advanced.
    async fn mark_queued(&self, id: Uuid) -> SubmissionResult<()>;

    /// `pending|queued → processing`, setting `started_at`.
    ///
    /// Returns `false` when the submission is already terminal (duplicate
    /// delivery); the caller acks and skips.
    async fn mark_processing(&self, id: Uuid) -> SubmissionResult<bool>;

    /// `processing → {completed, failed, timeout}` with the judged
    /// outcome, setting `completed_at`.
    async fn record_outcome(&self, id: Uuid, outcome: SubmissionOutcome) -> SubmissionResult<()>;

    /// Persist a terminal failure outside the judge path (exhausted
    /// retries, internal errors).
    async fn record_failure(&self, id: Uuid, error_message: &str) -> SubmissionResult<()>;
}
