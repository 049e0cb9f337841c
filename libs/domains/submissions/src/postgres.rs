use crate::entity;
use crate::error::{SubmissionError, SubmissionResult};
use crate::models::{NewSubmission, Submission, SubmissionOutcome, SubmissionStatus};
use crate::repository::SubmissionRepository;
use async_trait::async_trait;
use chrono::Utc;
use sea_orm::ActiveValue::Set;
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use uuid::Uuid;

/// SeaORM-backed submission repository.
///
/// Status transitions are guarded conditional updates: the `WHERE` clause
/// re-checks the current status so a duplicate delivery can never clobber
/// a row another attempt already advanced.
pub struct PgSubmissionRepository {
    db: DatabaseConnection,
}

impl PgSubmissionRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub fn db(&self) -> &DatabaseConnection {
        &self.db
    }
}

#[async_trait]
impl SubmissionRepository for PgSubmissionRepository {
    async fn insert(&self, submission: NewSubmission) -> SubmissionResult<Submission> {
        let now = Utc::now();
        let model = entity::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(submission.user_id),
            problem_id: Set(submission.problem_id),
            language: Set(submission.language),
            blob_key: Set(submission.blob_key),
            code_size_bytes: Set(submission.code_size_bytes),
            status: Set(SubmissionStatus::Pending),
            verdict: Set(None),
            score: Set(None),
            max_score: Set(None),
            passed_test_cases: Set(0),
            total_test_cases: Set(0),
            execution_time_ms: Set(None),
            peak_memory_kb: Set(None),
            error_message: Set(None),
            submitted_at: Set(now.into()),
            queued_at: Set(None),
            started_at: Set(None),
            completed_at: Set(None),
            metadata: Set(submission.metadata),
        };

        let inserted = model.insert(&self.db).await?;

        tracing::info!(submission_id = %inserted.id, "Inserted submission");
        Ok(inserted.into())
    }

    async fn find_by_id(&self, id: Uuid) -> SubmissionResult<Option<Submission>> {
        let model = entity::Entity::find_by_id(id).one(&self.db).await?;
        Ok(model.map(Into::into))
    }

    async fn mark_queued(&self, id: Uuid) -> SubmissionResult<()> {
        let update = entity::ActiveModel {
            status: Set(SubmissionStatus::Queued),
            queued_at: Set(Some(Utc::now().into())),
            ..Default::default()
        };

        let result = entity::Entity::update_many()
            .set(update)
            .filter(entity::Column::Id.eq(id))
            .filter(entity::Column::Status.eq(SubmissionStatus::Pending))
            .exec(&self.db)
            .await?;

        if result.rows_affected == 0 {
            // Worker may have grabbed the pending row first; the queued
            // mark is advisory
            tracing::debug!(submission_id = %id, "mark_queued skipped, row already advanced");
        }
        Ok(())
    }

    async fn mark_processing(&self, id: Uuid) -> SubmissionResult<bool> {
        let update = entity::ActiveModel {
            status: Set(SubmissionStatus::Processing),
            started_at: Set(Some(Utc::now().into())),
            ..Default::default()
        };

        let result = entity::Entity::update_many()
            .set(update)
            .filter(entity::Column::Id.eq(id))
            .filter(entity::Column::Status.is_in([
                SubmissionStatus::Pending,
                SubmissionStatus::Queued,
            ]))
            .exec(&self.db)
            .await?;

        if result.rows_affected > 0 {
            return Ok(true);
        }

        // Re-delivered after a crash mid-attempt: the row may already sit
        // in `processing`. Own it again rather than skip it forever.
        match self.find_by_id(id).await? {
            Some(submission) if submission.status == SubmissionStatus::Processing => Ok(true),
            _ => Ok(false),
        }
    }

    async fn record_outcome(&self, id: Uuid, outcome: SubmissionOutcome) -> SubmissionResult<()> {
        if !outcome.status.is_terminal() {
            return Err(SubmissionError::Internal(format!(
                "record_outcome called with non-terminal status {}",
                outcome.status
            )));
        }

        let update = entity::ActiveModel {
            status: Set(outcome.status),
            verdict: Set(Some(outcome.verdict.clone())),
            score: Set(Some(outcome.score)),
            max_score: Set(Some(outcome.max_score)),
            passed_test_cases: Set(outcome.passed_test_cases),
            total_test_cases: Set(outcome.total_test_cases),
            execution_time_ms: Set(Some(outcome.execution_time_ms)),
            peak_memory_kb: Set(Some(outcome.peak_memory_kb)),
            error_message: Set(outcome.error_message.clone()),
            completed_at: Set(Some(Utc::now().into())),
            ..Default::default()
        };

        let result = entity::Entity::update_many()
            .set(update)
            .filter(entity::Column::Id.eq(id))
            .filter(entity::Column::Status.eq(SubmissionStatus::Processing))
            .exec(&self.db)
            .await?;

        if result.rows_affected == 0 {
            tracing::warn!(
                submission_id = %id,
                verdict = %outcome.verdict,
                "record_outcome found no processing row; duplicate delivery?"
            );
        } else {
            tracing::info!(
                submission_id = %id,
                status = %outcome.status,
                verdict = %outcome.verdict,
                "Recorded submission outcome"
            );
        }
        Ok(())
    }

    async fn record_failure(&self, id: Uuid, error_message: &str) -> SubmissionResult<()> {
        let update = entity::ActiveModel {
            status: Set(SubmissionStatus::Failed),
            error_message: Set(Some(error_message.to_string())),
            completed_at: Set(Some(Utc::now().into())),
            ..Default::default()
        };

        let result = entity::Entity::update_many()
            .set(update)
            .filter(entity::Column::Id.eq(id))
            .filter(entity::Column::Status.is_in([
                SubmissionStatus::Pending,
                SubmissionStatus::Queued,
                SubmissionStatus::Processing,
            ]))
            .exec(&self.db)
            .await?;

        if result.rows_affected > 0 {
            tracing::warn!(submission_id = %id, error = %error_message, "Marked submission failed");
        }
        Ok(())
    }
}
