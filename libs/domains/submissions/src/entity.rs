use crate::models::SubmissionStatus;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// SeaORM entity for the `submissions` table.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "submissions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub user_id: String,
    pub problem_id: String,
    pub language: String,
    pub blob_key: String,
    pub code_size_bytes: i64,
    pub status: SubmissionStatus,
    pub verdict: Option<String>,
    pub score: Option<f64>,
    pub max_score: Option<f64>,
    pub passed_test_cases: i32,
    pub total_test_cases: i32,
    pub execution_time_ms: Option<i64>,
    pub peak_memory_kb: Option<i64>,
    #[sea_orm(column_type = "Text", nullable)]
    pub error_message: Option<String>,
    pub submitted_at: DateTimeWithTimeZone,
    pub queued_at: Option<DateTimeWithTimeZone>,
    pub started_at: Option<DateTimeWithTimeZone>,
    pub completed_at: Option<DateTimeWithTimeZone>,
    pub metadata: Option<Json>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl From<Model> for crate::models::Submission {
    fn from(model: Model) -> Self {
        Self {
            id: model.id,
            user_id: model.user_id,
            problem_id: model.problem_id,
            language: model.language,
            blob_key: model.blob_key,
            code_size_bytes: model.code_size_bytes,
            status: model.status,
            verdict: model.verdict,
            score: model.score,
            max_score: model.max_score,
            passed_test_cases: model.passed_test_cases,
            total_test_cases: model.total_test_cases,
            execution_time_ms: model.execution_time_ms,
            peak_memory_kb: model.peak_memory_kb,
            error_message: model.error_message,
            submitted_at: model.submitted_at.into(),
            queued_at: model.queued_at.map(Into::into),
            started_at: model.started_at.map(Into::into),
            completed_at: model.completed_at.map(Into::into),
            metadata: model.metadata,
        }
    }
}
