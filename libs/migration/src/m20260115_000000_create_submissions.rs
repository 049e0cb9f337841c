use sea_orm_migration::sea_query::extension::postgres::Type;
use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_type(
                Type::create()
                    .as_enum(SubmissionStatus::Enum)
                    .values([
                        SubmissionStatus::Pending,
                        SubmissionStatus::Queued,
                        SubmissionStatus::Processing,
                        SubmissionStatus::Completed,
                        SubmissionStatus::Failed,
                        SubmissionStatus::Timeout,
                    ])
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Submissions::Table)
                    .if_not_exists()
                    .col(pk_uuid(Submissions::Id))
                    .col(string(Submissions::UserId))
                    .col(string(Submissions::ProblemId))
                    .col(string(Submissions::Language))
                    .col(string(Submissions::BlobKey))
                    .col(big_integer(Submissions::CodeSizeBytes))
                    .col(
                        ColumnDef::new(Submissions::Status)
                            .enumeration(
                                SubmissionStatus::Enum,
                                [
                                    SubmissionStatus::Pending,
                                    SubmissionStatus::Queued,
                                    SubmissionStatus::Processing,
                                    SubmissionStatus::Completed,
                                    SubmissionStatus::Failed,
                                    SubmissionStatus::Timeout,
                                ],
                            )
                            .not_null()
                            .default("pending"),
                    )
                    .col(string_null(Submissions::Verdict))
                    .col(double_null(Submissions::Score))
                    .col(double_null(Submissions::MaxScore))
                    .col(integer(Submissions::PassedTestCases).default(0))
                    .col(integer(Submissions::TotalTestCases).default(0))
                    .col(big_integer_null(Submissions::ExecutionTimeMs))
                    .col(big_integer_null(Submissions::PeakMemoryKb))
                    .col(text_null(Submissions::ErrorMessage))
                    .col(
                        timestamp_with_time_zone(Submissions::SubmittedAt)
                            .default(Expr::current_timestamp()),
                    )
                    .col(timestamp_with_time_zone_null(Submissions::QueuedAt))
                    .col(timestamp_with_time_zone_null(Submissions::StartedAt))
                    .col(timestamp_with_time_zone_null(Submissions::CompletedAt))
                    .col(json_binary_null(Submissions::Metadata))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_submissions_user_id")
                    .table(Submissions::Table)
                    .col(Submissions::UserId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_submissions_problem_id")
                    .table(Submissions::Table)
                    .col(Submissions::ProblemId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_submissions_status")
                    .table(Submissions::Table)
                    .col(Submissions::Status)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_submissions_submitted_at")
                    .table(Submissions::Table)
                    .col((Submissions::SubmittedAt, IndexOrder::Desc))
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Submissions::Table).to_owned())
            .await?;

        manager
            .drop_type(Type::drop().name(SubmissionStatus::Enum).to_owned())
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
enum Submissions {
    Table,
    Id,
    UserId,
    ProblemId,
    Language,
    BlobKey,
    CodeSizeBytes,
    Status,
    Verdict,
    Score,
    MaxScore,
    PassedTestCases,
    TotalTestCases,
    ExecutionTimeMs,
    PeakMemoryKb,
    ErrorMessage,
    SubmittedAt,
    QueuedAt,
    StartedAt,
    CompletedAt,
    Metadata,
}

#[derive(DeriveIden)]
enum SubmissionStatus {
    #[sea_orm(iden = "submission_status")]
    Enum,
    #[sea_orm(iden = "pending")]
    Pending,
    #[sea_orm(iden = "queued")]
    Queued,
    #[sea_orm(iden = "processing")]
    Processing,
    #[sea_orm(iden = "completed")]
    Completed,
    #[sea_orm(iden = "failed")]
    Failed,
    #[sea_orm(iden = "timeout")]
    Timeout,
}
