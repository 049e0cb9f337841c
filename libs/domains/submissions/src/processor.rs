//! Claims execution jobs, runs them in the sandbox, judges the output
//! and persists the verdict.

use crate::models::{SubmissionOutcome, SubmissionStatus};
use crate::repository::SubmissionRepository;
use crate::stream_models::ExecutionJob;
use async_trait::async_trait;
use blobstore::{BlobError, BlobStore};
use judge::{
    aggregate, check_case, judge_case, judge_case_special, CaseJudgement, ComparisonMode,
    ExecStatus, JudgeConfig, JudgeSummary, Verdict,
};
use observability::SubmissionMetrics;
use sandbox::{
    ExecutionHarness, ExecutionOutcome, ExecutionReport, ExecutionRequest, Language,
    ResourceLimits, RunStatus, SandboxError,
};
use std::sync::Arc;
use stream_worker::{JobProcessor, StreamError};
use tracing::{info, warn};

/// Job processor for execution jobs.
///
/// Error routing:
/// - unsupported language / missing blob: permanent, straight to DLQ
/// - runtime failures: transient, retried with backoff; the submission is
///   marked failed once the attempt ceiling is reached
/// - judge/protocol violations: terminal `IE` verdict, no retry
pub struct ExecutionProcessor<R: SubmissionRepository> {
    repository: Arc<R>,
    blobs: Arc<dyn BlobStore>,
    harness: Arc<ExecutionHarness>,
    max_attempts: u32,
}

impl<R: SubmissionRepository> ExecutionProcessor<R> {
    pub fn new(
        repository: Arc<R>,
        blobs: Arc<dyn BlobStore>,
        harness: Arc<ExecutionHarness>,
        max_attempts: u32,
    ) -> Self {
        Self {
            repository,
            blobs,
            harness,
            max_attempts,
        }
    }

    async fn handle(&self, job: &ExecutionJob) -> Result<(), StreamError> {
        let submission_id = job.submission_id;

        // At-least-once tolerance: a re-delivered job whose submission
        // already finished is acked and skipped
        match self.repository.find_by_id(submission_id).await {
            Ok(Some(submission)) if submission.status.is_terminal() => {
                info!(
                    submission_id = %submission_id,
                    status = %submission.status,
                    "Submission already terminal, skipping duplicate delivery"
                );
                return Ok(());
            }
            Ok(Some(_)) => {}
            Ok(None) => {
                warn!(submission_id = %submission_id, "Submission row not found, skipping");
                return Ok(());
            }
            Err(e) => return Err(StreamError::Processing(format!("db lookup failed: {}", e))),
        }

        let owned = self
            .repository
            .mark_processing(submission_id)
            .await
            .map_err(|e| StreamError::Processing(format!("db transition failed: {}", e)))?;
        if !owned {
            return Ok(());
        }

        let language = match Language::parse(&job.language) {
            Ok(language) => language,
            Err(e) => {
                // Intake validates languages, so this is a corrupted
                // envelope; it can never succeed on retry
                let message = format!("unsupported language: {}", e);
                let _ = self.repository.record_failure(submission_id, &message).await;
                return Err(StreamError::Processing(message));
            }
        };

        let code = match self.blobs.get(&job.blob_key).await {
            Ok(code) => code,
            Err(BlobError::NotFound(key)) => {
                // The code is gone; no retry can recover it
                let message = format!("code blob not found: {}", key);
                let _ = self.repository.record_failure(submission_id, &message).await;
                return Err(StreamError::Processing(message));
            }
            Err(e) => {
                return Err(self
                    .transient_failure(job, format!("blob fetch failed: {}", e))
                    .await)
            }
        };

        let request = ExecutionRequest {
            submission_id,
            language,
            code,
            limits: ResourceLimits::new(job.time_limit_ms, job.memory_limit_kb),
            test_cases: job.test_cases.clone(),
        };

        let outcome = match self.harness.execute(request).await {
            Ok(outcome) => outcome,
            Err(SandboxError::Protocol(detail)) => {
                // Judge-level violation: terminal internal error
                self.persist_internal_error(job, &detail).await;
                return Ok(());
            }
            Err(e) => {
                return Err(self
                    .transient_failure(job, format!("sandbox failure: {}", e))
                    .await)
            }
        };

        let judge_config = job.judge_config.clone().unwrap_or_default();

        let (status, outcome) = match outcome {
            ExecutionOutcome::CompileError { stderr } => {
                let outcome = SubmissionOutcome {
                    status: SubmissionStatus::Failed,
                    verdict: Verdict::CompilationError.code().to_string(),
                    score: 0.0,
                    max_score: 0.0,
                    passed_test_cases: 0,
                    total_test_cases: job.test_cases.len() as i32,
                    execution_time_ms: 0,
                    peak_memory_kb: 0,
                    error_message: Some(stderr),
                };
                (SubmissionStatus::Failed, outcome)
            }
            ExecutionOutcome::Finished(report) => {
                self.judge_report(job, &judge_config, report).await
            }
        };

        self.repository
            .record_outcome(submission_id, outcome.clone())
            .await
            .map_err(|e| StreamError::Processing(format!("persist failed: {}", e)))?;

        SubmissionMetrics::record_verdict(&job.language, &outcome.verdict);
        SubmissionMetrics::record_score(outcome.score);
        SubmissionMetrics::record_execution(
            &job.language,
            outcome.execution_time_ms as u64,
            outcome.peak_memory_kb as u64,
        );

        info!(
            submission_id = %submission_id,
            status = %status,
            verdict = %outcome.verdict,
            score = outcome.score,
            passed = outcome.passed_test_cases,
            total = outcome.total_test_cases,
            "Submission judged"
        );

        Ok(())
    }

    /// Judge a finished execution report into a terminal outcome.
    async fn judge_report(
        &self,
        job: &ExecutionJob,
        config: &JudgeConfig,
        report: ExecutionReport,
    ) -> (SubmissionStatus, SubmissionOutcome) {
        let summary = match &report.test_results {
            Some(case_runs) => {
                let judgements = if config.comparison_mode == ComparisonMode::Special {
                    match self.judge_cases_special(case_runs, config).await {
                        Ok(judgements) => judgements,
                        Err(detail) => {
                            // A broken checker is a judge error: terminal IE
                            let outcome = SubmissionOutcome {
                                status: SubmissionStatus::Failed,
                                verdict: Verdict::InternalError.code().to_string(),
                                score: 0.0,
                                max_score: 0.0,
                                passed_test_cases: 0,
                                total_test_cases: case_runs.len() as i32,
                                execution_time_ms: report.execution_time_ms as i64,
                                peak_memory_kb: report.memory_used_kb as i64,
                                error_message: Some(detail),
                            };
                            return (SubmissionStatus::Failed, outcome);
                        }
                    }
                } else {
                    case_runs
                        .iter()
                        .map(|run| {
                            judge_case(
                                &run.test_id,
                                exec_status(run.status),
                                &run.expected,
                                &run.actual,
                                config,
                            )
                        })
                        .collect()
                };
                aggregate(&judgements, config)
            }
            None => summary_without_tests(&report),
        };

        let status = status_for_verdict(summary.verdict);

        let error_message = match summary.verdict {
            Verdict::Accepted => None,
            _ if report.error.is_empty() => None,
            _ => Some(report.error.clone()),
        };

        let outcome = SubmissionOutcome {
            status,
            verdict: summary.verdict.code().to_string(),
            score: summary.score_percentage,
            max_score: summary.max_score,
            passed_test_cases: summary.passed_cases as i32,
            total_test_cases: summary.total_cases as i32,
            execution_time_ms: report.execution_time_ms as i64,
            peak_memory_kb: report.memory_used_kb as i64,
            error_message,
        };

        (status, outcome)
    }

    /// Judge every case through the external checker.
    async fn judge_cases_special(
        &self,
        case_runs: &[sandbox::CaseRun],
        config: &JudgeConfig,
    ) -> Result<Vec<CaseJudgement>, String> {
        let checker = config
            .special_judge_path
            .as_deref()
            .ok_or_else(|| "special mode without a checker path".to_string())?;

        let mut judgements = Vec::with_capacity(case_runs.len());
        for run in case_runs {
            let status = exec_status(run.status);
            let judgement = if status == ExecStatus::Success {
                let result = check_case(checker, &run.test_id, &run.input, &run.expected, &run.actual)
                    .await
                    .map_err(|e| format!("checker failed on {}: {}", run.test_id, e))?;
                judge_case_special(&run.test_id, status, result.passed, result.score, config)
            } else {
                judge_case_special(&run.test_id, status, false, 0.0, config)
            };
            judgements.push(judgement);
        }

        Ok(judgements)
    }

    /// Mark the submission failed when this was the final attempt, then
    /// surface the transient error for the retry policy.
    async fn transient_failure(&self, job: &ExecutionJob, message: String) -> StreamError {
        if job.attempt >= self.max_attempts {
            if let Err(e) = self
                .repository
                .record_failure(job.submission_id, &message)
                .await
            {
                warn!(
                    submission_id = %job.submission_id,
                    error = %e,
                    "Failed to persist terminal failure"
                );
            }
            SubmissionMetrics::record_verdict(&job.language, Verdict::InternalError.code());
        }
        StreamError::Processing(message)
    }

    /// Persist a terminal internal-error verdict.
    async fn persist_internal_error(&self, job: &ExecutionJob, detail: &str) {
        let outcome = SubmissionOutcome {
            status: SubmissionStatus::Failed,
            verdict: Verdict::InternalError.code().to_string(),
            score: 0.0,
            max_score: 0.0,
            passed_test_cases: 0,
            total_test_cases: job.test_cases.len() as i32,
            execution_time_ms: 0,
            peak_memory_kb: 0,
            error_message: Some(detail.to_string()),
        };

        if let Err(e) = self
            .repository
            .record_outcome(job.submission_id, outcome)
            .await
        {
            warn!(
                submission_id = %job.submission_id,
                error = %e,
                "Failed to persist internal-error outcome"
            );
        }
        SubmissionMetrics::record_verdict(&job.language, Verdict::InternalError.code());
    }
}

/// Map a harness run status onto the judge's execution status.
fn exec_status(status: RunStatus) -> ExecStatus {
    match status {
        RunStatus::Completed => ExecStatus::Success,
        RunStatus::TimedOut => ExecStatus::TimedOut,
        RunStatus::MemoryExceeded => ExecStatus::MemoryExceeded,
        RunStatus::Crashed => ExecStatus::RuntimeError,
        RunStatus::Skipped => ExecStatus::Skipped,
    }
}

/// Submission status implied by the final verdict.
fn status_for_verdict(verdict: Verdict) -> SubmissionStatus {
    match verdict {
        Verdict::TimeLimitExceeded => SubmissionStatus::Timeout,
        Verdict::Accepted | Verdict::WrongAnswer | Verdict::PresentationError => {
            SubmissionStatus::Completed
        }
        Verdict::MemoryLimitExceeded
        | Verdict::RuntimeError
        | Verdict::CompilationError
        | Verdict::InternalError
        | Verdict::Skipped => SubmissionStatus::Failed,
    }
}

/// Verdict and score for a run without test cases.
fn summary_without_tests(report: &ExecutionReport) -> JudgeSummary {
    let verdict = match report.status {
        RunStatus::Completed => Verdict::Accepted,
        RunStatus::TimedOut => Verdict::TimeLimitExceeded,
        RunStatus::MemoryExceeded => Verdict::MemoryLimitExceeded,
        RunStatus::Crashed | RunStatus::Skipped => Verdict::RuntimeError,
    };

    let accepted = verdict.is_accepted();
    JudgeSummary {
        verdict,
        total_score: if accepted { 1.0 } else { 0.0 },
        max_score: 1.0,
        score_percentage: if accepted { 100.0 } else { 0.0 },
        passed_cases: accepted as u32,
        total_cases: 0,
    }
}

#[async_trait]
impl<R: SubmissionRepository + 'static> JobProcessor<ExecutionJob> for ExecutionProcessor<R> {
    async fn process(&self, job: &ExecutionJob) -> Result<(), StreamError> {
        self.handle(job).await
    }

    fn name(&self) -> &'static str {
        "ExecutionProcessor"
    }

    async fn health_check(&self) -> Result<bool, StreamError> {
        match self.harness.runtime().ping().await {
            Ok(()) => Ok(true),
            Err(e) => Err(StreamError::Processing(format!("runtime ping failed: {}", e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{SubmissionError, SubmissionResult};
    use crate::models::{NewSubmission, Submission};
    use async_trait::async_trait;
    use chrono::Utc;
    use sandbox::{ContainerRuntime, HarnessConfig, RunOutput, RunSpec};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use stream_worker::JobPriority;
    use uuid::Uuid;

    struct InMemoryRepository {
        rows: Mutex<HashMap<Uuid, Submission>>,
    }

    impl InMemoryRepository {
        fn with_submission(id: Uuid, status: SubmissionStatus) -> Self {
            let submission = Submission {
                id,
                user_id: "u1".into(),
                problem_id: "sum".into(),
                language: "python".into(),
                blob_key: "submissions/u1/sum/1-aa.py".into(),
                code_size_bytes: 10,
                status,
                verdict: None,
                score: None,
                max_score: None,
                passed_test_cases: 0,
                total_test_cases: 0,
                execution_time_ms: None,
                peak_memory_kb: None,
                error_message: None,
                submitted_at: Utc::now(),
                queued_at: None,
                started_at: None,
                completed_at: None,
                metadata: None,
            };
            Self {
                rows: Mutex::new(HashMap::from([(id, submission)])),
            }
        }

        fn status_of(&self, id: Uuid) -> SubmissionStatus {
            self.rows.lock().unwrap().get(&id).unwrap().status
        }

        fn verdict_of(&self, id: Uuid) -> Option<String> {
            self.rows.lock().unwrap().get(&id).unwrap().verdict.clone()
        }
    }

    #[async_trait]
    impl SubmissionRepository for InMemoryRepository {
        async fn insert(&self, _new: NewSubmission) -> SubmissionResult<Submission> {
            Err(SubmissionError::Internal("not used".into()))
        }

        async fn find_by_id(&self, id: Uuid) -> SubmissionResult<Option<Submission>> {
            Ok(self.rows.lock().unwrap().get(&id).cloned())
        }

        async fn mark_queued(&self, _id: Uuid) -> SubmissionResult<()> {
            Ok(())
        }

        async fn mark_processing(&self, id: Uuid) -> SubmissionResult<bool> {
            let mut rows = self.rows.lock().unwrap();
            let Some(row) = rows.get_mut(&id) else {
                return Ok(false);
            };
            if row.status.is_terminal() {
                return Ok(false);
            }
            row.status = SubmissionStatus::Processing;
            row.started_at = Some(Utc::now());
            Ok(true)
        }

        async fn record_outcome(
            &self,
            id: Uuid,
            outcome: SubmissionOutcome,
        ) -> SubmissionResult<()> {
            let mut rows = self.rows.lock().unwrap();
            if let Some(row) = rows.get_mut(&id) {
                row.status = outcome.status;
                row.verdict = Some(outcome.verdict);
                row.score = Some(outcome.score);
                row.passed_test_cases = outcome.passed_test_cases;
                row.total_test_cases = outcome.total_test_cases;
                row.completed_at = Some(Utc::now());
            }
            Ok(())
        }

        async fn record_failure(&self, id: Uuid, message: &str) -> SubmissionResult<()> {
            let mut rows = self.rows.lock().unwrap();
            if let Some(row) = rows.get_mut(&id) {
                row.status = SubmissionStatus::Failed;
                row.error_message = Some(message.to_string());
            }
            Ok(())
        }
    }

    /// Runtime that replies with a fixed stdout for every run.
    struct EchoRuntime {
        stdout: String,
    }

    #[async_trait]
    impl ContainerRuntime for EchoRuntime {
        async fn ping(&self) -> Result<(), SandboxError> {
            Ok(())
        }

        async fn run(&self, _spec: RunSpec) -> Result<RunOutput, SandboxError> {
            Ok(RunOutput {
                exit_code: 0,
                stdout: self.stdout.clone().into_bytes(),
                stderr: Vec::new(),
                wall_time_ms: 15,
                peak_memory_kb: Some(4096),
                timed_out: false,
                oom_killed: false,
            })
        }
    }

    /// Runtime that always fails, for retry-path tests.
    struct BrokenRuntime;

    #[async_trait]
    impl ContainerRuntime for BrokenRuntime {
        async fn ping(&self) -> Result<(), SandboxError> {
            Err(SandboxError::Runtime("daemon down".into()))
        }

        async fn run(&self, _spec: RunSpec) -> Result<RunOutput, SandboxError> {
            Err(SandboxError::Runtime("daemon down".into()))
        }
    }

    fn job(submission_id: Uuid, attempt: u32) -> ExecutionJob {
        ExecutionJob {
            submission_id,
            user_id: "u1".into(),
            problem_id: "sum".into(),
            language: "python".into(),
            blob_key: "submissions/u1/sum/1-aa.py".into(),
            code_size_bytes: 10,
            time_limit_ms: 1000,
            memory_limit_kb: 65_536,
            priority: JobPriority::Normal,
            created_at: Utc::now(),
            attempt,
            test_cases: vec![sandbox::TestCase {
                id: "t1".into(),
                input: "2 3\n".into(),
                expected_output: "5\n".into(),
                stop_on_failure: false,
            }],
            judge_config: None,
        }
    }

    async fn processor_with(
        runtime: Arc<dyn ContainerRuntime>,
        repository: Arc<InMemoryRepository>,
        blob_dir: &tempfile::TempDir,
    ) -> ExecutionProcessor<InMemoryRepository> {
        let blobs = Arc::new(blobstore::FsBlobStore::new(blob_dir.path()));
        blobs
            .put("submissions/u1/sum/1-aa.py", b"print(sum(map(int, input().split())))")
            .await
            .unwrap();

        let harness = Arc::new(ExecutionHarness::new(
            runtime,
            HarnessConfig {
                workspace_base: blob_dir.path().join("ws"),
                ..Default::default()
            },
        ));

        ExecutionProcessor::new(repository, blobs, harness, 3)
    }

    #[tokio::test]
    async fn test_accepted_submission_completes() {
        let id = Uuid::new_v4();
        let repository = Arc::new(InMemoryRepository::with_submission(
            id,
            SubmissionStatus::Queued,
        ));
        let dir = tempfile::tempdir().unwrap();
        let processor = processor_with(
            Arc::new(EchoRuntime {
                stdout: "5\n".into(),
            }),
            repository.clone(),
            &dir,
        )
        .await;

        processor.process(&job(id, 1)).await.unwrap();

        assert_eq!(repository.status_of(id), SubmissionStatus::Completed);
        assert_eq!(repository.verdict_of(id).as_deref(), Some("AC"));
        let row = repository.rows.lock().unwrap().get(&id).cloned().unwrap();
        assert_eq!(row.score, Some(100.0));
        assert_eq!(row.passed_test_cases, 1);
        assert_eq!(row.total_test_cases, 1);
    }

    #[tokio::test]
    async fn test_wrong_answer_completes_with_wa() {
        let id = Uuid::new_v4();
        let repository = Arc::new(InMemoryRepository::with_submission(
            id,
            SubmissionStatus::Queued,
        ));
        let dir = tempfile::tempdir().unwrap();
        let processor = processor_with(
            Arc::new(EchoRuntime {
                stdout: "6\n".into(),
            }),
            repository.clone(),
            &dir,
        )
        .await;

        processor.process(&job(id, 1)).await.unwrap();

        assert_eq!(repository.status_of(id), SubmissionStatus::Completed);
        assert_eq!(repository.verdict_of(id).as_deref(), Some("WA"));
    }

    #[tokio::test]
    async fn test_terminal_submission_skipped() {
        let id = Uuid::new_v4();
        let repository = Arc::new(InMemoryRepository::with_submission(
            id,
            SubmissionStatus::Completed,
        ));
        let dir = tempfile::tempdir().unwrap();
        let processor = processor_with(
            Arc::new(EchoRuntime {
                stdout: "5\n".into(),
            }),
            repository.clone(),
            &dir,
        )
        .await;

        // Duplicate delivery must ack (Ok) without touching the row
        processor.process(&job(id, 2)).await.unwrap();
        assert_eq!(repository.status_of(id), SubmissionStatus::Completed);
    }

    #[tokio::test]
    async fn test_runtime_failure_is_transient() {
        let id = Uuid::new_v4();
        let repository = Arc::new(InMemoryRepository::with_submission(
            id,
            SubmissionStatus::Queued,
        ));
        let dir = tempfile::tempdir().unwrap();
        let processor =
            processor_with(Arc::new(BrokenRuntime), repository.clone(), &dir).await;

        let err = processor.process(&job(id, 1)).await.unwrap_err();
        assert!(err.to_string().contains("sandbox failure"));
        // Attempt 1 of 3: the submission is not failed yet
        assert_eq!(repository.status_of(id), SubmissionStatus::Processing);
    }

    #[tokio::test]
    async fn test_final_attempt_marks_failed() {
        let id = Uuid::new_v4();
        let repository = Arc::new(InMemoryRepository::with_submission(
            id,
            SubmissionStatus::Queued,
        ));
        let dir = tempfile::tempdir().unwrap();
        let processor =
            processor_with(Arc::new(BrokenRuntime), repository.clone(), &dir).await;

        // Third (final) attempt still errors so the worker dead-letters,
        // but the submission row is now terminal
        let err = processor.process(&job(id, 3)).await.unwrap_err();
        assert!(err.to_string().contains("sandbox failure"));
        assert_eq!(repository.status_of(id), SubmissionStatus::Failed);
    }

    #[tokio::test]
    async fn test_missing_blob_is_permanent() {
        let id = Uuid::new_v4();
        let repository = Arc::new(InMemoryRepository::with_submission(
            id,
            SubmissionStatus::Queued,
        ));
        let dir = tempfile::tempdir().unwrap();

        // Build the processor without seeding the blob
        let blobs = Arc::new(blobstore::FsBlobStore::new(dir.path()));
        let harness = Arc::new(ExecutionHarness::new(
            Arc::new(EchoRuntime {
                stdout: "5\n".into(),
            }),
            HarnessConfig {
                workspace_base: dir.path().join("ws"),
                ..Default::default()
            },
        ));
        let processor = ExecutionProcessor::new(repository.clone(), blobs, harness, 3);

        let err = processor.process(&job(id, 1)).await.unwrap_err();
        // "not found" categorizes as permanent: no retry, straight to DLQ
        assert_eq!(
            err.category(),
            stream_worker::ErrorCategory::Permanent
        );
        assert_eq!(repository.status_of(id), SubmissionStatus::Failed);
    }

    #[test]
    fn test_status_for_verdict_mapping() {
        assert_eq!(
            status_for_verdict(Verdict::Accepted),
            SubmissionStatus::Completed
        );
        assert_eq!(
            status_for_verdict(Verdict::WrongAnswer),
            SubmissionStatus::Completed
        );
        assert_eq!(
            status_for_verdict(Verdict::TimeLimitExceeded),
            SubmissionStatus::Timeout
        );
        assert_eq!(
            status_for_verdict(Verdict::MemoryLimitExceeded),
            SubmissionStatus::Failed
        );
        assert_eq!(
            status_for_verdict(Verdict::CompilationError),
            SubmissionStatus::Failed
        );
    }
}
