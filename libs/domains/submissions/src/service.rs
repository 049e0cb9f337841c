//! The intake pipeline: validate, rate-limit, store, enqueue.

use crate::error::{SubmissionError, SubmissionResult};
use crate::models::{
    NewSubmission, SubmissionView, SubmitOutcome, SubmitRequest, ValidSubmission,
    DEFAULT_MEMORY_LIMIT_KB, DEFAULT_TIME_LIMIT_MS, MAX_CODE_SIZE_BYTES, MAX_ID_LENGTH,
    MAX_TEST_CASES, MAX_TIME_LIMIT_MS, MIN_TIME_LIMIT_MS,
};
use crate::repository::SubmissionRepository;
use crate::stream_models::ExecutionJob;
use async_trait::async_trait;
use blobstore::{submission_key, BlobStore};
use chrono::Utc;
use observability::SubmissionMetrics;
use ratelimit::{RateLimitOutcome, RateLimiter};
use sandbox::{Language, TestCase};
use serde_json::Value;
use std::sync::Arc;
use stream_worker::backpressure::LoadShedder;
use stream_worker::{JobPriority, StreamError, StreamProducer};
use tracing::{info, warn};
use uuid::Uuid;

/// Queue seam; the production implementation is [`StreamProducer`].
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn push(&self, job: &ExecutionJob) -> Result<String, StreamError>;
}

#[async_trait]
impl JobQueue for StreamProducer {
    async fn push(&self, job: &ExecutionJob) -> Result<String, StreamError> {
        self.send(job).await
    }
}

/// Rate-limit seam; the production implementation is [`RateLimiter`].
#[async_trait]
pub trait RateCheck: Send + Sync {
    async fn check_submission(&self, user_id: &str, ip: &str) -> RateLimitOutcome;
}

#[async_trait]
impl RateCheck for RateLimiter {
    async fn check_submission(&self, user_id: &str, ip: &str) -> RateLimitOutcome {
        RateLimiter::check_submission(self, user_id, ip).await
    }
}

/// Validates and admits submissions, then persists and enqueues them.
pub struct IntakeService<R: SubmissionRepository> {
    repository: Arc<R>,
    blobs: Arc<dyn BlobStore>,
    queue: Arc<dyn JobQueue>,
    rate: Arc<dyn RateCheck>,
    shedder: Option<Arc<LoadShedder>>,
}

impl<R: SubmissionRepository> IntakeService<R> {
    pub fn new(
        repository: Arc<R>,
        blobs: Arc<dyn BlobStore>,
        queue: Arc<dyn JobQueue>,
        rate: Arc<dyn RateCheck>,
    ) -> Self {
        Self {
            repository,
            blobs,
            queue,
            rate,
            shedder: None,
        }
    }

    /// Attach the queue-depth load shedder.
    pub fn with_load_shedder(mut self, shedder: Arc<LoadShedder>) -> Self {
        self.shedder = Some(shedder);
        self
    }

    /// Admit one submission.
    ///
    /// Success means the code is durably stored and the record exists;
    /// execution is asynchronous. `Deferred` means the queue push failed
    /// and the record stays `pending` for an external sweeper.
    pub async fn submit(
        &self,
        request: SubmitRequest,
        client_ip: &str,
    ) -> SubmissionResult<SubmitOutcome> {
        let valid = validate(request).inspect_err(|e| {
            SubmissionMetrics::record_rejected(e.code());
        })?;

        if let Some(shedder) = &self.shedder {
            if shedder.should_shed(valid.priority) {
                SubmissionMetrics::record_rejected("SHED");
                return Err(SubmissionError::RateLimitExceeded {
                    retry_after_ms: 5000,
                });
            }
        }

        let outcome = self.rate.check_submission(&valid.user_id, client_ip).await;
        if outcome.failed_open {
            SubmissionMetrics::record_rate_limit_fail_open();
        }
        if !outcome.allowed {
            if let Some(class) = outcome.refused_by {
                SubmissionMetrics::record_rate_limited(class.as_str());
            }
            return Err(SubmissionError::RateLimitExceeded {
                retry_after_ms: outcome.retry_after_ms,
            });
        }

        let code_bytes = valid.code.as_bytes();
        let blob_key = submission_key(
            &valid.user_id,
            &valid.problem_id,
            valid.language.extension(),
        );

        self.blobs.put(&blob_key, code_bytes).await?;

        let inserted = match self
            .repository
            .insert(NewSubmission {
                user_id: valid.user_id.clone(),
                problem_id: valid.problem_id.clone(),
                language: valid.language.as_str().to_string(),
                blob_key: blob_key.clone(),
                code_size_bytes: code_bytes.len() as i64,
                metadata: valid.metadata.clone(),
            })
            .await
        {
            Ok(submission) => submission,
            Err(e) => {
                // Compensate: the blob is orphaned without its record
                if let Err(delete_err) = self.blobs.delete(&blob_key).await {
                    warn!(
                        blob_key = %blob_key,
                        error = %delete_err,
                        "Rollback blob delete failed"
                    );
                }
                return Err(e);
            }
        };

        let job = ExecutionJob {
            submission_id: inserted.id,
            user_id: valid.user_id.clone(),
            problem_id: valid.problem_id.clone(),
            language: valid.language.as_str().to_string(),
            blob_key,
            code_size_bytes: code_bytes.len() as u64,
            time_limit_ms: valid.time_limit_ms,
            memory_limit_kb: valid.memory_limit_kb,
            priority: valid.priority,
            created_at: Utc::now(),
            attempt: 1,
            test_cases: valid.test_cases.clone(),
            judge_config: valid.judge_config.clone(),
        };

        SubmissionMetrics::record_accepted(valid.language.as_str(), code_bytes.len());

        match self.queue.push(&job).await {
            Ok(entry_id) => {
                if let Err(e) = self.repository.mark_queued(inserted.id).await {
                    // The worker moves pending rows to processing directly
                    warn!(submission_id = %inserted.id, error = %e, "mark_queued failed");
                }
                info!(
                    submission_id = %inserted.id,
                    entry_id = %entry_id,
                    language = %valid.language.as_str(),
                    "Submission queued"
                );
                Ok(SubmitOutcome::Queued {
                    submission_id: inserted.id,
                    timestamp: inserted.submitted_at,
                })
            }
            Err(e) => {
                warn!(
                    submission_id = %inserted.id,
                    error = %e,
                    "Queue push failed; leaving submission pending for sweep"
                );
                Ok(SubmitOutcome::Deferred {
                    submission_id: inserted.id,
                    timestamp: inserted.submitted_at,
                })
            }
        }
    }

    /// Fetch one submission as its public view.
    pub async fn get_submission(&self, id: Uuid) -> SubmissionResult<SubmissionView> {
        let submission = self
            .repository
            .find_by_id(id)
            .await?
            .ok_or(SubmissionError::NotFound(id))?;
        Ok(submission.into())
    }
}

/// Validate a raw submit request. Checks run in contract order and the
/// first failure wins.
pub fn validate(request: SubmitRequest) -> SubmissionResult<ValidSubmission> {
    // 1. Required fields present
    let (Some(code), Some(language), Some(problem_id), Some(user_id)) = (
        request.code,
        request.language,
        request.problem_id,
        request.user_id,
    ) else {
        return Err(SubmissionError::MissingFields);
    };

    // ...and all text
    let (Some(code), Some(language), Some(problem_id), Some(user_id)) = (
        code.as_str(),
        language.as_str(),
        problem_id.as_str(),
        user_id.as_str(),
    ) else {
        return Err(SubmissionError::InvalidTypes);
    };

    // 2. Supported language (case-folded, trimmed)
    let language = Language::parse(language)
        .map_err(|_| SubmissionError::UnsupportedLanguage(language.trim().to_lowercase()))?;

    // 3. Code size in (0, 10 MiB]
    if code.is_empty() {
        return Err(SubmissionError::EmptyCode);
    }
    if code.len() > MAX_CODE_SIZE_BYTES {
        return Err(SubmissionError::CodeTooLarge);
    }

    // 4. Identifier lengths
    if problem_id.is_empty() || problem_id.len() > MAX_ID_LENGTH {
        return Err(SubmissionError::InvalidProblemId);
    }
    if user_id.is_empty() || user_id.len() > MAX_ID_LENGTH {
        return Err(SubmissionError::InvalidUserId);
    }

    // 5.-6. Optional metadata
    let metadata = request.metadata;
    let (time_limit_ms, memory_limit_kb, priority, test_cases, judge_config) =
        validate_metadata(metadata.as_ref())?;

    Ok(ValidSubmission {
        code: code.to_string(),
        language,
        problem_id: problem_id.to_string(),
        user_id: user_id.to_string(),
        time_limit_ms,
        memory_limit_kb,
        priority,
        test_cases,
        judge_config,
        metadata,
    })
}

type MetadataFields = (
    u64,
    u64,
    JobPriority,
    Vec<TestCase>,
    Option<judge::JudgeConfig>,
);

fn validate_metadata(metadata: Option<&Value>) -> SubmissionResult<MetadataFields> {
    let defaults = (
        DEFAULT_TIME_LIMIT_MS,
        DEFAULT_MEMORY_LIMIT_KB,
        JobPriority::Normal,
        Vec::new(),
        None,
    );

    let Some(metadata) = metadata else {
        return Ok(defaults);
    };
    let Some(map) = metadata.as_object() else {
        return Err(SubmissionError::InvalidTypes);
    };

    let time_limit_ms = match map.get("timeLimit") {
        None => DEFAULT_TIME_LIMIT_MS,
        Some(value) => {
            let Some(ms) = value.as_u64() else {
                return Err(SubmissionError::InvalidTimeLimit);
            };
            if !(MIN_TIME_LIMIT_MS..=MAX_TIME_LIMIT_MS).contains(&ms) {
                return Err(SubmissionError::InvalidTimeLimit);
            }
            ms
        }
    };

    let memory_limit_kb = match map.get("memoryLimit") {
        None => DEFAULT_MEMORY_LIMIT_KB,
        Some(value) => match value.as_u64() {
            Some(kb) if kb > 0 => kb,
            _ => return Err(SubmissionError::InvalidTypes),
        },
    };

    let priority = match map.get("priority") {
        None => JobPriority::Normal,
        Some(value) => value
            .as_str()
            .and_then(JobPriority::parse)
            .ok_or(SubmissionError::InvalidPriority)?,
    };

    let test_cases = match map.get("testCases") {
        None => Vec::new(),
        Some(value) => validate_test_cases(value)?,
    };

    let judge_config = match map.get("judge") {
        None => None,
        Some(value) => Some(
            serde_json::from_value(value.clone())
                .map_err(|_| SubmissionError::InvalidTypes)?,
        ),
    };

    Ok((
        time_limit_ms,
        memory_limit_kb,
        priority,
        test_cases,
        judge_config,
    ))
}

fn validate_test_cases(value: &Value) -> SubmissionResult<Vec<TestCase>> {
    let Some(entries) = value.as_array() else {
        return Err(SubmissionError::InvalidTestCases(
            "testCases must be an array".to_string(),
        ));
    };

    if entries.len() > MAX_TEST_CASES {
        return Err(SubmissionError::InvalidTestCases(format!(
            "at most {} test cases allowed",
            MAX_TEST_CASES
        )));
    }

    let mut cases = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        let Some(object) = entry.as_object() else {
            return Err(SubmissionError::InvalidTestCases(format!(
                "test case {} is not an object",
                index
            )));
        };

        let Some(input) = object.get("input").and_then(Value::as_str) else {
            return Err(SubmissionError::InvalidTestCases(format!(
                "test case {} missing string 'input'",
                index
            )));
        };
        let Some(expected) = object.get("expectedOutput").and_then(Value::as_str) else {
            return Err(SubmissionError::InvalidTestCases(format!(
                "test case {} missing string 'expectedOutput'",
                index
            )));
        };

        let id = object
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("test-{}", index + 1));
        let stop_on_failure = object
            .get("stopOnFailure")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        cases.push(TestCase {
            id,
            input: input.to_string(),
            expected_output: expected.to_string(),
            stop_on_failure,
        });
    }

    Ok(cases)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Submission, SubmissionOutcome, SubmissionStatus};
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;

    fn request(code: &str, language: &str) -> SubmitRequest {
        SubmitRequest {
            code: Some(json!(code)),
            language: Some(json!(language)),
            problem_id: Some(json!("sum")),
            user_id: Some(json!("u1")),
            metadata: None,
        }
    }

    fn request_with_metadata(metadata: Value) -> SubmitRequest {
        SubmitRequest {
            metadata: Some(metadata),
            ..request("print(1)", "python")
        }
    }

    // ---- validation ----

    #[test]
    fn test_valid_minimal_request() {
        let valid = validate(request("print(1)", "python")).unwrap();
        assert_eq!(valid.language, Language::Python);
        assert_eq!(valid.time_limit_ms, 5000);
        assert_eq!(valid.memory_limit_kb, 262_144);
        assert_eq!(valid.priority, JobPriority::Normal);
        assert!(valid.test_cases.is_empty());
    }

    #[test]
    fn test_missing_fields() {
        let request = SubmitRequest {
            code: Some(json!("x")),
            ..Default::default()
        };
        assert_eq!(validate(request).unwrap_err().code(), "MISSING_FIELDS");
    }

    #[test]
    fn test_non_string_fields() {
        let mut bad = request("x", "python");
        bad.code = Some(json!(42));
        assert_eq!(validate(bad).unwrap_err().code(), "INVALID_TYPES");
    }

    #[test]
    fn test_unsupported_language() {
        let err = validate(request("x", "cobol")).unwrap_err();
        assert_eq!(err.code(), "UNSUPPORTED_LANGUAGE");
    }

    #[test]
    fn test_language_case_folded() {
        let valid = validate(request("x", "  PYTHON ")).unwrap();
        assert_eq!(valid.language, Language::Python);
    }

    #[test]
    fn test_empty_code() {
        assert_eq!(validate(request("", "python")).unwrap_err().code(), "EMPTY_CODE");
    }

    #[test]
    fn test_code_size_boundary() {
        // Exactly 10 MiB is accepted
        let at_limit = "x".repeat(MAX_CODE_SIZE_BYTES);
        assert!(validate(request(&at_limit, "python")).is_ok());

        // One byte over is rejected
        let over = "x".repeat(MAX_CODE_SIZE_BYTES + 1);
        assert_eq!(
            validate(request(&over, "python")).unwrap_err().code(),
            "CODE_TOO_LARGE"
        );
    }

    #[test]
    fn test_id_length_boundary() {
        let mut ok = request("x", "python");
        ok.problem_id = Some(json!("p".repeat(MAX_ID_LENGTH)));
        assert!(validate(ok).is_ok());

        let mut bad = request("x", "python");
        bad.problem_id = Some(json!("p".repeat(MAX_ID_LENGTH + 1)));
        assert_eq!(validate(bad).unwrap_err().code(), "INVALID_PROBLEM_ID");

        let mut bad = request("x", "python");
        bad.user_id = Some(json!("u".repeat(MAX_ID_LENGTH + 1)));
        assert_eq!(validate(bad).unwrap_err().code(), "INVALID_USER_ID");
    }

    #[test]
    fn test_time_limit_boundaries() {
        assert!(validate(request_with_metadata(json!({"timeLimit": 100}))).is_ok());
        assert!(validate(request_with_metadata(json!({"timeLimit": 30000}))).is_ok());
        assert_eq!(
            validate(request_with_metadata(json!({"timeLimit": 99})))
                .unwrap_err()
                .code(),
            "INVALID_TIME_LIMIT"
        );
        assert_eq!(
            validate(request_with_metadata(json!({"timeLimit": 30001})))
                .unwrap_err()
                .code(),
            "INVALID_TIME_LIMIT"
        );
        assert_eq!(
            validate(request_with_metadata(json!({"timeLimit": "fast"})))
                .unwrap_err()
                .code(),
            "INVALID_TIME_LIMIT"
        );
    }

    #[test]
    fn test_priority_validation() {
        let valid = validate(request_with_metadata(json!({"priority": "high"}))).unwrap();
        assert_eq!(valid.priority, JobPriority::High);

        assert_eq!(
            validate(request_with_metadata(json!({"priority": "urgent"})))
                .unwrap_err()
                .code(),
            "INVALID_PRIORITY"
        );
    }

    #[test]
    fn test_test_case_count_boundary() {
        let case = json!({"input": "1", "expectedOutput": "1"});
        let cases_100: Vec<Value> = (0..100).map(|_| case.clone()).collect();
        assert!(validate(request_with_metadata(json!({"testCases": cases_100}))).is_ok());

        let cases_101: Vec<Value> = (0..101).map(|_| case.clone()).collect();
        assert_eq!(
            validate(request_with_metadata(json!({"testCases": cases_101})))
                .unwrap_err()
                .code(),
            "INVALID_TEST_CASES"
        );
    }

    #[test]
    fn test_test_case_field_types() {
        let bad = json!({"testCases": [{"input": 1, "expectedOutput": "1"}]});
        assert_eq!(
            validate(request_with_metadata(bad)).unwrap_err().code(),
            "INVALID_TEST_CASES"
        );
    }

    #[test]
    fn test_test_case_ids_defaulted() {
        let metadata = json!({"testCases": [
            {"input": "a", "expectedOutput": "b"},
            {"id": "edge", "input": "c", "expectedOutput": "d", "stopOnFailure": true},
        ]});
        let valid = validate(request_with_metadata(metadata)).unwrap();
        assert_eq!(valid.test_cases[0].id, "test-1");
        assert_eq!(valid.test_cases[1].id, "edge");
        assert!(valid.test_cases[1].stop_on_failure);
    }

    // ---- service pipeline ----

    #[derive(Default)]
    struct InMemoryRepository {
        rows: Mutex<HashMap<Uuid, Submission>>,
        fail_insert: bool,
    }

    #[async_trait]
    impl SubmissionRepository for InMemoryRepository {
        async fn insert(&self, new: NewSubmission) -> SubmissionResult<Submission> {
            if self.fail_insert {
                return Err(SubmissionError::Database("insert refused".into()));
            }
            let submission = Submission {
                id: Uuid::new_v4(),
                user_id: new.user_id,
                problem_id: new.problem_id,
                language: new.language,
                blob_key: new.blob_key,
                code_size_bytes: new.code_size_bytes,
                status: SubmissionStatus::Pending,
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
                metadata: new.metadata,
            };
            self.rows
                .lock()
                .unwrap()
                .insert(submission.id, submission.clone());
            Ok(submission)
        }

        async fn find_by_id(&self, id: Uuid) -> SubmissionResult<Option<Submission>> {
            Ok(self.rows.lock().unwrap().get(&id).cloned())
        }

        async fn mark_queued(&self, id: Uuid) -> SubmissionResult<()> {
            if let Some(row) = self.rows.lock().unwrap().get_mut(&id) {
                row.status = SubmissionStatus::Queued;
                row.queued_at = Some(Utc::now());
            }
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
            if let Some(row) = self.rows.lock().unwrap().get_mut(&id) {
                row.status = outcome.status;
                row.verdict = Some(outcome.verdict);
                row.score = Some(outcome.score);
                row.completed_at = Some(Utc::now());
            }
            Ok(())
        }

        async fn record_failure(&self, id: Uuid, message: &str) -> SubmissionResult<()> {
            if let Some(row) = self.rows.lock().unwrap().get_mut(&id) {
                row.status = SubmissionStatus::Failed;
                row.error_message = Some(message.to_string());
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingQueue {
        pushed: Mutex<Vec<ExecutionJob>>,
        fail: bool,
    }

    #[async_trait]
    impl JobQueue for RecordingQueue {
        async fn push(&self, job: &ExecutionJob) -> Result<String, StreamError> {
            if self.fail {
                return Err(StreamError::Timeout("queue unavailable".into()));
            }
            self.pushed.lock().unwrap().push(job.clone());
            Ok("1-0".to_string())
        }
    }

    struct AllowAll;

    #[async_trait]
    impl RateCheck for AllowAll {
        async fn check_submission(&self, _user: &str, _ip: &str) -> RateLimitOutcome {
            RateLimitOutcome {
                allowed: true,
                refused_by: None,
                retry_after_ms: 0,
                failed_open: false,
            }
        }
    }

    struct DenyAll;

    #[async_trait]
    impl RateCheck for DenyAll {
        async fn check_submission(&self, _user: &str, _ip: &str) -> RateLimitOutcome {
            RateLimitOutcome {
                allowed: false,
                refused_by: Some(ratelimit::BucketClass::User),
                retry_after_ms: 1500,
                failed_open: false,
            }
        }
    }

    fn service(
        repository: Arc<InMemoryRepository>,
        queue: Arc<RecordingQueue>,
        rate: Arc<dyn RateCheck>,
        blob_dir: &tempfile::TempDir,
    ) -> IntakeService<InMemoryRepository> {
        IntakeService::new(
            repository,
            Arc::new(blobstore::FsBlobStore::new(blob_dir.path())),
            queue,
            rate,
        )
    }

    #[tokio::test]
    async fn test_submit_happy_path() {
        let dir = tempfile::tempdir().unwrap();
        let repository = Arc::new(InMemoryRepository::default());
        let queue = Arc::new(RecordingQueue::default());
        let svc = service(repository.clone(), queue.clone(), Arc::new(AllowAll), &dir);

        let outcome = svc
            .submit(request("print(1)", "python"), "203.0.113.9")
            .await
            .unwrap();

        let SubmitOutcome::Queued { submission_id, .. } = outcome else {
            panic!("expected Queued");
        };

        // Record exists and moved to queued
        let row = repository.find_by_id(submission_id).await.unwrap().unwrap();
        assert_eq!(row.status, SubmissionStatus::Queued);

        // One job on the stream carrying the same id, first attempt
        let pushed = queue.pushed.lock().unwrap();
        assert_eq!(pushed.len(), 1);
        assert_eq!(pushed[0].submission_id, submission_id);
        assert_eq!(pushed[0].attempt, 1);
    }

    #[tokio::test]
    async fn test_submit_rate_limited() {
        let dir = tempfile::tempdir().unwrap();
        let repository = Arc::new(InMemoryRepository::default());
        let queue = Arc::new(RecordingQueue::default());
        let svc = service(repository.clone(), queue.clone(), Arc::new(DenyAll), &dir);

        let err = svc
            .submit(request("print(1)", "python"), "203.0.113.9")
            .await
            .unwrap_err();

        assert_eq!(err.code(), "RATE_LIMIT_EXCEEDED");
        let SubmissionError::RateLimitExceeded { retry_after_ms } = err else {
            panic!("expected RateLimitExceeded");
        };
        assert_eq!(retry_after_ms, 1500);

        // Nothing stored, nothing queued
        assert!(repository.rows.lock().unwrap().is_empty());
        assert!(queue.pushed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_submit_insert_failure_compensates_blob() {
        let dir = tempfile::tempdir().unwrap();
        let repository = Arc::new(InMemoryRepository {
            fail_insert: true,
            ..Default::default()
        });
        let queue = Arc::new(RecordingQueue::default());
        let svc = service(repository, queue, Arc::new(AllowAll), &dir);

        let err = svc
            .submit(request("print(1)", "python"), "203.0.113.9")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "DATABASE_ERROR");

        // The orphaned blob was deleted
        let leftover: Vec<_> = walk_files(dir.path());
        assert!(leftover.is_empty(), "expected no blobs, found {:?}", leftover);
    }

    #[tokio::test]
    async fn test_submit_queue_failure_defers() {
        let dir = tempfile::tempdir().unwrap();
        let repository = Arc::new(InMemoryRepository::default());
        let queue = Arc::new(RecordingQueue {
            fail: true,
            ..Default::default()
        });
        let svc = service(repository.clone(), queue, Arc::new(AllowAll), &dir);

        let outcome = svc
            .submit(request("print(1)", "python"), "203.0.113.9")
            .await
            .unwrap();

        let SubmitOutcome::Deferred { submission_id, .. } = outcome else {
            panic!("expected Deferred");
        };

        // Row stays pending for the sweeper
        let row = repository.find_by_id(submission_id).await.unwrap().unwrap();
        assert_eq!(row.status, SubmissionStatus::Pending);
    }

    #[tokio::test]
    async fn test_load_shedder_rejects_low_priority() {
        let dir = tempfile::tempdir().unwrap();
        let repository = Arc::new(InMemoryRepository::default());
        let queue = Arc::new(RecordingQueue::default());

        let shedder = Arc::new(LoadShedder::new(10, 5));
        shedder.observe_depth(15); // sheds low priority

        let svc = service(repository, queue, Arc::new(AllowAll), &dir)
            .with_load_shedder(shedder);

        let low = request_with_metadata(json!({"priority": "low"}));
        let err = svc.submit(low, "203.0.113.9").await.unwrap_err();
        assert_eq!(err.code(), "RATE_LIMIT_EXCEEDED");

        // Normal priority still admitted
        let normal = request("print(1)", "python");
        assert!(svc.submit(normal, "203.0.113.9").await.is_ok());
    }

    fn walk_files(dir: &std::path::Path) -> Vec<std::path::PathBuf> {
        let mut files = Vec::new();
        if let Ok(entries) = std::fs::read_dir(dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    files.extend(walk_files(&path));
                } else {
                    files.push(path);
                }
            }
        }
        files
    }
}
