//! The job envelope carried on the execution stream.

use chrono::{DateTime, Utc};
use judge::JudgeConfig;
use sandbox::TestCase;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use stream_worker::{JobPriority, StreamError, StreamJob};
use uuid::Uuid;

/// One queued execution, serialized as flat text fields on the stream
/// entry (numbers included - the stream store's natural encoding).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionJob {
    pub submission_id: Uuid,
    pub user_id: String,
    pub problem_id: String,
    pub language: String,
    pub blob_key: String,
    pub code_size_bytes: u64,
    pub time_limit_ms: u64,
    pub memory_limit_kb: u64,
    pub priority: JobPriority,
    pub created_at: DateTime<Utc>,
    /// 1-based delivery attempt.
    pub attempt: u32,
    /// Test cases, carried as a JSON document when present.
    pub test_cases: Vec<TestCase>,
    /// Judge configuration override, carried as JSON when present.
    pub judge_config: Option<JudgeConfig>,
}

impl ExecutionJob {
    fn required<'a>(
        fields: &'a HashMap<String, String>,
        key: &str,
    ) -> Result<&'a str, StreamError> {
        fields
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| StreamError::JobParsing(format!("missing '{}' field", key)))
    }

    fn parse_field<T: std::str::FromStr>(
        fields: &HashMap<String, String>,
        key: &str,
    ) -> Result<T, StreamError> {
        Self::required(fields, key)?
            .parse()
            .map_err(|_| StreamError::JobParsing(format!("invalid '{}' field", key)))
    }
}

impl StreamJob for ExecutionJob {
    fn job_id(&self) -> String {
        self.submission_id.to_string()
    }

    fn attempt(&self) -> u32 {
        self.attempt
    }

    fn next_attempt(&self) -> Self {
        Self {
            attempt: self.attempt + 1,
            ..self.clone()
        }
    }

    fn priority(&self) -> JobPriority {
        self.priority
    }

    fn to_fields(&self) -> Vec<(String, String)> {
        let mut fields = vec![
            ("submission_id".into(), self.submission_id.to_string()),
            ("user_id".into(), self.user_id.clone()),
            ("problem_id".into(), self.problem_id.clone()),
            ("language".into(), self.language.clone()),
            ("blob_key".into(), self.blob_key.clone()),
            ("code_size_bytes".into(), self.code_size_bytes.to_string()),
            ("time_limit_ms".into(), self.time_limit_ms.to_string()),
            ("memory_limit_kb".into(), self.memory_limit_kb.to_string()),
            ("priority".into(), self.priority.as_str().to_string()),
            ("created_at".into(), self.created_at.to_rfc3339()),
            ("attempt".into(), self.attempt.to_string()),
        ];

        if !self.test_cases.is_empty() {
            // Infallible: TestCase is a plain string struct
            if let Ok(json) = serde_json::to_string(&self.test_cases) {
                fields.push(("test_cases".into(), json));
            }
        }

        if let Some(config) = &self.judge_config {
            if let Ok(json) = serde_json::to_string(config) {
                fields.push(("judge_config".into(), json));
            }
        }

        fields
    }

    fn from_fields(fields: &HashMap<String, String>) -> Result<Self, StreamError> {
        let priority_raw = Self::required(fields, "priority")?;
        let priority = JobPriority::parse(priority_raw)
            .ok_or_else(|| StreamError::JobParsing(format!("invalid priority '{}'", priority_raw)))?;

        let created_at_raw = Self::required(fields, "created_at")?;
        let created_at = DateTime::parse_from_rfc3339(created_at_raw)
            .map_err(|_| StreamError::JobParsing("invalid 'created_at' field".into()))?
            .with_timezone(&Utc);

        let test_cases = match fields.get("test_cases") {
            Some(json) => serde_json::from_str(json)
                .map_err(|e| StreamError::JobParsing(format!("invalid test_cases: {}", e)))?,
            None => Vec::new(),
        };

        let judge_config = match fields.get("judge_config") {
            Some(json) => Some(
                serde_json::from_str(json)
                    .map_err(|e| StreamError::JobParsing(format!("invalid judge_config: {}", e)))?,
            ),
            None => None,
        };

        Ok(Self {
            submission_id: Self::parse_field(fields, "submission_id")?,
            user_id: Self::required(fields, "user_id")?.to_string(),
            problem_id: Self::required(fields, "problem_id")?.to_string(),
            language: Self::required(fields, "language")?.to_string(),
            blob_key: Self::required(fields, "blob_key")?.to_string(),
            code_size_bytes: Self::parse_field(fields, "code_size_bytes")?,
            time_limit_ms: Self::parse_field(fields, "time_limit_ms")?,
            memory_limit_kb: Self::parse_field(fields, "memory_limit_kb")?,
            priority,
            created_at,
            attempt: Self::parse_field(fields, "attempt").unwrap_or(1),
            test_cases,
            judge_config,
        })
    }
}
