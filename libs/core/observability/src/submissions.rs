//! Metric helpers for the submission pipeline.

use metrics::{counter, histogram};

/// Recording helpers for intake and judging metrics.
///
/// All helpers are fire-and-forget; they are safe to call from concurrent
/// handlers and workers.
pub struct SubmissionMetrics;

impl SubmissionMetrics {
    /// A submission passed validation and was accepted for execution.
    pub fn record_accepted(language: &str, code_size_bytes: usize) {
        counter!(
            "submissions_accepted_total",
            "language" => language.to_string()
        )
        .increment(1);

        histogram!("submission_code_size_bytes").record(code_size_bytes as f64);
    }

    /// A submission was rejected at validation with a stable error code.
    pub fn record_rejected(error_code: &str) {
        counter!(
            "submissions_rejected_total",
            "error" => error_code.to_string()
        )
        .increment(1);
    }

    /// A submission was refused by the rate limiter.
    pub fn record_rate_limited(bucket_class: &str) {
        counter!(
            "rate_limit_rejections_total",
            "bucket" => bucket_class.to_string()
        )
        .increment(1);
    }

    /// The rate-limit store failed and the request was allowed through.
    pub fn record_rate_limit_fail_open() {
        counter!("rate_limit_store_errors_total").increment(1);
    }

    /// A submission reached a terminal verdict.
    pub fn record_verdict(language: &str, verdict: &str) {
        counter!(
            "submission_verdicts_total",
            "language" => language.to_string(),
            "verdict" => verdict.to_string()
        )
        .increment(1);
    }

    /// Final score percentage for a judged submission.
    pub fn record_score(score_percent: f64) {
        histogram!("submission_score_percent").record(score_percent);
    }

    /// Wall-clock execution time and peak memory for one submission.
    pub fn record_execution(language: &str, exec_time_ms: u64, memory_kb: u64) {
        histogram!(
            "submission_exec_time_ms",
            "language" => language.to_string()
        )
        .record(exec_time_ms as f64);

        histogram!(
            "submission_exec_memory_kb",
            "language" => language.to_string()
        )
        .record(memory_kb as f64);
    }
}
