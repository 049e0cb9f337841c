//! Observability utilities for the code execution platform.
//!
//! This crate provides:
//! - The global Prometheus recorder and `/metrics` handler
//! - Axum middleware for automatic HTTP request metrics
//! - Helpers for submission and execution metrics
//!
//! # Example
//!
//! ```rust,ignore
//! use observability::{init_metrics, metrics_handler, SubmissionMetrics};
//!
//! init_metrics();
//!
//! SubmissionMetrics::record_accepted("python", 1024);
//! SubmissionMetrics::record_verdict("python", "AC");
//!
//! let app = Router::new()
//!     .route("/metrics", get(metrics_handler));
//! ```

pub mod middleware;
pub mod submissions;

pub use submissions::SubmissionMetrics;

// Re-export metrics macros for convenience
pub use metrics::{counter, gauge, histogram};

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use tracing::info;

static METRICS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Initialize the Prometheus metrics recorder.
///
/// Call once at application startup, before any metric is recorded.
pub fn init_metrics() -> &'static PrometheusHandle {
    METRICS_HANDLE.get_or_init(|| {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .expect("Failed to install Prometheus recorder");

        info!("Prometheus metrics recorder initialized");

        register_metric_descriptions();

        handle
    })
}

/// Get the metrics handle (must call `init_metrics` first).
pub fn get_metrics_handle() -> Option<&'static PrometheusHandle> {
    METRICS_HANDLE.get()
}

/// Axum handler for the `/metrics` endpoint.
pub async fn metrics_handler() -> String {
    match get_metrics_handle() {
        Some(handle) => handle.render(),
        None => "# Metrics not initialized\n".to_string(),
    }
}

fn register_metric_descriptions() {
    use metrics::{describe_counter, describe_gauge, describe_histogram};

    // HTTP metrics
    describe_counter!("http_requests_total", "Total number of HTTP requests");
    describe_histogram!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds"
    );
    describe_counter!(
        "http_requests_errors_total",
        "Total number of HTTP request errors"
    );

    // Submission intake metrics
    describe_counter!(
        "submissions_accepted_total",
        "Submissions accepted by the intake API, by language"
    );
    describe_counter!(
        "submissions_rejected_total",
        "Submissions rejected at validation, by error code"
    );
    describe_histogram!(
        "submission_code_size_bytes",
        "Size of submitted source code in bytes"
    );
    describe_counter!(
        "rate_limit_rejections_total",
        "Submissions rejected by the rate limiter, by bucket class"
    );
    describe_counter!(
        "rate_limit_store_errors_total",
        "Rate-limit store failures that caused a fail-open decision"
    );

    // Execution metrics
    describe_counter!(
        "submission_verdicts_total",
        "Final verdicts by language and verdict code"
    );
    describe_histogram!(
        "submission_score_percent",
        "Final score percentage per judged submission"
    );
    describe_histogram!(
        "submission_exec_time_ms",
        "Wall-clock execution time per submission in milliseconds"
    );
    describe_histogram!(
        "submission_exec_memory_kb",
        "Peak memory per submission in KB, by language"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_handler_before_init() {
        // Render must not panic when the recorder is absent.
        let handle = get_metrics_handle();
        if handle.is_none() {
            // Expected in a fresh test process
        }
    }
}
