//! Prometheus metrics for the job queue and workers.
//!
//! ## Metrics
//!
//! - `exec_jobs_processed_total` - jobs by stream and outcome
//! - `exec_job_duration_seconds` - processing time histogram
//! - `exec_queue_depth` - stream length gauge
//! - `exec_in_flight_jobs` - concurrently processing jobs gauge
//! - `exec_retries_total` - retry attempts counter
//! - `exec_errors_total` - errors by category
//! - `exec_dlq_size` - dead letter stream length gauge

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Duration;

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metric names.
pub mod names {
    pub const JOBS_PROCESSED: &str = "exec_jobs_processed_total";
    pub const JOB_DURATION: &str = "exec_job_duration_seconds";
    pub const QUEUE_DEPTH: &str = "exec_queue_depth";
    pub const IN_FLIGHT_JOBS: &str = "exec_in_flight_jobs";
    pub const RETRIES: &str = "exec_retries_total";
    pub const ERRORS: &str = "exec_errors_total";
    pub const DLQ_SIZE: &str = "exec_dlq_size";
    pub const CIRCUIT_STATE: &str = "circuit_breaker_state";
}

/// Job outcome label values.
#[derive(Debug, Clone, Copy)]
pub enum JobOutcome {
    Success,
    Failed,
    Dlq,
    Skipped,
}

impl JobOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Dlq => "dlq",
            Self::Skipped => "skipped",
        }
    }
}

/// Install the global Prometheus recorder.
///
/// Call once at startup in binaries that do not already install a
/// recorder. Returns the handle used by the `/metrics` endpoint.
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            PrometheusBuilder::new()
                .install_recorder()
                .expect("Failed to install Prometheus recorder")
        })
        .clone()
}

/// Handle for rendering metrics, if initialized.
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

pub fn record_job_processed(stream: &str, outcome: JobOutcome) {
    counter!(
        names::JOBS_PROCESSED,
        "stream" => stream.to_string(),
        "outcome" => outcome.as_str().to_string()
    )
    .increment(1);
}

pub fn record_job_duration(stream: &str, duration: Duration) {
    histogram!(
        names::JOB_DURATION,
        "stream" => stream.to_string()
    )
    .record(duration.as_secs_f64());
}

pub fn set_queue_depth(stream: &str, depth: f64) {
    gauge!(
        names::QUEUE_DEPTH,
        "stream" => stream.to_string()
    )
    .set(depth);
}

pub fn set_in_flight_jobs(stream: &str, count: f64) {
    gauge!(
        names::IN_FLIGHT_JOBS,
        "stream" => stream.to_string()
    )
    .set(count);
}

pub fn record_retry(stream: &str, attempt: u32) {
    counter!(
        names::RETRIES,
        "stream" => stream.to_string(),
        "attempt" => attempt.to_string()
    )
    .increment(1);
}

pub fn record_error(stream: &str, category: &str) {
    counter!(
        names::ERRORS,
        "stream" => stream.to_string(),
        "category" => category.to_string()
    )
    .increment(1);
}

pub fn set_dlq_size(stream: &str, size: f64) {
    gauge!(
        names::DLQ_SIZE,
        "stream" => stream.to_string()
    )
    .set(size);
}

/// Circuit breaker state gauge: 0 = closed, 1 = open, 2 = half-open.
pub fn set_circuit_state(name: &str, state: u8) {
    gauge!(
        names::CIRCUIT_STATE,
        "breaker" => name.to_string()
    )
    .set(state as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_labels() {
        assert_eq!(JobOutcome::Success.as_str(), "success");
        assert_eq!(JobOutcome::Failed.as_str(), "failed");
        assert_eq!(JobOutcome::Dlq.as_str(), "dlq");
        assert_eq!(JobOutcome::Skipped.as_str(), "skipped");
    }
}
