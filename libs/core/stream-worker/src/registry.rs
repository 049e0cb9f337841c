//! Core traits for stream processing.
//!
//! - [`StreamJob`]: a payload that can travel through a stream
//! - [`StreamDef`]: type-level stream configuration
//! - [`JobPriority`]: scheduling class carried by every job

use crate::StreamError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Scheduling class of a queued job.
///
/// The load shedder drops `Low` first when the queue grows, then `Normal`,
/// then `High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPriority {
    Low,
    #[default]
    Normal,
    High,
}

impl JobPriority {
    /// Shedding rank: lower ranks are shed first.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Low => 0,
            Self::Normal => 1,
            Self::High => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "low" => Some(Self::Low),
            "normal" => Some(Self::Normal),
            "high" => Some(Self::High),
            _ => None,
        }
    }
}

/// A job that can be carried on a Redis stream.
///
/// The stream store speaks flat text field maps, so jobs provide an
/// explicit codec instead of an opaque serialized blob: `to_fields` must
/// render every value as text (numbers included), and `from_fields` must
/// reject maps missing required fields with [`StreamError::JobParsing`].
///
/// # Example
///
/// ```ignore
/// impl StreamJob for ExecutionJob {
///     fn job_id(&self) -> String { self.submission_id.to_string() }
///     fn attempt(&self) -> u32 { self.attempt }
///     fn next_attempt(&self) -> Self {
///         Self { attempt: self.attempt + 1, ..self.clone() }
///     }
///     fn to_fields(&self) -> Vec<(String, String)> { /* ... */ }
///     fn from_fields(fields: &HashMap<String, String>) -> Result<Self, StreamError> { /* ... */ }
/// }
/// ```
pub trait StreamJob: Send + Sync + Clone + 'static {
    /// Unique job ID for logging and tracking.
    fn job_id(&self) -> String;

    /// Current attempt counter (0 for the first delivery).
    fn attempt(&self) -> u32;

    /// A copy of the job with the attempt counter incremented.
    fn next_attempt(&self) -> Self;

    /// Scheduling class. Defaults to `Normal`.
    fn priority(&self) -> JobPriority {
        JobPriority::Normal
    }

    /// Encode the job as text fields for `XADD`.
    fn to_fields(&self) -> Vec<(String, String)>;

    /// Decode a job from the text fields of a stream entry.
    fn from_fields(fields: &HashMap<String, String>) -> Result<Self, StreamError>;
}

/// Type-level stream configuration.
///
/// Implement on a zero-sized marker type to pin the Redis keys and tuning
/// constants for one logical queue.
///
/// # Example
///
/// ```ignore
/// struct ExecutionJobStream;
///
/// impl StreamDef for ExecutionJobStream {
///     const STREAM_NAME: &'static str = "exec:container:jobs";
///     const CONSUMER_GROUP: &'static str = "exec_workers";
///     const DLQ_STREAM: &'static str = "exec:container:dlq";
/// }
/// ```
pub trait StreamDef {
    /// The Redis stream key.
    const STREAM_NAME: &'static str;

    /// The consumer group name.
    const CONSUMER_GROUP: &'static str;

    /// The dead letter stream key.
    const DLQ_STREAM: &'static str;

    /// Maximum stream length before approximate trimming.
    const MAX_LENGTH: i64 = 100_000;

    /// Poll interval in milliseconds when the stream is idle.
    const POLL_INTERVAL_MS: u64 = 1000;

    /// Batch size for reads.
    const BATCH_SIZE: usize = 10;

    /// Idle time in milliseconds before a pending entry is considered
    /// abandoned by its consumer.
    const CLAIM_IDLE_MS: u64 = 60_000;
}
