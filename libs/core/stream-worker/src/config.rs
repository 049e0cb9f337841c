//! Worker configuration.

use crate::error::Backoff;
use crate::registry::StreamDef;
use uuid::Uuid;

/// Configuration for one stream worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Redis stream key.
    pub stream_name: String,

    /// Consumer group name.
    pub consumer_group: String,

    /// Unique consumer name within the group. Defaults to
    /// `{hostname}-{pid}-{uuid prefix}` so restarts never collide.
    pub consumer_id: String,

    /// Dead letter stream key.
    pub dlq_stream: String,

    /// Maximum stream length for approximate trimming.
    pub max_length: i64,

    /// Base poll interval in milliseconds when the stream is idle.
    pub poll_interval_ms: u64,

    /// Batch size for reads.
    pub batch_size: usize,

    /// XREADGROUP BLOCK timeout in milliseconds (None = non-blocking).
    pub block_timeout_ms: Option<u64>,

    /// Maximum concurrently processing jobs.
    pub max_concurrent_jobs: usize,

    /// Idle time in milliseconds before a pending entry counts as
    /// abandoned and is claimed from its previous consumer.
    pub claim_idle_ms: u64,

    /// Attempt ceiling before a job is dead-lettered.
    pub max_attempts: u32,

    /// Backoff schedule between retries.
    pub backoff: Backoff,

    /// Whether exhausted jobs go to the DLQ stream.
    pub enable_dlq: bool,
}

impl WorkerConfig {
    /// Build a config from a [`StreamDef`] marker type.
    pub fn from_stream_def<S: StreamDef>() -> Self {
        Self {
            stream_name: S::STREAM_NAME.to_string(),
            consumer_group: S::CONSUMER_GROUP.to_string(),
            consumer_id: default_consumer_id(),
            dlq_stream: S::DLQ_STREAM.to_string(),
            max_length: S::MAX_LENGTH,
            poll_interval_ms: S::POLL_INTERVAL_MS,
            batch_size: S::BATCH_SIZE,
            block_timeout_ms: Some(5000),
            max_concurrent_jobs: 2,
            claim_idle_ms: S::CLAIM_IDLE_MS,
            max_attempts: 3,
            backoff: Backoff::default(),
            enable_dlq: true,
        }
    }

    /// Build a config with explicit stream keys.
    pub fn new(stream_name: impl Into<String>, consumer_group: impl Into<String>) -> Self {
        let stream_name = stream_name.into();
        let dlq_stream = format!("{}:dlq", stream_name);
        Self {
            stream_name,
            consumer_group: consumer_group.into(),
            consumer_id: default_consumer_id(),
            dlq_stream,
            max_length: 100_000,
            poll_interval_ms: 1000,
            batch_size: 10,
            block_timeout_ms: Some(5000),
            max_concurrent_jobs: 2,
            claim_idle_ms: 60_000,
            max_attempts: 3,
            backoff: Backoff::default(),
            enable_dlq: true,
        }
    }

    pub fn with_consumer_id(mut self, id: impl Into<String>) -> Self {
        self.consumer_id = id.into();
        self
    }

    pub fn with_dlq_stream(mut self, stream: impl Into<String>) -> Self {
        self.dlq_stream = stream.into();
        self
    }

    pub fn with_poll_interval_ms(mut self, interval: u64) -> Self {
        self.poll_interval_ms = interval;
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    pub fn with_blocking(mut self, timeout_ms: Option<u64>) -> Self {
        self.block_timeout_ms = timeout_ms;
        self
    }

    pub fn with_max_concurrent_jobs(mut self, count: usize) -> Self {
        self.max_concurrent_jobs = count.max(1);
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_dlq_enabled(mut self, enable: bool) -> Self {
        self.enable_dlq = enable;
        self
    }
}

/// Consumer name unique across hosts, processes and restarts.
fn default_consumer_id() -> String {
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "worker".to_string());
    let uuid = Uuid::new_v4().simple().to_string();
    format!("{}-{}-{}", host, std::process::id(), &uuid[..8])
}
