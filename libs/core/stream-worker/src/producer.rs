//! Stream producer for enqueueing jobs.

use crate::error::StreamError;
use crate::registry::{StreamDef, StreamJob};
use redis::aio::ConnectionManager;
use tracing::debug;

/// Appends jobs to a stream. Used by the intake API and by admin
/// re-queueing.
///
/// # Example
///
/// ```rust,ignore
/// let producer = StreamProducer::from_stream_def::<ExecutionJobStream>(redis);
/// let entry_id = producer.send(&job).await?;
/// ```
#[derive(Clone)]
pub struct StreamProducer {
    redis: ConnectionManager,
    stream_name: String,
    max_length: i64,
}

impl StreamProducer {
    pub fn new(redis: ConnectionManager, stream_name: impl Into<String>) -> Self {
        Self {
            redis,
            stream_name: stream_name.into(),
            max_length: 100_000,
        }
    }

    pub fn from_stream_def<S: StreamDef>(redis: ConnectionManager) -> Self {
        Self {
            redis,
            stream_name: S::STREAM_NAME.to_string(),
            max_length: S::MAX_LENGTH,
        }
    }

    pub fn with_max_length(mut self, max_length: i64) -> Self {
        self.max_length = max_length;
        self
    }

    pub fn stream_name(&self) -> &str {
        &self.stream_name
    }

    /// Append a job; returns the stream-assigned entry id.
    ///
    /// The stream is trimmed approximately (`MAXLEN ~`) so trimming never
    /// blocks the append path.
    pub async fn send<J: StreamJob>(&self, job: &J) -> Result<String, StreamError> {
        let mut conn = self.redis.clone();

        let mut cmd = redis::cmd("XADD");
        cmd.arg(&self.stream_name)
            .arg("MAXLEN")
            .arg("~")
            .arg(self.max_length)
            .arg("*");
        for (key, value) in job.to_fields() {
            cmd.arg(key).arg(value);
        }

        let entry_id: String = cmd.query_async(&mut conn).await?;

        debug!(
            stream = %self.stream_name,
            entry_id = %entry_id,
            job_id = %job.job_id(),
            "Enqueued job"
        );

        Ok(entry_id)
    }

    /// Current stream length.
    pub async fn stream_length(&self) -> Result<usize, StreamError> {
        let mut conn = self.redis.clone();

        let length: usize = redis::cmd("XLEN")
            .arg(&self.stream_name)
            .query_async(&mut conn)
            .await?;

        Ok(length)
    }
}
