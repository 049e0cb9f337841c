//! Redis stream consumer.
//!
//! Handles consumer group management, reading new and pending entries,
//! acknowledgment, claiming abandoned entries, re-queueing retries and
//! dead-lettering exhausted jobs.

use crate::config::WorkerConfig;
use crate::error::StreamError;
use crate::registry::StreamJob;
use redis::aio::ConnectionManager;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Reads and manages entries of one stream on behalf of a consumer group
/// member.
pub struct StreamConsumer {
    redis: ConnectionManager,
    config: WorkerConfig,
}

impl StreamConsumer {
    pub fn new(redis: ConnectionManager, config: WorkerConfig) -> Self {
        Self { redis, config }
    }

    pub fn redis(&self) -> &ConnectionManager {
        &self.redis
    }

    pub fn stream_name(&self) -> &str {
        &self.config.stream_name
    }

    /// Create the consumer group (and the stream, via MKSTREAM) if absent.
    pub async fn ensure_consumer_group(&self) -> Result<(), StreamError> {
        let mut conn = self.redis.clone();

        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => {
                info!(
                    group = %self.config.consumer_group,
                    stream = %self.config.stream_name,
                    "Created consumer group"
                );
                Ok(())
            }
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!(group = %self.config.consumer_group, "Consumer group already exists");
                Ok(())
            }
            Err(e) => Err(StreamError::ConsumerGroup(e.to_string())),
        }
    }

    /// Read entries already delivered to this consumer but not yet acked.
    pub async fn read_pending<J: StreamJob>(&self) -> Result<Vec<(String, J)>, StreamError> {
        let mut conn = self.redis.clone();

        let opts = StreamReadOptions::default()
            .group(&self.config.consumer_group, &self.config.consumer_id)
            .count(self.config.batch_size);

        // "0" reads this consumer's pending entries instead of new ones
        let result: Result<StreamReadReply, _> = conn
            .xread_options(&[&self.config.stream_name], &["0"], &opts)
            .await;

        match result {
            Ok(reply) => Ok(self.decode_entries(reply)),
            Err(e) if e.to_string().to_lowercase().contains("timed out") => Ok(vec![]),
            Err(e) => Err(StreamError::Redis(e)),
        }
    }

    /// Read never-delivered entries, blocking up to the configured window.
    pub async fn read_new<J: StreamJob>(&self) -> Result<Vec<(String, J)>, StreamError> {
        let mut conn = self.redis.clone();

        let mut opts = StreamReadOptions::default()
            .group(&self.config.consumer_group, &self.config.consumer_id)
            .count(self.config.batch_size);

        if let Some(timeout_ms) = self.config.block_timeout_ms {
            opts = opts.block(timeout_ms as usize);
        }

        let result: Result<StreamReadReply, _> = conn
            .xread_options(&[&self.config.stream_name], &[">"], &opts)
            .await;

        match result {
            Ok(reply) => {
                let jobs = self.decode_entries(reply);
                if !jobs.is_empty() {
                    debug!(count = jobs.len(), "Received new stream entries");
                }
                Ok(jobs)
            }
            Err(e) => {
                let err_str = e.to_string().to_lowercase();
                // BLOCK expiry surfaces as a timeout or a nil reply
                if err_str.contains("timed out") || err_str.contains("nil") {
                    Ok(vec![])
                } else {
                    Err(StreamError::Redis(e))
                }
            }
        }
    }

    pub fn is_blocking(&self) -> bool {
        self.config.block_timeout_ms.is_some()
    }

    /// Decode a read reply, shunting malformed entries straight to the DLQ
    /// so they never wedge the pending list.
    fn decode_entries<J: StreamJob>(&self, reply: StreamReadReply) -> Vec<(String, J)> {
        let mut jobs = Vec::new();

        for stream_key in reply.keys {
            for entry in stream_key.ids {
                let fields = text_fields(&entry.map);
                match J::from_fields(&fields) {
                    Ok(job) => jobs.push((entry.id, job)),
                    Err(e) => {
                        warn!(
                            entry_id = %entry.id,
                            error = %e,
                            "Undecodable stream entry, dead-lettering"
                        );
                        let consumer = self.clone_for_task();
                        let entry_id = entry.id.clone();
                        tokio::spawn(async move {
                            if let Err(err) = consumer.dead_letter_raw(&entry_id, &fields, &e.to_string()).await {
                                warn!(entry_id = %entry_id, error = %err, "Failed to dead-letter raw entry");
                            }
                            if let Err(err) = consumer.ack(&entry_id).await {
                                warn!(entry_id = %entry_id, error = %err, "Failed to ACK raw entry");
                            }
                        });
                    }
                }
            }
        }

        jobs
    }

    fn clone_for_task(&self) -> Self {
        Self {
            redis: self.redis.clone(),
            config: self.config.clone(),
        }
    }

    /// Acknowledge one entry. Acking an already-acked entry is a no-op.
    pub async fn ack(&self, entry_id: &str) -> Result<(), StreamError> {
        let mut conn = self.redis.clone();

        let _: i64 = conn
            .xack(
                &self.config.stream_name,
                &self.config.consumer_group,
                &[entry_id],
            )
            .await?;

        debug!(entry_id = %entry_id, "Acknowledged entry");
        Ok(())
    }

    /// Append a job back onto the stream for another attempt.
    pub async fn requeue<J: StreamJob>(&self, job: &J) -> Result<String, StreamError> {
        let mut conn = self.redis.clone();

        let mut cmd = redis::cmd("XADD");
        cmd.arg(&self.config.stream_name)
            .arg("MAXLEN")
            .arg("~")
            .arg(self.config.max_length)
            .arg("*");
        for (key, value) in job.to_fields() {
            cmd.arg(key).arg(value);
        }

        let entry_id: String = cmd.query_async(&mut conn).await?;

        debug!(
            job_id = %job.job_id(),
            attempt = %job.attempt(),
            entry_id = %entry_id,
            "Re-queued job"
        );
        Ok(entry_id)
    }

    /// Move an exhausted job to the dead letter stream.
    pub async fn dead_letter<J: StreamJob>(
        &self,
        job: &J,
        reason: &str,
    ) -> Result<(), StreamError> {
        if !self.config.enable_dlq {
            return Ok(());
        }

        let mut conn = self.redis.clone();

        let mut cmd = redis::cmd("XADD");
        cmd.arg(&self.config.dlq_stream)
            .arg("MAXLEN")
            .arg("~")
            .arg(10_000)
            .arg("*");
        for (key, value) in job.to_fields() {
            cmd.arg(key).arg(value);
        }
        cmd.arg("reason")
            .arg(reason)
            .arg("failed_at")
            .arg(chrono::Utc::now().to_rfc3339());

        let _: String = cmd.query_async(&mut conn).await?;

        warn!(
            job_id = %job.job_id(),
            attempts = %job.attempt(),
            reason = %reason,
            dlq = %self.config.dlq_stream,
            "Moved job to DLQ"
        );
        Ok(())
    }

    /// Dead-letter an entry that could not be decoded, preserving its raw
    /// fields.
    async fn dead_letter_raw(
        &self,
        entry_id: &str,
        fields: &HashMap<String, String>,
        reason: &str,
    ) -> Result<(), StreamError> {
        if !self.config.enable_dlq {
            return Ok(());
        }

        let mut conn = self.redis.clone();

        let mut cmd = redis::cmd("XADD");
        cmd.arg(&self.config.dlq_stream)
            .arg("MAXLEN")
            .arg("~")
            .arg(10_000)
            .arg("*");
        for (key, value) in fields {
            cmd.arg(key).arg(value);
        }
        cmd.arg("original_entry_id")
            .arg(entry_id)
            .arg("reason")
            .arg(reason)
            .arg("failed_at")
            .arg(chrono::Utc::now().to_rfc3339());

        let _: String = cmd.query_async(&mut conn).await?;
        Ok(())
    }

    /// Claim every pending entry of the group at startup.
    ///
    /// Restarted workers get a fresh consumer name, so entries delivered to
    /// the previous incarnation must be claimed before they can be re-read
    /// via `read_pending`.
    pub async fn claim_all_pending_on_startup(&self) -> Result<usize, StreamError> {
        let mut conn = self.redis.clone();
        let mut total_claimed = 0;
        let mut start_id = "0-0".to_string();

        loop {
            let result: redis::Value = redis::cmd("XAUTOCLAIM")
                .arg(&self.config.stream_name)
                .arg(&self.config.consumer_group)
                .arg(&self.config.consumer_id)
                .arg(0) // min-idle-time 0 claims everything
                .arg(&start_id)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await
                .unwrap_or(redis::Value::Nil);

            // Reply: [next-start-id, [[entry-id, fields], ...], [deleted-ids]]
            let redis::Value::Array(arr) = &result else {
                break;
            };
            if arr.len() < 2 {
                break;
            }

            let next = match &arr[0] {
                redis::Value::BulkString(bytes) => String::from_utf8_lossy(bytes).to_string(),
                redis::Value::SimpleString(s) => s.clone(),
                _ => break,
            };

            let claimed = match &arr[1] {
                redis::Value::Array(entries) => entries.len(),
                _ => 0,
            };
            total_claimed += claimed;

            if next == "0-0" || claimed == 0 {
                break;
            }
            start_id = next;
        }

        if total_claimed > 0 {
            info!(
                count = total_claimed,
                consumer = %self.config.consumer_id,
                "Claimed pending entries on startup"
            );
        }

        Ok(total_claimed)
    }

    /// Claim entries abandoned by crashed consumers (idle past the
    /// configured threshold).
    pub async fn claim_abandoned(&self) -> Result<usize, StreamError> {
        let mut conn = self.redis.clone();

        let result: redis::Value = redis::cmd("XAUTOCLAIM")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(&self.config.consumer_id)
            .arg(self.config.claim_idle_ms)
            .arg("0-0")
            .arg("COUNT")
            .arg(self.config.batch_size)
            .query_async(&mut conn)
            .await
            .unwrap_or(redis::Value::Nil);

        let mut claimed = 0;
        if let redis::Value::Array(arr) = &result {
            if let Some(redis::Value::Array(entries)) = arr.get(1) {
                claimed = entries.len();
                if claimed > 0 {
                    info!(
                        count = claimed,
                        consumer = %self.config.consumer_id,
                        "Claimed abandoned entries"
                    );
                }
            }
        }

        Ok(claimed)
    }

    /// Current stream length (queue depth).
    pub async fn queue_depth(&self) -> Result<usize, StreamError> {
        let mut conn = self.redis.clone();
        let depth: usize = conn.xlen(&self.config.stream_name).await.unwrap_or(0);
        Ok(depth)
    }

    /// Stream metadata for monitoring endpoints.
    pub async fn stream_info(&self) -> Result<StreamInfo, StreamError> {
        let mut conn = self.redis.clone();

        let result: Result<redis::streams::StreamInfoStreamReply, _> = redis::cmd("XINFO")
            .arg("STREAM")
            .arg(&self.config.stream_name)
            .query_async(&mut conn)
            .await;

        match result {
            Ok(info) => Ok(StreamInfo {
                stream_name: self.config.stream_name.clone(),
                length: info.length,
                first_entry_id: Some(info.first_entry.id.clone()),
                last_entry_id: Some(info.last_entry.id.clone()),
                groups: info.groups,
            }),
            Err(e) if e.to_string().contains("no such key") => Ok(StreamInfo {
                stream_name: self.config.stream_name.clone(),
                length: 0,
                first_entry_id: None,
                last_entry_id: None,
                groups: 0,
            }),
            Err(e) => Err(StreamError::Redis(e)),
        }
    }
}

/// Convert an entry's value map into text fields.
fn text_fields(map: &HashMap<String, redis::Value>) -> HashMap<String, String> {
    map.iter()
        .filter_map(|(key, value)| {
            let text = match value {
                redis::Value::BulkString(bytes) => String::from_utf8_lossy(bytes).to_string(),
                redis::Value::SimpleString(s) => s.clone(),
                redis::Value::Int(n) => n.to_string(),
                _ => return None,
            };
            Some((key.clone(), text))
        })
        .collect()
}

/// Stream metadata for monitoring.
#[derive(Debug, Clone)]
pub struct StreamInfo {
    pub stream_name: String,
    pub length: usize,
    pub first_entry_id: Option<String>,
    pub last_entry_id: Option<String>,
    pub groups: usize,
}
