//! Dead letter stream management.
//!
//! Jobs that exhaust their attempts (or fail permanently) land here with a
//! `reason` and `failed_at` annotation. The admin endpoints expose listing,
//! inspection, deletion and re-queueing.

use crate::error::StreamError;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

// XRANGE reply shape: entry id plus flat field pairs
type StreamEntries = Vec<(String, Vec<(String, String)>)>;

/// One dead-lettered job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqEntry {
    /// DLQ stream entry id.
    pub id: String,
    /// Why the job was dead-lettered.
    pub reason: Option<String>,
    /// When the job was dead-lettered (RFC-3339).
    pub failed_at: Option<String>,
    /// Attempt counter at the time of failure.
    pub attempts: Option<u32>,
    /// The original job envelope fields.
    pub job: HashMap<String, String>,
}

impl DlqEntry {
    fn from_fields(id: String, fields: Vec<(String, String)>) -> Self {
        let mut map: HashMap<String, String> = fields.into_iter().collect();
        let reason = map.remove("reason");
        let failed_at = map.remove("failed_at");
        map.remove("original_entry_id");
        let attempts = map.get("attempt").and_then(|v| v.parse().ok());

        Self {
            id,
            reason,
            failed_at,
            attempts,
            job: map,
        }
    }
}

/// Summary statistics of the dead letter stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqStats {
    pub stream_name: String,
    pub length: i64,
    pub oldest_entry_id: Option<String>,
    pub newest_entry_id: Option<String>,
}

/// Dead letter stream manager.
#[derive(Clone)]
pub struct DlqManager {
    redis: ConnectionManager,
    main_stream: String,
    dlq_stream: String,
}

impl DlqManager {
    pub fn new(
        redis: ConnectionManager,
        main_stream: impl Into<String>,
        dlq_stream: impl Into<String>,
    ) -> Self {
        Self {
            redis,
            main_stream: main_stream.into(),
            dlq_stream: dlq_stream.into(),
        }
    }

    pub fn dlq_stream(&self) -> &str {
        &self.dlq_stream
    }

    /// Stream length plus the oldest and newest entry ids.
    pub async fn stats(&self) -> Result<DlqStats, StreamError> {
        let mut conn = self.redis.clone();

        let length: i64 = conn.xlen(&self.dlq_stream).await.unwrap_or(0);

        let oldest: Option<StreamEntries> = redis::cmd("XRANGE")
            .arg(&self.dlq_stream)
            .arg("-")
            .arg("+")
            .arg("COUNT")
            .arg(1)
            .query_async(&mut conn)
            .await
            .ok();

        let newest: Option<StreamEntries> = redis::cmd("XREVRANGE")
            .arg(&self.dlq_stream)
            .arg("+")
            .arg("-")
            .arg("COUNT")
            .arg(1)
            .query_async(&mut conn)
            .await
            .ok();

        Ok(DlqStats {
            stream_name: self.dlq_stream.clone(),
            length,
            oldest_entry_id: oldest.and_then(|v| v.first().map(|(id, _)| id.clone())),
            newest_entry_id: newest.and_then(|v| v.first().map(|(id, _)| id.clone())),
        })
    }

    /// List entries, oldest first, starting after `offset` when given.
    pub async fn list(
        &self,
        count: usize,
        offset: Option<&str>,
    ) -> Result<Vec<DlqEntry>, StreamError> {
        let mut conn = self.redis.clone();

        let start = offset.unwrap_or("-");

        let entries: StreamEntries = redis::cmd("XRANGE")
            .arg(&self.dlq_stream)
            .arg(start)
            .arg("+")
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await?;

        Ok(entries
            .into_iter()
            .map(|(id, fields)| DlqEntry::from_fields(id, fields))
            .collect())
    }

    /// Fetch one entry by id.
    pub async fn get(&self, dlq_id: &str) -> Result<Option<DlqEntry>, StreamError> {
        let mut conn = self.redis.clone();

        let entries: StreamEntries = redis::cmd("XRANGE")
            .arg(&self.dlq_stream)
            .arg(dlq_id)
            .arg(dlq_id)
            .query_async(&mut conn)
            .await?;

        Ok(entries
            .into_iter()
            .next()
            .map(|(id, fields)| DlqEntry::from_fields(id, fields)))
    }

    /// Delete one entry.
    pub async fn delete(&self, dlq_id: &str) -> Result<bool, StreamError> {
        let mut conn = self.redis.clone();

        let deleted: i64 = conn.xdel(&self.dlq_stream, &[dlq_id]).await?;

        debug!(dlq_id = %dlq_id, "Deleted DLQ entry");
        Ok(deleted > 0)
    }

    /// Re-queue one entry onto the main stream with a fresh attempt
    /// counter, then remove it from the DLQ.
    pub async fn requeue(&self, dlq_id: &str) -> Result<bool, StreamError> {
        let Some(entry) = self.get(dlq_id).await? else {
            return Ok(false);
        };

        let mut conn = self.redis.clone();

        let mut cmd = redis::cmd("XADD");
        cmd.arg(&self.main_stream).arg("*");
        for (key, value) in &entry.job {
            if key == "attempt" {
                cmd.arg("attempt").arg("1");
            } else {
                cmd.arg(key).arg(value);
            }
        }

        let entry_id: String = cmd.query_async(&mut conn).await?;
        let _: i64 = conn.xdel(&self.dlq_stream, &[dlq_id]).await?;

        info!(
            dlq_id = %dlq_id,
            entry_id = %entry_id,
            stream = %self.main_stream,
            "Re-queued DLQ entry"
        );
        Ok(true)
    }

    /// Drop every entry.
    pub async fn purge(&self) -> Result<i64, StreamError> {
        let mut conn = self.redis.clone();

        let length: i64 = conn.xlen(&self.dlq_stream).await?;

        if length > 0 {
            let _: () = redis::cmd("XTRIM")
                .arg(&self.dlq_stream)
                .arg("MAXLEN")
                .arg(0)
                .query_async(&mut conn)
                .await?;

            info!(count = length, "Purged DLQ");
        }

        Ok(length)
    }
}
