//! Stream key layout for execution jobs.
//!
//! Streams are keyed by worker pool so container-backed and microVM
//! pools can drain independently: `exec:{pool}:jobs` with the DLQ at
//! `exec:{pool}:dlq`.

use stream_worker::StreamDef;

/// Default pool name; overridden by `POOL_NAME`.
pub const DEFAULT_POOL: &str = "container";

/// Jobs stream key for a pool.
pub fn jobs_stream_name(pool: &str) -> String {
    format!("exec:{}:jobs", pool)
}

/// DLQ stream key for a pool.
pub fn dlq_stream_name(pool: &str) -> String {
    format!("exec:{}:dlq", pool)
}

/// Stream definition for the default pool.
pub struct ExecutionJobStream;

impl StreamDef for ExecutionJobStream {
    const STREAM_NAME: &'static str = "exec:container:jobs";
    const CONSUMER_GROUP: &'static str = "exec_workers";
    const DLQ_STREAM: &'static str = "exec:container:dlq";
    const MAX_LENGTH: i64 = 100_000;
    const BATCH_SIZE: usize = 10;
}
