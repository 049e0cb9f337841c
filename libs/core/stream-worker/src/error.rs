//! Error types and retry policy for stream operations.

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during stream operations.
#[derive(Error, Debug)]
pub enum StreamError {
    /// Redis connection or command error.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Job processing failed in the processor. The category decides
    /// whether the job is retried or dead-lettered.
    #[error("Processing error: {0}")]
    Processing(String),

    /// Consumer group management error.
    #[error("Consumer group error: {0}")]
    ConsumerGroup(String),

    /// A stream entry could not be decoded into a job.
    #[error("Job parsing error: {0}")]
    JobParsing(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Operation timed out.
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Internal invariant violation.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl StreamError {
    /// True when the error is an XREADGROUP BLOCK expiry - no messages
    /// arrived within the block window. Expected behavior, not a failure.
    pub fn is_block_timeout(&self) -> bool {
        match self {
            Self::Redis(e) => {
                let err_str = e.to_string().to_lowercase();
                err_str.contains("timed out") && !err_str.contains("connection")
            }
            _ => false,
        }
    }

    /// True for transport-level failures that a reconnect may fix.
    pub fn is_connection_error(&self) -> bool {
        match self {
            Self::Redis(e) => {
                if self.is_block_timeout() {
                    return false;
                }
                let err_str = e.to_string().to_lowercase();
                err_str.contains("connection")
                    || err_str.contains("broken pipe")
                    || err_str.contains("reset by peer")
                    || err_str.contains("refused")
                    || err_str.contains("io error")
            }
            _ => false,
        }
    }

    /// True when the consumer group vanished (NOGROUP) and must be
    /// recreated.
    pub fn is_nogroup_error(&self) -> bool {
        match self {
            Self::Redis(e) => e.to_string().contains("NOGROUP"),
            Self::ConsumerGroup(s) => s.contains("NOGROUP"),
            _ => false,
        }
    }

    /// Classify the error for the retry/DLQ decision.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Redis(_) | Self::Timeout(_) | Self::ConsumerGroup(_) => ErrorCategory::Transient,

            // Malformed entries and bad config will not improve on retry.
            Self::JobParsing(_) | Self::Config(_) => ErrorCategory::Permanent,

            Self::Internal(_) => ErrorCategory::Transient,

            Self::Processing(s) => {
                let lower = s.to_lowercase();
                if lower.contains("rate")
                    || lower.contains("quota")
                    || lower.contains("throttl")
                    || lower.contains("too many")
                {
                    ErrorCategory::RateLimited
                } else if lower.contains("invalid")
                    || lower.contains("malformed")
                    || lower.contains("not found")
                    || lower.contains("unsupported")
                {
                    ErrorCategory::Permanent
                } else {
                    ErrorCategory::Transient
                }
            }
        }
    }
}

/// Error category for the retry decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Likely to resolve on retry (transport failures, timeouts, runtime
    /// hiccups).
    Transient,

    /// Will not improve on retry; dead-letter immediately.
    Permanent,

    /// The downstream is overloaded; retry after a longer backoff.
    RateLimited,
}

impl ErrorCategory {
    pub fn should_retry(&self) -> bool {
        !matches!(self, Self::Permanent)
    }
}

/// Exponential backoff schedule for job retries.
///
/// Delay for attempt `n` (1-based) is `min(max_ms, base_ms * 2^(n-1))`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base_ms: u64,
    pub max_ms: u64,
}

impl Backoff {
    pub const fn new(base_ms: u64, max_ms: u64) -> Self {
        Self { base_ms, max_ms }
    }

    /// Delay before re-queueing the given attempt (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32);
        let delay = self
            .base_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_ms);
        Duration::from_millis(delay)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(2000, 20_000)
    }
}
