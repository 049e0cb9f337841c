//! Redis Streams job queue for the execution platform.
//!
//! Provides at-least-once delivery with:
//! - Consumer group support for horizontal scaling
//! - Retry with exponential backoff and an attempt ceiling
//! - Dead letter stream for exhausted jobs, with admin endpoints
//! - Graceful shutdown via a watch channel
//! - Pending-entry recovery after worker crashes
//! - Concurrent job processing bounded by a semaphore
//! - Circuit breaker and queue-depth load shedding
//!
//! # Architecture
//!
//! ```text
//! Redis Stream (exec:{pool}:jobs)
//!   ↓ (consumer group)
//! StreamWorker<J, P>
//!   ↓ (processes jobs)
//! JobProcessor<J>
//!   ↓ (on exhausted retries)
//! DLQ Stream (exec:{pool}:dlq)
//! ```
//!
//! Jobs travel as flat field maps on the stream entry - every field is
//! text, including numeric ones. A job type implements [`StreamJob`] to
//! provide the encode/decode pair plus identity and attempt accessors.

pub mod backpressure;
mod config;
mod consumer;
pub mod dlq;
mod error;
pub mod health;
pub mod metrics;
mod producer;
mod registry;
pub mod resilience;
mod worker;

pub use config::WorkerConfig;
pub use consumer::{StreamConsumer, StreamInfo};
pub use error::{Backoff, ErrorCategory, StreamError};
pub use health::{admin_router, health_router, HealthState};
pub use producer::StreamProducer;
pub use registry::{JobPriority, StreamDef, StreamJob};
pub use resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use worker::{JobProcessor, StreamWorker};

/// Result type alias for stream operations.
pub type StreamResult<T> = Result<T, StreamError>;
