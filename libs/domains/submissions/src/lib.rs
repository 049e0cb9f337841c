//! Submissions domain.
//!
//! Owns the submission data model and both halves of its lifecycle:
//!
//! ```text
//! ┌──────────────┐   validate / rate-limit / store / enqueue
//! │ IntakeService│ ─────────────────────────────────────────┐
//! └──────────────┘                                          │
//!                                                           v
//!                                            Redis stream (exec:{pool}:jobs)
//!                                                           │
//! ┌────────────────────┐   claim / execute / judge / persist│
//! │ ExecutionProcessor │ <────────────────────────────────── ┘
//! └────────────────────┘
//! ```
//!
//! The intake half runs in the API binary, the processor half in the
//! worker binary; they share the repository, the blob store and the job
//! envelope defined here.

pub mod entity;
pub mod error;
pub mod models;
pub mod postgres;
pub mod processor;
pub mod repository;
pub mod service;
pub mod stream_models;
pub mod streams;

pub use error::{SubmissionError, SubmissionResult};
pub use models::{
    NewSubmission, Submission, SubmissionStatus, SubmissionView, SubmitOutcome, SubmitRequest,
    ValidSubmission,
};
pub use postgres::PgSubmissionRepository;
pub use processor::ExecutionProcessor;
pub use repository::SubmissionRepository;
pub use service::{IntakeService, JobQueue, RateCheck};
pub use stream_models::ExecutionJob;
pub use streams::{dlq_stream_name, jobs_stream_name, ExecutionJobStream, DEFAULT_POOL};
