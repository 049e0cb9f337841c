//! Opaque key-to-bytes blob storage for submitted source code.
//!
//! The intake API writes code here before the submission record exists;
//! workers read it back by key when a job is claimed. The interface is
//! deliberately minimal (`put` / `get` / `delete`) so a bucket-backed
//! implementation can replace the filesystem one without touching callers.
//!
//! Keys follow the layout
//! `submissions/{user_id}/{problem_id}/{epoch_ms}-{rand}.{ext}`.

mod fs;
mod key;

pub use fs::FsBlobStore;
pub use key::submission_key;

use async_trait::async_trait;
use thiserror::Error;

/// Errors from blob operations.
#[derive(Debug, Error)]
pub enum BlobError {
    #[error("Blob not found: {0}")]
    NotFound(String),

    #[error("Invalid blob key: {0}")]
    InvalidKey(String),

    #[error("Blob store I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type BlobResult<T> = Result<T, BlobError>;

/// Durable opaque key-to-bytes storage.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store bytes under the key, overwriting any existing object.
    async fn put(&self, key: &str, bytes: &[u8]) -> BlobResult<()>;

    /// Fetch the bytes stored under the key.
    async fn get(&self, key: &str) -> BlobResult<Vec<u8>>;

    /// Delete the object. Deleting a missing key is a no-op.
    async fn delete(&self, key: &str) -> BlobResult<()>;

    /// Cheap reachability probe for readiness endpoints.
    async fn ping(&self) -> BlobResult<()>;
}
