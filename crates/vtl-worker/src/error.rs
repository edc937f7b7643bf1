//! Worker error types.

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The conditional write kept losing to concurrent writers.
    #[error("Write conflict on {key} after {attempts} attempts")]
    WriteConflict { key: String, attempts: u32 },

    #[error("Batch failed: {0}")]
    BatchFailed(String),

    #[error("Model error: {0}")]
    Model(#[from] vtl_models::ModelError),

    #[error("Firestore error: {0}")]
    Firestore(#[from] vtl_firestore::FirestoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] vtl_queue::QueueError),
}

impl WorkerError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn batch_failed(msg: impl Into<String>) -> Self {
        Self::BatchFailed(msg.into())
    }

    pub fn write_conflict(key: impl Into<String>, attempts: u32) -> Self {
        Self::WriteConflict {
            key: key.into(),
            attempts,
        }
    }
}
