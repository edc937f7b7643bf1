//! Timeline error types.

use thiserror::Error;

pub type TimelineResult<T> = Result<T, TimelineError>;

#[derive(Debug, Error)]
pub enum TimelineError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Store error: {0}")]
    Store(#[from] vtl_firestore::FirestoreError),
}

impl From<validator::ValidationErrors> for TimelineError {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::InvalidRequest(errors.to_string())
    }
}
