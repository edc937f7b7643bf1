//! Model error types.

use thiserror::Error;

pub type ModelResult<T> = Result<T, ModelError>;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Missing required key: {0}")]
    MissingKey(&'static str),

    #[error("Invalid sort key: {0}")]
    InvalidSortKey(String),

    #[error("Unknown granularity: {0}")]
    UnknownGranularity(String),

    #[error("Unknown video location: {0}")]
    UnknownLocation(String),
}
