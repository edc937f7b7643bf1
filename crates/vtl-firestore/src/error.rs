//! Store error types.

use thiserror::Error;

/// Result type for store operations.
pub type FirestoreResult<T> = Result<T, FirestoreError>;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum FirestoreError {
    #[error("Authentication failed: {0}")]
    AuthError(String),

    #[error("Document not found: {0}")]
    NotFound(String),

    #[error("Document already exists: {0}")]
    AlreadyExists(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid page token: {0}")]
    InvalidPageToken(String),

    #[error("Rate limited, retry after {0}ms")]
    RateLimited(u64),

    #[error("Server error ({0}): {1}")]
    ServerError(u16, String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Default back-off when a 429 carries no usable hint.
const DEFAULT_RATE_LIMIT_BACKOFF_MS: u64 = 1000;

impl FirestoreError {
    pub fn auth_error(msg: impl Into<String>) -> Self {
        Self::AuthError(msg.into())
    }

    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    pub fn request_failed(msg: impl Into<String>) -> Self {
        Self::RequestFailed(msg.into())
    }

    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Self::InvalidResponse(msg.into())
    }

    /// Map an HTTP error status from the REST API to an error.
    pub fn from_http_status(status: u16, msg: impl Into<String>) -> Self {
        let msg = msg.into();
        match status {
            401 => Self::AuthError(msg),
            403 => Self::PermissionDenied(msg),
            404 => Self::NotFound(msg),
            409 => Self::AlreadyExists(msg),
            412 => Self::PreconditionFailed(msg),
            // Update-time mismatches come back as 400 FAILED_PRECONDITION.
            400 if msg.contains("FAILED_PRECONDITION") => Self::PreconditionFailed(msg),
            429 => Self::RateLimited(DEFAULT_RATE_LIMIT_BACKOFF_MS),
            500..=599 => Self::ServerError(status, msg),
            _ => Self::RequestFailed(msg),
        }
    }

    /// HTTP status this error corresponds to, if any.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            FirestoreError::AuthError(_) => Some(401),
            FirestoreError::PermissionDenied(_) => Some(403),
            FirestoreError::NotFound(_) => Some(404),
            FirestoreError::AlreadyExists(_) => Some(409),
            FirestoreError::PreconditionFailed(_) => Some(412),
            FirestoreError::RateLimited(_) => Some(429),
            FirestoreError::ServerError(status, _) => Some(*status),
            FirestoreError::RequestFailed(_) | FirestoreError::InvalidPageToken(_) => Some(400),
            FirestoreError::Network(e) => e.status().map(|s| s.as_u16()),
            FirestoreError::InvalidResponse(_) | FirestoreError::Json(_) => None,
        }
    }

    /// Server-suggested delay before retrying.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            FirestoreError::RateLimited(ms) => Some(*ms),
            _ => None,
        }
    }

    /// Check if error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FirestoreError::Network(_)
                | FirestoreError::RateLimited(_)
                | FirestoreError::ServerError(_, _)
        )
    }

    /// True if a conditional write lost against a concurrent writer.
    pub fn is_precondition_failed(&self) -> bool {
        matches!(
            self,
            FirestoreError::PreconditionFailed(_) | FirestoreError::AlreadyExists(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_from_http_status() {
        assert!(matches!(
            FirestoreError::from_http_status(404, "missing"),
            FirestoreError::NotFound(_)
        ));
        assert!(matches!(
            FirestoreError::from_http_status(409, "conflict"),
            FirestoreError::AlreadyExists(_)
        ));
        assert!(matches!(
            FirestoreError::from_http_status(503, "unavailable"),
            FirestoreError::ServerError(503, _)
        ));
        assert!(matches!(
            FirestoreError::from_http_status(400, "bad request"),
            FirestoreError::RequestFailed(_)
        ));
    }

    #[test]
    fn test_failed_precondition_body_maps_to_precondition() {
        let err = FirestoreError::from_http_status(
            400,
            r#"{"error": {"status": "FAILED_PRECONDITION"}}"#,
        );
        assert!(err.is_precondition_failed());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_retryable_errors() {
        assert!(FirestoreError::from_http_status(429, "slow down").is_retryable());
        assert!(FirestoreError::from_http_status(500, "oops").is_retryable());
        assert!(!FirestoreError::from_http_status(403, "nope").is_retryable());
        assert!(!FirestoreError::not_found("x").is_retryable());
    }

    #[test]
    fn test_http_status_getter() {
        assert_eq!(FirestoreError::RateLimited(1000).http_status(), Some(429));
        assert_eq!(
            FirestoreError::ServerError(502, "bad gateway".into()).http_status(),
            Some(502)
        );
        assert_eq!(FirestoreError::invalid_response("x").http_status(), None);
    }

    #[test]
    fn test_retry_after() {
        assert_eq!(FirestoreError::RateLimited(250).retry_after_ms(), Some(250));
        assert_eq!(FirestoreError::not_found("x").retry_after_ms(), None);
    }
}
