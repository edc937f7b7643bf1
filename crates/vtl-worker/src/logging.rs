//! Structured batch logging.
//!
//! Every line carries the consumer role and the batch id, so the lines of
//! one batch can be followed across a mixed relay/updater log.

use tracing::{error, info, warn, Span};
use uuid::Uuid;

/// Logger for one batch of stream messages.
#[derive(Debug, Clone)]
pub struct BatchLogger {
    role: String,
    batch_id: String,
}

impl BatchLogger {
    /// Logger for a new batch with a fresh id.
    pub fn new(role: &str) -> Self {
        Self::with_id(role, &Uuid::new_v4().to_string())
    }

    pub fn with_id(role: &str, batch_id: &str) -> Self {
        Self {
            role: role.to_string(),
            batch_id: batch_id.to_string(),
        }
    }

    pub fn log_start(&self, size: usize, stream: &str) {
        info!(
            role = %self.role,
            batch_id = %self.batch_id,
            batch_size = size,
            stream = %stream,
            "Batch started"
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            role = %self.role,
            batch_id = %self.batch_id,
            "Batch warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            role = %self.role,
            batch_id = %self.batch_id,
            "Batch failed: {}", message
        );
    }

    pub fn log_completion(&self, size: usize, elapsed_ms: u128) {
        info!(
            role = %self.role,
            batch_id = %self.batch_id,
            batch_size = size,
            elapsed_ms = elapsed_ms as u64,
            "Batch completed"
        );
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn batch_id(&self) -> &str {
        &self.batch_id
    }

    /// Span covering the processing of this batch.
    pub fn create_span(&self) -> Span {
        tracing::info_span!("batch", role = %self.role, batch_id = %self.batch_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_logger_creation() {
        let logger = BatchLogger::with_id("relay", "batch-1");
        assert_eq!(logger.role(), "relay");
        assert_eq!(logger.batch_id(), "batch-1");
    }

    #[test]
    fn test_new_batches_get_distinct_ids() {
        let first = BatchLogger::new("updater");
        let second = BatchLogger::new("updater");
        assert_ne!(first.batch_id(), second.batch_id());
    }

    #[test]
    fn test_logging_methods_do_not_panic() {
        let logger = BatchLogger::new("updater");
        logger.log_start(3, "vtl:contributions:0");
        logger.log_warning("negative device accumulator");
        logger.log_error("store unavailable");
        logger.log_completion(3, 12);
        let _span = logger.create_span();
    }
}
