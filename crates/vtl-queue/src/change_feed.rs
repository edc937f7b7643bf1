//! Change feed over the raw-interval store.

use async_trait::async_trait;
use tracing::debug;

use vtl_models::ChangeFeedRecord;

use crate::config::QueueConfig;
use crate::error::{QueueError, QueueResult};
use crate::stream::{Delivery, StreamQueue};

/// Stream field holding the serialized record.
pub const RECORD_FIELD: &str = "record";

/// Destination for change-feed records.
#[async_trait]
pub trait ChangeFeedSink: Send + Sync {
    async fn publish(&self, record: &ChangeFeedRecord) -> QueueResult<()>;
}

/// Redis-backed change feed read by the relay consumer group.
#[derive(Clone)]
pub struct ChangeFeed {
    queue: StreamQueue,
}

impl ChangeFeed {
    pub fn new(client: redis::Client, config: &QueueConfig) -> Self {
        Self {
            queue: StreamQueue::new(
                client,
                config.change_feed_stream.clone(),
                config.relay_group.clone(),
                RECORD_FIELD,
            ),
        }
    }

    pub fn queue(&self) -> &StreamQueue {
        &self.queue
    }

    /// Decode the record carried by a delivery.
    pub fn decode(delivery: &Delivery) -> QueueResult<ChangeFeedRecord> {
        serde_json::from_str(&delivery.payload)
            .map_err(|e| QueueError::malformed(&delivery.id, e.to_string()))
    }
}

#[async_trait]
impl ChangeFeedSink for ChangeFeed {
    async fn publish(&self, record: &ChangeFeedRecord) -> QueueResult<()> {
        let payload = serde_json::to_string(record)?;
        let id = self.queue.publish(&payload, &[]).await?;
        debug!(id = %id, event_type = ?record.event_type, "Published change record");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vtl_models::{RawInterval, VideoLocation};

    #[test]
    fn test_decode_record() {
        let interval = RawInterval::new("cam-1", 1_000, 4_000, VideoLocation::Device);
        let record = ChangeFeedRecord::insert(&interval);
        let delivery = Delivery {
            id: "1-0".to_string(),
            payload: serde_json::to_string(&record).unwrap(),
            delivery_count: 1,
        };

        assert_eq!(ChangeFeed::decode(&delivery).unwrap(), record);
    }

    #[test]
    fn test_decode_garbage_is_malformed() {
        let delivery = Delivery {
            id: "1-0".to_string(),
            payload: "not json".to_string(),
            delivery_count: 1,
        };

        assert!(matches!(
            ChangeFeed::decode(&delivery),
            Err(QueueError::Malformed { .. })
        ));
    }
}
