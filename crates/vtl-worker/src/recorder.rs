//! Raw-interval write path.
//!
//! Firestore has no change stream of its own, so every write goes through
//! the recorder, which persists the interval and then publishes the change
//! record the relay consumes.

use std::sync::Arc;

use tracing::{debug, instrument, warn};

use vtl_firestore::RawIntervalStore;
use vtl_models::{ChangeFeedRecord, RawInterval};
use vtl_queue::ChangeFeedSink;

use crate::error::WorkerResult;

pub struct RawIntervalRecorder {
    store: Arc<dyn RawIntervalStore>,
    sink: Arc<dyn ChangeFeedSink>,
}

impl RawIntervalRecorder {
    pub fn new(store: Arc<dyn RawIntervalStore>, sink: Arc<dyn ChangeFeedSink>) -> Self {
        Self { store, sink }
    }

    /// Save `interval` and publish INSERT for a new identity, MODIFY with
    /// the previous location otherwise.
    ///
    /// The record is published only after the save succeeded.
    #[instrument(skip(self, interval), fields(device_id = %interval.device_id, start = interval.start_millis))]
    pub async fn record(&self, interval: &RawInterval) -> WorkerResult<ChangeFeedRecord> {
        let previous = self.store.load(&interval.key()).await?;

        if let Some(previous) = &previous {
            if previous.duration_millis != interval.duration_millis {
                warn!(
                    previous = previous.duration_millis,
                    new = interval.duration_millis,
                    "Interval duration changed on re-record; aggregates keep the original duration"
                );
            }
        }

        self.store.save(interval).await?;

        let record = match previous {
            None => ChangeFeedRecord::insert(interval),
            Some(previous) => ChangeFeedRecord::modify(interval, previous.location),
        };
        self.sink.publish(&record).await?;

        debug!(event_type = ?record.event_type, location = %interval.location, "Recorded interval");
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tokio_test::assert_err;
    use vtl_firestore::MemoryStore;
    use vtl_models::{ChangeEventType, StreamEvent, VideoLocation};
    use vtl_queue::{QueueError, QueueResult};

    #[derive(Default)]
    struct RecordingSink {
        records: Mutex<Vec<ChangeFeedRecord>>,
        fail: bool,
    }

    #[async_trait]
    impl ChangeFeedSink for RecordingSink {
        async fn publish(&self, record: &ChangeFeedRecord) -> QueueResult<()> {
            if self.fail {
                return Err(QueueError::publish_failed("sink down"));
            }
            self.records.lock().unwrap().push(record.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_first_write_is_insert() {
        let store = Arc::new(MemoryStore::new());
        let sink = Arc::new(RecordingSink::default());
        let recorder = RawIntervalRecorder::new(store.clone(), sink.clone());

        let interval = RawInterval::new("cam-1", 1_000, 4_000, VideoLocation::Device);
        let record = recorder.record(&interval).await.unwrap();

        assert_eq!(record.event_type, ChangeEventType::Insert);
        assert!(matches!(record.classify().unwrap(), StreamEvent::Ingestion(_)));
        assert_eq!(sink.records.lock().unwrap().len(), 1);
        assert_eq!(
            RawIntervalStore::load(store.as_ref(), &interval.key()).await.unwrap(),
            Some(interval)
        );
    }

    #[tokio::test]
    async fn test_upload_is_modify_with_previous_location() {
        let store = Arc::new(MemoryStore::new());
        let sink = Arc::new(RecordingSink::default());
        let recorder = RawIntervalRecorder::new(store.clone(), sink.clone());

        let on_device = RawInterval::new("cam-1", 1_000, 4_000, VideoLocation::Device);
        recorder.record(&on_device).await.unwrap();

        let uploaded = RawInterval::new("cam-1", 1_000, 4_000, VideoLocation::Cloud);
        let record = recorder.record(&uploaded).await.unwrap();

        assert_eq!(record.event_type, ChangeEventType::Modify);
        assert!(matches!(record.classify().unwrap(), StreamEvent::Correction(_)));
    }

    #[tokio::test]
    async fn test_failed_save_publishes_nothing() {
        let store = Arc::new(MemoryStore::new());
        store.set_unavailable(true);
        let sink = Arc::new(RecordingSink::default());
        let recorder = RawIntervalRecorder::new(store, sink.clone());

        let interval = RawInterval::new("cam-1", 1_000, 4_000, VideoLocation::Cloud);
        assert_err!(recorder.record(&interval).await);
        assert!(sink.records.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sink_failure_propagates() {
        let store = Arc::new(MemoryStore::new());
        let sink = Arc::new(RecordingSink {
            fail: true,
            ..RecordingSink::default()
        });
        let recorder = RawIntervalRecorder::new(store, sink);

        let interval = RawInterval::new("cam-1", 1_000, 4_000, VideoLocation::Cloud);
        assert_err!(recorder.record(&interval).await);
    }
}
