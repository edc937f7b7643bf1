//! Forwarding relay: change records to bucket contributions.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use vtl_firestore::RawIntervalStore;
use vtl_models::{ChangeFeedRecord, RawIntervalKey, StreamEvent, VideoLocation};
use vtl_queue::{ChangeFeed, ContributionPublisher, Delivery};
use vtl_timeline::plan_contributions;

use crate::config::WorkerRole;
use crate::error::WorkerResult;
use crate::executor::BatchHandler;
use crate::metrics;

pub struct ForwardingRelay {
    raw: Arc<dyn RawIntervalStore>,
    publisher: Arc<dyn ContributionPublisher>,
}

impl ForwardingRelay {
    pub fn new(raw: Arc<dyn RawIntervalStore>, publisher: Arc<dyn ContributionPublisher>) -> Self {
        Self { raw, publisher }
    }

    /// Handle one change record. Returns the number of contributions published.
    ///
    /// Ingestions count the interval at its stored location. Corrections
    /// re-plan the interval as a catch-up that moves device time to cloud.
    pub async fn handle_record(&self, record: &ChangeFeedRecord) -> WorkerResult<usize> {
        match record.classify()? {
            StreamEvent::Ingestion(key) => {
                metrics::record_change_event("ingestion");
                self.forward(&key, None, false).await
            }
            StreamEvent::Correction(key) => {
                metrics::record_change_event("correction");
                self.forward(&key, Some(VideoLocation::Cloud), true).await
            }
            StreamEvent::Ignored(reason) => {
                metrics::record_change_event("ignored");
                debug!(?reason, event_type = ?record.event_type, "Ignoring change record");
                Ok(0)
            }
        }
    }

    async fn forward(
        &self,
        key: &RawIntervalKey,
        location: Option<VideoLocation>,
        is_catchup: bool,
    ) -> WorkerResult<usize> {
        let Some(interval) = self.raw.load(key).await? else {
            warn!(
                device_id = %key.device_id,
                start = key.start_millis,
                "Raw interval not found, skipping change record"
            );
            metrics::record_missing_interval();
            return Ok(0);
        };

        let location = location.unwrap_or(interval.location);
        let contributions = plan_contributions(&interval, location, is_catchup);

        self.publisher.publish(&contributions).await?;
        metrics::record_contributions_emitted(&contributions);

        debug!(
            device_id = %interval.device_id,
            start = interval.start_millis,
            duration = interval.duration_millis,
            location = %location,
            catchup = is_catchup,
            contributions = contributions.len(),
            "Forwarded interval"
        );
        Ok(contributions.len())
    }
}

#[async_trait]
impl BatchHandler for ForwardingRelay {
    fn role(&self) -> WorkerRole {
        WorkerRole::Relay
    }

    /// Records are handled in delivery order; the first failure fails the batch.
    async fn handle_batch(&self, deliveries: &[Delivery]) -> WorkerResult<()> {
        for delivery in deliveries {
            let record = ChangeFeed::decode(delivery)?;
            self.handle_record(&record).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use vtl_firestore::MemoryStore;
    use vtl_models::{BucketContribution, ChangeEventType, Granularity, NewImage, OldImage, RawInterval};
    use vtl_queue::QueueResult;

    use crate::error::WorkerError;

    #[derive(Default)]
    struct RecordingPublisher {
        published: Mutex<Vec<BucketContribution>>,
    }

    #[async_trait]
    impl ContributionPublisher for RecordingPublisher {
        async fn publish(&self, contributions: &[BucketContribution]) -> QueueResult<()> {
            self.published.lock().unwrap().extend_from_slice(contributions);
            Ok(())
        }
    }

    async fn relay_with(interval: Option<&RawInterval>) -> (ForwardingRelay, Arc<RecordingPublisher>) {
        let store = Arc::new(MemoryStore::new());
        if let Some(interval) = interval {
            RawIntervalStore::save(store.as_ref(), interval).await.unwrap();
        }
        let publisher = Arc::new(RecordingPublisher::default());
        (ForwardingRelay::new(store, publisher.clone()), publisher)
    }

    #[tokio::test]
    async fn test_insert_emits_ingestion_contributions() {
        let interval = RawInterval::new("cam-1", 1_696_444_404_000, 4_000, VideoLocation::Device);
        let (relay, publisher) = relay_with(Some(&interval)).await;

        let count = relay.handle_record(&ChangeFeedRecord::insert(&interval)).await.unwrap();

        let published = publisher.published.lock().unwrap();
        assert_eq!(count, 5);
        assert_eq!(published.len(), 5);
        assert!(published.iter().all(|c| !c.is_catchup));
        assert!(published.iter().all(|c| c.location == VideoLocation::Device));

        let seconds: Vec<(i64, i64)> = published
            .iter()
            .filter(|c| c.granularity == Granularity::Seconds)
            .map(|c| (c.bucket_start_millis, c.duration_millis))
            .collect();
        assert_eq!(seconds, vec![(1_696_444_400_000, 1_000), (1_696_444_405_000, 3_000)]);
    }

    #[tokio::test]
    async fn test_upload_emits_catchup_to_cloud() {
        let interval = RawInterval::new("cam-1", 60_000, 4_000, VideoLocation::Cloud);
        let (relay, publisher) = relay_with(Some(&interval)).await;

        let record = ChangeFeedRecord::modify(&interval, VideoLocation::Device);
        let count = relay.handle_record(&record).await.unwrap();

        let published = publisher.published.lock().unwrap();
        assert_eq!(count, 4);
        assert!(published.iter().all(|c| c.is_catchup));
        assert!(published.iter().all(|c| c.location == VideoLocation::Cloud));
    }

    #[tokio::test]
    async fn test_ignored_records_emit_nothing() {
        let interval = RawInterval::new("cam-1", 60_000, 4_000, VideoLocation::Device);
        let (relay, publisher) = relay_with(Some(&interval)).await;

        let cloud_to_device = ChangeFeedRecord::modify(&interval, VideoLocation::Cloud);
        let removal = ChangeFeedRecord {
            event_type: ChangeEventType::Remove,
            new_image: None,
            old_image: Some(OldImage {
                location: Some("DEVICE".to_string()),
            }),
        };

        assert_eq!(relay.handle_record(&cloud_to_device).await.unwrap(), 0);
        assert_eq!(relay.handle_record(&removal).await.unwrap(), 0);
        assert!(publisher.published.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_interval_is_skipped() {
        let interval = RawInterval::new("cam-1", 60_000, 4_000, VideoLocation::Device);
        let (relay, publisher) = relay_with(None).await;

        assert_eq!(relay.handle_record(&ChangeFeedRecord::insert(&interval)).await.unwrap(), 0);
        assert!(publisher.published.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_non_numeric_sort_key_is_fatal() {
        let (relay, _) = relay_with(None).await;
        let record = ChangeFeedRecord {
            event_type: ChangeEventType::Insert,
            new_image: Some(NewImage {
                partition_key: Some("cam-1".to_string()),
                sort_key: Some("yesterday".to_string()),
                location: Some("CLOUD".to_string()),
            }),
            old_image: None,
        };

        assert!(matches!(
            relay.handle_record(&record).await,
            Err(WorkerError::Model(_))
        ));
    }

    #[tokio::test]
    async fn test_batch_stops_at_undecodable_delivery() {
        let interval = RawInterval::new("cam-1", 60_000, 4_000, VideoLocation::Device);
        let (relay, publisher) = relay_with(Some(&interval)).await;

        let deliveries = [
            Delivery {
                id: "1-0".to_string(),
                payload: serde_json::to_string(&ChangeFeedRecord::insert(&interval)).unwrap(),
                delivery_count: 1,
            },
            Delivery {
                id: "2-0".to_string(),
                payload: "not json".to_string(),
                delivery_count: 1,
            },
        ];

        assert!(matches!(
            relay.handle_batch(&deliveries).await,
            Err(WorkerError::Queue(_))
        ));
        // The first record was already forwarded before the failure.
        assert_eq!(publisher.published.lock().unwrap().len(), 4);
    }
}
