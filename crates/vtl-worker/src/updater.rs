//! Aggregate updater: folds contributions into their buckets.
//!
//! A plain contribution adds its duration to the accumulator of its
//! location. A catch-up contribution moves the duration from the device
//! accumulator to the cloud accumulator, leaving the bucket total unchanged.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use vtl_firestore::{AggregateStore, Versioned};
use vtl_models::{AggregateBucket, BucketContribution};
use vtl_queue::{ContributionQueue, Delivery};

use crate::config::{WorkerRole, WriteMode};
use crate::error::{WorkerError, WorkerResult};
use crate::executor::BatchHandler;
use crate::metrics;

pub struct AggregateUpdater {
    store: Arc<dyn AggregateStore>,
    mode: WriteMode,
    max_conflict_retries: u32,
    conflict_backoff: Duration,
}

impl AggregateUpdater {
    pub fn new(store: Arc<dyn AggregateStore>, mode: WriteMode) -> Self {
        Self {
            store,
            mode,
            max_conflict_retries: 5,
            conflict_backoff: Duration::from_millis(20),
        }
    }

    pub fn with_conflict_retries(mut self, max_retries: u32, backoff: Duration) -> Self {
        self.max_conflict_retries = max_retries;
        self.conflict_backoff = backoff;
        self
    }

    /// Apply one contribution and return the bucket as written.
    pub async fn apply(&self, contribution: &BucketContribution) -> WorkerResult<AggregateBucket> {
        let (bucket, drove_negative) = match self.mode {
            WriteMode::Overwrite => self.apply_overwrite(contribution).await?,
            WriteMode::Conditional => self.apply_conditional(contribution).await?,
        };

        metrics::record_contribution_applied(contribution);
        if drove_negative {
            warn!(
                device_id = %bucket.device_id,
                granularity = %bucket.granularity,
                bucket_start = bucket.bucket_start_millis,
                device_millis = bucket.device_millis,
                "Catch-up left the device accumulator negative"
            );
            metrics::record_negative_device(bucket.granularity);
        }

        debug!(
            device_id = %bucket.device_id,
            granularity = %bucket.granularity,
            bucket_start = bucket.bucket_start_millis,
            cloud_millis = bucket.cloud_millis,
            device_millis = bucket.device_millis,
            catchup = contribution.is_catchup,
            "Applied contribution"
        );
        Ok(bucket)
    }

    async fn apply_overwrite(&self, contribution: &BucketContribution) -> WorkerResult<(AggregateBucket, bool)> {
        let (mut bucket, _) = self.load(contribution).await?;
        let drove_negative = fold(&mut bucket, contribution);
        self.store.save(&bucket).await?;
        Ok((bucket, drove_negative))
    }

    /// Read, fold and write guarded by the read version. A lost race
    /// reloads and folds again on the fresh state.
    async fn apply_conditional(&self, contribution: &BucketContribution) -> WorkerResult<(AggregateBucket, bool)> {
        let mut attempt: u32 = 0;
        loop {
            let (mut bucket, version) = self.load(contribution).await?;
            let drove_negative = fold(&mut bucket, contribution);

            match self.store.save_conditional(&bucket, version.as_deref()).await {
                Ok(_) => return Ok((bucket, drove_negative)),
                Err(e) if e.is_precondition_failed() => {
                    metrics::record_write_conflict();
                    if attempt >= self.max_conflict_retries {
                        return Err(WorkerError::write_conflict(
                            contribution.partition_key(),
                            attempt + 1,
                        ));
                    }
                    attempt += 1;
                    debug!(
                        partition_key = %contribution.partition_key(),
                        attempt,
                        "Aggregate changed since read, retrying"
                    );
                    tokio::time::sleep(self.conflict_backoff * attempt).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn load(&self, contribution: &BucketContribution) -> WorkerResult<(AggregateBucket, Option<String>)> {
        let key = contribution.bucket_key();
        Ok(match self.store.load(&key).await? {
            Some(Versioned { value, version }) => (value, version),
            None => (AggregateBucket::empty(key), None),
        })
    }
}

/// Fold `contribution` into `bucket`. Returns `true` when a catch-up
/// transfer leaves the device accumulator negative.
fn fold(bucket: &mut AggregateBucket, contribution: &BucketContribution) -> bool {
    if contribution.is_catchup {
        bucket.transfer_device_to_cloud(contribution.duration_millis)
    } else {
        bucket.add(contribution.location, contribution.duration_millis);
        false
    }
}

#[async_trait]
impl BatchHandler for AggregateUpdater {
    fn role(&self) -> WorkerRole {
        WorkerRole::Updater
    }

    /// Contributions are applied in delivery order; the first failure fails the batch.
    async fn handle_batch(&self, deliveries: &[Delivery]) -> WorkerResult<()> {
        for delivery in deliveries {
            let contribution = ContributionQueue::decode(delivery)?;
            self.apply(&contribution).await?;
        }
        Ok(())
    }
}
