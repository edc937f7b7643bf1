//! Sharded contribution queue.
//!
//! Every contribution to one bucket hashes to the same shard stream, so
//! one consumer sees a bucket's updates in publish order.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::debug;

use vtl_models::BucketContribution;

use crate::config::QueueConfig;
use crate::error::{QueueError, QueueResult};
use crate::stream::{Delivery, StreamQueue};

/// Stream field holding the serialized contribution.
pub const MESSAGE_FIELD: &str = "message";

/// Stream field holding the bucket partition key.
pub const PARTITION_KEY_FIELD: &str = "partition_key";

/// Destination for bucket contributions.
#[async_trait]
pub trait ContributionPublisher: Send + Sync {
    /// Publish contributions in order.
    async fn publish(&self, contributions: &[BucketContribution]) -> QueueResult<()>;
}

/// Stable shard index for a partition key.
pub fn shard_for(partition_key: &str, shards: u32) -> u32 {
    if shards <= 1 {
        return 0;
    }
    let digest = Sha256::digest(partition_key.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(prefix) % u64::from(shards)) as u32
}

/// One stream per shard, all read by the aggregator consumer group.
#[derive(Clone)]
pub struct ContributionQueue {
    shards: Vec<StreamQueue>,
}

impl ContributionQueue {
    pub fn new(client: redis::Client, config: &QueueConfig) -> Self {
        let shards = (0..config.contribution_shards.max(1))
            .map(|shard| {
                StreamQueue::new(
                    client.clone(),
                    config.contribution_stream(shard),
                    config.aggregator_group.clone(),
                    MESSAGE_FIELD,
                )
            })
            .collect();
        Self { shards }
    }

    pub fn shards(&self) -> &[StreamQueue] {
        &self.shards
    }

    pub async fn init(&self) -> QueueResult<()> {
        for shard in &self.shards {
            shard.init().await?;
        }
        Ok(())
    }

    /// Decode the contribution carried by a delivery.
    pub fn decode(delivery: &Delivery) -> QueueResult<BucketContribution> {
        serde_json::from_str(&delivery.payload)
            .map_err(|e| QueueError::malformed(&delivery.id, e.to_string()))
    }

    fn shard(&self, partition_key: &str) -> &StreamQueue {
        &self.shards[shard_for(partition_key, self.shards.len() as u32) as usize]
    }
}

#[async_trait]
impl ContributionPublisher for ContributionQueue {
    async fn publish(&self, contributions: &[BucketContribution]) -> QueueResult<()> {
        for contribution in contributions {
            let partition_key = contribution.partition_key();
            let payload = serde_json::to_string(contribution)?;
            let shard = self.shard(&partition_key);

            shard
                .publish(&payload, &[(PARTITION_KEY_FIELD, partition_key.as_str())])
                .await?;

            debug!(
                stream = %shard.stream(),
                partition_key = %partition_key,
                duration = contribution.duration_millis,
                catchup = contribution.is_catchup,
                "Published contribution"
            );
        }
        Ok(())
    }
}
