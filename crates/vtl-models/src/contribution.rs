//! Bucket contributions exchanged over the contribution queue.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::aggregate::BucketKey;
use crate::granularity::Granularity;
use crate::location::VideoLocation;

/// The share of one raw interval that falls into one aggregate bucket.
///
/// Serialized with the wire field names consumed by the aggregate updater.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct BucketContribution {
    /// Camera device ID
    #[serde(rename = "deviceId")]
    pub device_id: String,

    /// Granularity of the target bucket
    #[serde(rename = "timeIncrementUnits")]
    pub granularity: Granularity,

    /// Start of the target bucket (epoch millis)
    #[serde(rename = "bucketStartTime")]
    pub bucket_start_millis: i64,

    /// First millisecond of the raw interval inside the bucket
    #[serde(rename = "timestampToBeStored")]
    pub timestamp_millis: i64,

    /// Milliseconds of video contributed to the bucket
    #[serde(rename = "durationInMillis")]
    pub duration_millis: i64,

    /// Location the duration is counted against
    #[serde(rename = "videoDensityLocation")]
    pub location: VideoLocation,

    /// Transfer previously counted device time to cloud instead of adding
    #[serde(rename = "isCatchup", default)]
    pub is_catchup: bool,
}

impl BucketContribution {
    /// Queue partition key; updates to one bucket share a key.
    pub fn partition_key(&self) -> String {
        self.bucket_key().to_string()
    }

    /// Identity of the aggregate bucket this contribution targets.
    pub fn bucket_key(&self) -> BucketKey {
        BucketKey::new(self.device_id.clone(), self.granularity, self.bucket_start_millis)
    }
}
