//! Persisted per-bucket density counters.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::granularity::Granularity;
use crate::location::VideoLocation;

/// Aggregates are kept for 90 days past the end of their bucket.
pub const AGGREGATE_TTL_SECS: i64 = 90 * 86_400;

/// Identity of an aggregate bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct BucketKey {
    pub device_id: String,
    pub granularity: Granularity,
    pub bucket_start_millis: i64,
}

impl BucketKey {
    pub fn new(device_id: impl Into<String>, granularity: Granularity, bucket_start_millis: i64) -> Self {
        Self {
            device_id: device_id.into(),
            granularity,
            bucket_start_millis,
        }
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}#{}#{}",
            self.device_id, self.granularity, self.bucket_start_millis
        )
    }
}

/// Milliseconds of stored video per location inside one bucket.
///
/// `device_millis` is signed: a catch-up transfer against inconsistent
/// upstream bookkeeping can drive it below zero, and that is preserved
/// rather than corrected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct AggregateBucket {
    /// Camera device ID
    pub device_id: String,
    /// Bucket granularity
    pub granularity: Granularity,
    /// Bucket start (epoch millis)
    pub bucket_start_millis: i64,
    /// Milliseconds stored in the cloud
    pub cloud_millis: i64,
    /// Milliseconds stored on the device only
    pub device_millis: i64,
    /// TTL (epoch seconds)
    pub expiration_epoch_seconds: i64,
}

impl AggregateBucket {
    /// Create a zero-valued bucket with its expiration set.
    pub fn empty(key: BucketKey) -> Self {
        let bucket_end = key.granularity.bucket_end(key.bucket_start_millis);
        Self {
            device_id: key.device_id,
            granularity: key.granularity,
            bucket_start_millis: key.bucket_start_millis,
            cloud_millis: 0,
            device_millis: 0,
            expiration_epoch_seconds: bucket_end / 1000 + AGGREGATE_TTL_SECS,
        }
    }

    pub fn key(&self) -> BucketKey {
        BucketKey::new(self.device_id.clone(), self.granularity, self.bucket_start_millis)
    }

    pub fn bucket_end_millis(&self) -> i64 {
        self.granularity.bucket_end(self.bucket_start_millis)
    }

    /// Count `millis` of new video against `location`.
    pub fn add(&mut self, location: VideoLocation, millis: i64) {
        match location {
            VideoLocation::Cloud => self.cloud_millis += millis,
            VideoLocation::Device => self.device_millis += millis,
        }
    }

    /// Move `millis` from the device accumulator to the cloud accumulator.
    ///
    /// Returns `true` if the device accumulator is negative afterwards.
    pub fn transfer_device_to_cloud(&mut self, millis: i64) -> bool {
        self.device_millis -= millis;
        self.cloud_millis += millis;
        self.device_millis < 0
    }
}
