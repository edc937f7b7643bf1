//! Raw video intervals as reported by devices.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::location::VideoLocation;

/// Identity of a raw interval: partition key (device) and sort key (start).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct RawIntervalKey {
    pub device_id: String,
    pub start_millis: i64,
}

impl RawIntervalKey {
    pub fn new(device_id: impl Into<String>, start_millis: i64) -> Self {
        Self {
            device_id: device_id.into(),
            start_millis,
        }
    }
}

impl fmt::Display for RawIntervalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.device_id, self.start_millis)
    }
}

/// One fragment of captured video.
///
/// Immutable except for `location`, which moves from DEVICE to CLOUD once
/// the fragment finishes uploading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RawInterval {
    /// Camera device ID
    pub device_id: String,
    /// Start of the fragment (epoch millis)
    pub start_millis: i64,
    /// Fragment length in milliseconds
    pub duration_millis: i64,
    /// Current storage location
    pub location: VideoLocation,
}

impl RawInterval {
    pub fn new(
        device_id: impl Into<String>,
        start_millis: i64,
        duration_millis: i64,
        location: VideoLocation,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            start_millis,
            duration_millis,
            location,
        }
    }

    /// Exclusive end of the fragment.
    pub fn end_millis(&self) -> i64 {
        self.start_millis + self.duration_millis
    }

    pub fn key(&self) -> RawIntervalKey {
        RawIntervalKey::new(self.device_id.clone(), self.start_millis)
    }
}
