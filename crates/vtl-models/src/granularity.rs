//! Time granularities and bucket arithmetic.
//!
//! Every granularity owns a fixed wall-clock bucket size. Buckets are
//! aligned to the Unix epoch, so `floor` and `ceil` are plain modular
//! arithmetic on epoch milliseconds (UTC, no calendar or DST handling).

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ModelError;

/// Resolution at which video density is aggregated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Granularity {
    /// 5 second buckets
    Seconds,
    /// 1 minute buckets
    Minutes,
    /// 1 hour buckets
    Hours,
    /// 1 day buckets
    Days,
}

impl Granularity {
    /// All granularities, finest first.
    pub const ALL: [Granularity; 4] = [
        Granularity::Seconds,
        Granularity::Minutes,
        Granularity::Hours,
        Granularity::Days,
    ];

    /// Duration of one unit of this granularity in milliseconds.
    pub const fn unit_millis(&self) -> i64 {
        match self {
            Granularity::Seconds => 1_000,
            Granularity::Minutes => 60_000,
            Granularity::Hours => 3_600_000,
            Granularity::Days => 86_400_000,
        }
    }

    /// Number of units per bucket.
    pub const fn step(&self) -> i64 {
        match self {
            Granularity::Seconds => 5,
            _ => 1,
        }
    }

    /// Bucket duration in milliseconds.
    pub const fn bucket_millis(&self) -> i64 {
        self.unit_millis() * self.step()
    }

    /// Start of the bucket containing `timestamp_millis`.
    pub fn floor(&self, timestamp_millis: i64) -> i64 {
        timestamp_millis - timestamp_millis.rem_euclid(self.bucket_millis())
    }

    /// Smallest bucket boundary at or after `timestamp_millis`.
    pub fn ceil(&self, timestamp_millis: i64) -> i64 {
        let floored = self.floor(timestamp_millis);
        if floored == timestamp_millis {
            floored
        } else {
            floored + self.bucket_millis()
        }
    }

    /// Exclusive end of the bucket starting at `bucket_start_millis`.
    pub fn bucket_end(&self, bucket_start_millis: i64) -> i64 {
        bucket_start_millis + self.bucket_millis()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Seconds => "SECONDS",
            Granularity::Minutes => "MINUTES",
            Granularity::Hours => "HOURS",
            Granularity::Days => "DAYS",
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Granularity {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SECONDS" => Ok(Granularity::Seconds),
            "MINUTES" => Ok(Granularity::Minutes),
            "HOURS" => Ok(Granularity::Hours),
            "DAYS" => Ok(Granularity::Days),
            _ => Err(ModelError::UnknownGranularity(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_durations() {
        assert_eq!(Granularity::Seconds.bucket_millis(), 5_000);
        assert_eq!(Granularity::Minutes.bucket_millis(), 60_000);
        assert_eq!(Granularity::Hours.bucket_millis(), 3_600_000);
        assert_eq!(Granularity::Days.bucket_millis(), 86_400_000);
    }

    #[test]
    fn test_floor_aligns_to_bucket() {
        let ts = 1_696_444_404_000;
        assert_eq!(Granularity::Seconds.floor(ts), 1_696_444_400_000);
        assert_eq!(Granularity::Minutes.floor(ts), 1_696_444_380_000);
        assert_eq!(Granularity::Hours.floor(ts), 1_696_442_400_000);
        assert_eq!(Granularity::Days.floor(ts), 1_696_377_600_000);
    }

    #[test]
    fn test_floor_is_identity_on_boundaries() {
        for g in Granularity::ALL {
            let boundary = g.bucket_millis() * 1_000;
            assert_eq!(g.floor(boundary), boundary);
            assert_eq!(g.ceil(boundary), boundary);
        }
    }

    #[test]
    fn test_ceil_rounds_up() {
        assert_eq!(Granularity::Seconds.ceil(1_696_444_401_234), 1_696_444_405_000);
        assert_eq!(Granularity::Minutes.ceil(61_000), 120_000);
    }

    #[test]
    fn test_floor_negative_timestamps() {
        assert_eq!(Granularity::Seconds.floor(-1), -5_000);
        assert_eq!(Granularity::Seconds.ceil(-1), 0);
    }

    #[test]
    fn test_parse_and_display() {
        for g in Granularity::ALL {
            assert_eq!(g.to_string().parse::<Granularity>().unwrap(), g);
        }
        assert_eq!("minutes".parse::<Granularity>().unwrap(), Granularity::Minutes);
        assert!("WEEKS".parse::<Granularity>().is_err());
    }

    #[test]
    fn test_serde_uses_wire_names() {
        let json = serde_json::to_string(&Granularity::Hours).unwrap();
        assert_eq!(json, "\"HOURS\"");
    }
}
