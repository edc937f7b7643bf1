//! Splitting raw intervals across aggregate buckets.
//!
//! The walk starts at the bucket containing the interval start and hands
//! each bucket the part of the interval it covers, so the shares of one
//! interval never overlap and always add up to its duration.

use vtl_models::{BucketContribution, Granularity, RawInterval, VideoLocation};

/// One bucket's share of an interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedBucket {
    pub bucket_start_millis: i64,
    /// First millisecond of the interval inside this bucket
    pub timestamp_millis: i64,
    pub duration_millis: i64,
}

/// Bucket shares of `[start, start + duration)` at one granularity, in
/// ascending bucket order. Empty for a non-positive duration.
pub fn plan(granularity: Granularity, start_millis: i64, duration_millis: i64) -> Vec<PlannedBucket> {
    let mut planned = Vec::new();
    if duration_millis <= 0 {
        return planned;
    }

    let bucket_millis = granularity.bucket_millis();
    let range_end = granularity.floor(start_millis + duration_millis);

    let mut bucket_start = granularity.floor(start_millis);
    let mut cursor = start_millis;
    let mut remaining = duration_millis;

    while remaining > 0 && bucket_start <= range_end {
        let bucket_end = bucket_start + bucket_millis;
        let share = (bucket_end - cursor).min(remaining);

        planned.push(PlannedBucket {
            bucket_start_millis: bucket_start,
            timestamp_millis: cursor,
            duration_millis: share,
        });

        cursor += share;
        remaining -= share;
        bucket_start = bucket_end;
    }

    planned
}

/// Contributions of one interval for every granularity, finest first.
pub fn plan_contributions(
    interval: &RawInterval,
    location: VideoLocation,
    is_catchup: bool,
) -> Vec<BucketContribution> {
    Granularity::ALL
        .iter()
        .flat_map(|&granularity| {
            plan(granularity, interval.start_millis, interval.duration_millis)
                .into_iter()
                .map(move |bucket| BucketContribution {
                    device_id: interval.device_id.clone(),
                    granularity,
                    bucket_start_millis: bucket.bucket_start_millis,
                    timestamp_millis: bucket.timestamp_millis,
                    duration_millis: bucket.duration_millis,
                    location,
                    is_catchup,
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seconds_example_splits_at_boundary() {
        let planned = plan(Granularity::Seconds, 1_696_444_404_000, 4_000);

        assert_eq!(
            planned,
            vec![
                PlannedBucket {
                    bucket_start_millis: 1_696_444_400_000,
                    timestamp_millis: 1_696_444_404_000,
                    duration_millis: 1_000,
                },
                PlannedBucket {
                    bucket_start_millis: 1_696_444_405_000,
                    timestamp_millis: 1_696_444_405_000,
                    duration_millis: 3_000,
                },
            ]
        );
    }

    #[test]
    fn test_coverage_for_all_granularities() {
        let cases = [
            (0, 1),
            (1_696_444_404_000, 4_000),
            (1_696_444_399_999, 20_000),
            (1_696_444_400_000, 5_000),
            (86_399_000, 2_000),
            (1_696_400_000_000, 3 * 86_400_000 + 17),
            (-7_500, 10_000),
        ];

        for granularity in Granularity::ALL {
            for (start, duration) in cases {
                let total: i64 = plan(granularity, start, duration)
                    .iter()
                    .map(|b| b.duration_millis)
                    .sum();
                assert_eq!(total, duration, "{} start={} duration={}", granularity, start, duration);
            }
        }
    }

    #[test]
    fn test_output_is_ordered_aligned_and_bounded() {
        for granularity in Granularity::ALL {
            let planned = plan(granularity, 1_696_444_397_234, 3 * 3_600_000 + 4_321);

            for window in planned.windows(2) {
                assert!(window[0].bucket_start_millis < window[1].bucket_start_millis);
                assert!(window[0].timestamp_millis < window[1].timestamp_millis);
                assert_eq!(
                    window[0].timestamp_millis + window[0].duration_millis,
                    window[1].timestamp_millis
                );
            }
            for bucket in &planned {
                assert_eq!(bucket.bucket_start_millis % granularity.bucket_millis(), 0);
                assert!(bucket.duration_millis > 0);
                assert!(bucket.duration_millis <= granularity.bucket_millis());
            }
        }
    }

    #[test]
    fn test_interval_ending_on_boundary_has_no_empty_tail() {
        let planned = plan(Granularity::Seconds, 1_696_444_401_000, 4_000);
        assert_eq!(planned.len(), 1);
        assert_eq!(planned[0].duration_millis, 4_000);
    }

    #[test]
    fn test_non_positive_duration_plans_nothing() {
        assert!(plan(Granularity::Minutes, 60_000, 0).is_empty());
        assert!(plan(Granularity::Minutes, 60_000, -5).is_empty());
    }

    #[test]
    fn test_plan_contributions_covers_every_granularity() {
        let interval = RawInterval::new("cam-1", 1_696_444_404_000, 4_000, VideoLocation::Device);
        let contributions = plan_contributions(&interval, VideoLocation::Cloud, true);

        // Two SECONDS buckets, then one bucket each at the coarser levels.
        let units: Vec<Granularity> = contributions.iter().map(|c| c.granularity).collect();
        assert_eq!(
            units,
            vec![
                Granularity::Seconds,
                Granularity::Seconds,
                Granularity::Minutes,
                Granularity::Hours,
                Granularity::Days,
            ]
        );
        assert!(contributions.iter().all(|c| c.is_catchup));
        assert!(contributions.iter().all(|c| c.location == VideoLocation::Cloud));
        assert!(contributions.iter().all(|c| c.device_id == "cam-1"));
    }
}
