//! Density periods from aggregate buckets.

use tracing::debug;

use vtl_models::{AggregateBucket, DensityPeriod};

/// Largest density list a single query may ask for.
pub const MAX_DENSITY_PERIODS: usize = 100_000;

/// Number of periods covering `[start, end)`, `None` when the window is
/// empty or its length does not fit in an `i64`.
pub fn period_count(start_millis: i64, end_millis: i64, increment_millis: i64) -> Option<usize> {
    if increment_millis <= 0 || end_millis <= start_millis {
        return None;
    }
    let span = end_millis.checked_sub(start_millis)?;
    let count = span / increment_millis + i64::from(span % increment_millis != 0);
    usize::try_from(count).ok()
}

/// Gap-filled density list for `[start, end)` in steps of `increment_millis`.
///
/// Each bucket is credited to the period containing its start. Negative
/// accumulators count as zero; densities above 1.0 are returned as is.
/// Buckets outside the window are skipped. Windows that are empty,
/// overflow, or exceed [`MAX_DENSITY_PERIODS`] yield an empty list.
pub fn generate_density(
    buckets: &[AggregateBucket],
    start_millis: i64,
    end_millis: i64,
    increment_millis: i64,
) -> Vec<DensityPeriod> {
    let len = match period_count(start_millis, end_millis, increment_millis) {
        Some(len) if len <= MAX_DENSITY_PERIODS => len,
        _ => return Vec::new(),
    };
    let mut periods = vec![DensityPeriod::default(); len];
    let increment = increment_millis as f64;

    for bucket in buckets {
        let index = bucket
            .bucket_start_millis
            .checked_sub(start_millis)
            .map(|offset| offset.div_euclid(increment_millis));
        let Some(period) = index
            .and_then(|i| usize::try_from(i).ok())
            .and_then(|i| periods.get_mut(i))
        else {
            debug!(
                device_id = %bucket.device_id,
                bucket_start = bucket.bucket_start_millis,
                "Bucket outside requested window, skipping"
            );
            continue;
        };

        period.cloud_density += bucket.cloud_millis.max(0) as f64 / increment;
        period.device_density += bucket.device_millis.max(0) as f64 / increment;
    }

    periods
}

#[cfg(test)]
mod tests {
    use super::*;
    use vtl_models::{BucketKey, Granularity};

    fn bucket(granularity: Granularity, start: i64, cloud: i64, device: i64) -> AggregateBucket {
        let mut bucket = AggregateBucket::empty(BucketKey::new("cam-1", granularity, start));
        bucket.cloud_millis = cloud;
        bucket.device_millis = device;
        bucket
    }

    #[test]
    fn test_length_rounds_up() {
        assert_eq!(generate_density(&[], 0, 60_000, 60_000).len(), 1);
        assert_eq!(generate_density(&[], 0, 60_001, 60_000).len(), 2);
        assert_eq!(generate_density(&[], 0, 300_000, 60_000).len(), 5);
    }

    #[test]
    fn test_gaps_are_zero_filled() {
        let buckets = [bucket(Granularity::Minutes, 120_000, 30_000, 15_000)];
        let periods = generate_density(&buckets, 0, 240_000, 60_000);

        assert_eq!(periods[0], DensityPeriod::default());
        assert_eq!(periods[1], DensityPeriod::default());
        assert_eq!(
            periods[2],
            DensityPeriod {
                cloud_density: 0.5,
                device_density: 0.25,
            }
        );
        assert_eq!(periods[3], DensityPeriod::default());
    }

    #[test]
    fn test_buckets_in_same_period_are_summed() {
        let buckets = [
            bucket(Granularity::Seconds, 0, 5_000, 0),
            bucket(Granularity::Seconds, 5_000, 2_500, 1_000),
            bucket(Granularity::Seconds, 10_000, 0, 4_000),
        ];
        let periods = generate_density(&buckets, 0, 20_000, 10_000);

        assert_eq!(periods.len(), 2);
        assert_eq!(periods[0].cloud_density, 0.75);
        assert_eq!(periods[0].device_density, 0.1);
        assert_eq!(periods[1].device_density, 0.4);
    }

    #[test]
    fn test_negative_accumulators_count_as_zero() {
        let buckets = [bucket(Granularity::Minutes, 0, 90_000, -2_000)];
        let periods = generate_density(&buckets, 0, 60_000, 60_000);

        assert_eq!(periods[0].device_density, 0.0);
        // Inconsistent upstream counters surface as density above one.
        assert_eq!(periods[0].cloud_density, 1.5);
    }

    #[test]
    fn test_out_of_window_buckets_are_skipped() {
        let buckets = [
            bucket(Granularity::Minutes, -60_000, 60_000, 0),
            bucket(Granularity::Minutes, 600_000, 60_000, 0),
        ];
        let periods = generate_density(&buckets, 0, 120_000, 60_000);
        assert!(periods.iter().all(|p| *p == DensityPeriod::default()));
    }

    #[test]
    fn test_is_pure() {
        let buckets = [
            bucket(Granularity::Hours, 0, 1_800_000, 600_000),
            bucket(Granularity::Hours, 3_600_000, 3_600_000, 0),
        ];
        let first = generate_density(&buckets, 0, 7_200_000, 3_600_000);
        let second = generate_density(&buckets, 0, 7_200_000, 3_600_000);
        assert_eq!(first, second);
    }

    #[test]
    fn test_degenerate_window_is_empty() {
        assert!(generate_density(&[], 10, 10, 1_000).is_empty());
        assert!(generate_density(&[], 0, 10, 0).is_empty());
    }

    #[test]
    fn test_period_count() {
        assert_eq!(period_count(0, 60_001, 60_000), Some(2));
        assert_eq!(period_count(-1, i64::MAX, 60_000), None);
        assert_eq!(period_count(i64::MIN, 0, 1), None);
        assert_eq!(period_count(10, 10, 1_000), None);
    }

    #[test]
    fn test_oversized_window_is_empty() {
        let buckets = [bucket(Granularity::Minutes, 0, 60_000, 0)];
        assert!(generate_density(&buckets, -1, i64::MAX, 60_000).is_empty());
        assert!(generate_density(&buckets, 0, 60_000 * (MAX_DENSITY_PERIODS as i64 + 1), 60_000).is_empty());
    }

    #[test]
    fn test_far_bucket_does_not_overflow() {
        let buckets = [bucket(Granularity::Minutes, i64::MIN + 1, 60_000, 0)];
        let periods = generate_density(&buckets, 60_000, 180_000, 60_000);
        assert_eq!(periods, vec![DensityPeriod::default(); 2]);
    }
}
