//! Prometheus metrics for the pipeline worker.

use std::net::SocketAddr;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use vtl_models::{BucketContribution, Granularity};

use crate::error::{WorkerError, WorkerResult};

/// Install the Prometheus recorder and its scrape endpoint on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> WorkerResult<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| WorkerError::config_error(format!("metrics exporter on {}: {}", addr, e)))
}

/// Metric names as constants for consistency.
pub mod names {
    // Relay
    pub const CHANGE_EVENTS_TOTAL: &str = "vtl_change_events_total";
    pub const CONTRIBUTIONS_EMITTED_TOTAL: &str = "vtl_contributions_emitted_total";
    pub const RELAY_MISSING_INTERVAL_TOTAL: &str = "vtl_relay_missing_interval_total";

    // Updater
    pub const CONTRIBUTIONS_APPLIED_TOTAL: &str = "vtl_contributions_applied_total";
    pub const AGGREGATE_NEGATIVE_DEVICE_TOTAL: &str = "vtl_aggregate_negative_device_total";
    pub const AGGREGATE_WRITE_CONFLICTS_TOTAL: &str = "vtl_aggregate_write_conflicts_total";

    // Executor
    pub const BATCHES_TOTAL: &str = "vtl_batches_total";
    pub const BATCH_DURATION_SECONDS: &str = "vtl_batch_duration_seconds";
    pub const DEAD_LETTERED_TOTAL: &str = "vtl_dead_lettered_total";
}

/// Record a classified change record (`ingestion`, `correction` or `ignored`).
pub fn record_change_event(kind: &'static str) {
    counter!(names::CHANGE_EVENTS_TOTAL, "kind" => kind).increment(1);
}

/// Record contributions published for one change record.
pub fn record_contributions_emitted(contributions: &[BucketContribution]) {
    for granularity in Granularity::ALL {
        let count = contributions
            .iter()
            .filter(|c| c.granularity == granularity)
            .count();
        if count > 0 {
            counter!(names::CONTRIBUTIONS_EMITTED_TOTAL, "granularity" => granularity.as_str())
                .increment(count as u64);
        }
    }
}

pub fn record_missing_interval() {
    counter!(names::RELAY_MISSING_INTERVAL_TOTAL).increment(1);
}

/// Record a contribution folded into its bucket.
pub fn record_contribution_applied(contribution: &BucketContribution) {
    let labels = [
        ("granularity", contribution.granularity.as_str().to_string()),
        ("catchup", contribution.is_catchup.to_string()),
    ];
    counter!(names::CONTRIBUTIONS_APPLIED_TOTAL, &labels).increment(1);
}

pub fn record_negative_device(granularity: Granularity) {
    counter!(names::AGGREGATE_NEGATIVE_DEVICE_TOTAL, "granularity" => granularity.as_str()).increment(1);
}

pub fn record_write_conflict() {
    counter!(names::AGGREGATE_WRITE_CONFLICTS_TOTAL).increment(1);
}

/// Record a finished batch.
pub fn record_batch(role: &str, status: &str, duration_secs: f64) {
    let labels = [("role", role.to_string()), ("status", status.to_string())];
    counter!(names::BATCHES_TOTAL, &labels).increment(1);

    let labels = [("role", role.to_string())];
    histogram!(names::BATCH_DURATION_SECONDS, &labels).record(duration_secs);
}

pub fn record_dead_lettered(role: &str) {
    let labels = [("role", role.to_string())];
    counter!(names::DEAD_LETTERED_TOTAL, &labels).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};
    use vtl_models::VideoLocation;

    fn contribution(granularity: Granularity) -> BucketContribution {
        BucketContribution {
            device_id: "cam-1".to_string(),
            granularity,
            bucket_start_millis: 0,
            timestamp_millis: 0,
            duration_millis: 1_000,
            location: VideoLocation::Device,
            is_catchup: false,
        }
    }

    #[test]
    fn test_emitted_contributions_counted_per_granularity() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        ::metrics::with_local_recorder(&recorder, || {
            record_contributions_emitted(&[
                contribution(Granularity::Seconds),
                contribution(Granularity::Seconds),
                contribution(Granularity::Hours),
            ]);
        });

        let mut counts: Vec<(String, u64)> = snapshotter
            .snapshot()
            .into_vec()
            .into_iter()
            .filter(|(key, ..)| key.key().name() == names::CONTRIBUTIONS_EMITTED_TOTAL)
            .filter_map(|(key, _, _, value)| {
                let granularity = key.key().labels().find(|l| l.key() == "granularity")?;
                match value {
                    DebugValue::Counter(count) => Some((granularity.value().to_string(), count)),
                    _ => None,
                }
            })
            .collect();
        counts.sort();

        assert_eq!(
            counts,
            vec![("HOURS".to_string(), 1), ("SECONDS".to_string(), 2)]
        );
    }
}
