//! Detailed timeline: raw intervals stitched into segments.
//!
//! Reads raw intervals directly, never the aggregates. Intervals that start
//! before the window but reach into it are found by looking back one
//! maximum fragment length before the window start.

use std::sync::Arc;

use tracing::debug;

use vtl_firestore::RawIntervalStore;
use vtl_models::{DetailedSegment, DetailedTimeline, RawInterval, VideoLocation};

use crate::error::TimelineResult;

/// Longest raw fragment a device produces.
pub const LOOKBACK_BUFFER_MILLIS: i64 = 20_000;

pub struct DetailedTimelineGenerator {
    store: Arc<dyn RawIntervalStore>,
}

impl DetailedTimelineGenerator {
    pub fn new(store: Arc<dyn RawIntervalStore>) -> Self {
        Self { store }
    }

    /// One page of merged CLOUD and DEVICE segments clipped to
    /// `[start, end]`. The store's next page token is returned unchanged.
    pub async fn generate(
        &self,
        device_id: &str,
        start_millis: i64,
        end_millis: i64,
        page_token: Option<&str>,
    ) -> TimelineResult<DetailedTimeline> {
        let page = self
            .store
            .list_range(
                device_id,
                start_millis.saturating_sub(LOOKBACK_BUFFER_MILLIS),
                end_millis,
                page_token,
            )
            .await?;

        debug!(
            device_id = %device_id,
            intervals = page.items.len(),
            has_more = page.next_page_token.is_some(),
            "Loaded raw intervals for detailed timeline"
        );

        let mut timeline = stitch(&page.items, start_millis, end_millis);
        timeline.next_page_token = page.next_page_token;
        Ok(timeline)
    }
}

/// Clip and merge intervals ordered by start time.
pub fn stitch(intervals: &[RawInterval], start_millis: i64, end_millis: i64) -> DetailedTimeline {
    let mut timeline = DetailedTimeline::default();

    for interval in intervals {
        let segment_end = interval.end_millis().min(end_millis);
        if segment_end <= start_millis {
            continue;
        }
        let segment_start = interval.start_millis.max(start_millis);

        let segments = match interval.location {
            VideoLocation::Cloud => &mut timeline.cloud,
            VideoLocation::Device => &mut timeline.device,
        };
        append_or_merge(segments, DetailedSegment::new(segment_start, segment_end));
    }

    timeline
}

/// Extend the last segment when the new one starts within a second of its
/// end, at whole-second resolution.
fn append_or_merge(segments: &mut Vec<DetailedSegment>, segment: DetailedSegment) {
    if let Some(last) = segments.last_mut() {
        let gap_secs = segment.start_time.div_euclid(1000) - last.end_time.div_euclid(1000);
        if gap_secs <= 1 {
            last.end_time = last.end_time.max(segment.end_time);
            return;
        }
    }
    segments.push(segment);
}
