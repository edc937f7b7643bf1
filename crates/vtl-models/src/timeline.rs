//! Computed timeline views returned by the query surfaces.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A maximal run of contiguous presence at one location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DetailedSegment {
    pub start_time: i64,
    pub end_time: i64,
}

impl DetailedSegment {
    pub fn new(start_time: i64, end_time: i64) -> Self {
        Self { start_time, end_time }
    }
}

/// Fraction of one requested period covered by stored video.
///
/// Values above 1.0 are possible when upstream counters are inconsistent.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DensityPeriod {
    pub cloud_density: f64,
    pub device_density: f64,
}

/// One page of density periods.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DensityPage {
    pub periods: Vec<DensityPeriod>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
}

/// Merged presence intervals for a bounded window.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DetailedTimeline {
    pub cloud: Vec<DetailedSegment>,
    pub device: Vec<DetailedSegment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
}
