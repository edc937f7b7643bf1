//! Query surfaces over the aggregate and raw-interval stores.

use std::sync::Arc;

use tracing::{debug, instrument};
use validator::{Validate, ValidationError};

use vtl_firestore::{AggregateStore, RawIntervalStore};
use vtl_models::{DensityPage, DetailedTimeline, Granularity};

use crate::detailed::DetailedTimelineGenerator;
use crate::error::TimelineResult;
use crate::list_generator::{generate_density, period_count, MAX_DENSITY_PERIODS};

/// Density request: `increment` periods of `unit` over `[start, end)`.
#[derive(Debug, Clone, Validate)]
#[validate(schema(function = "validate_density_query"))]
pub struct DensityQuery {
    #[validate(length(min = 1, message = "device id is required"))]
    pub device_id: String,
    pub start_time: i64,
    pub end_time: i64,
    /// Period length in units of `unit`
    #[validate(range(min = 1, message = "increment must be positive"))]
    pub increment: i64,
    pub unit: Granularity,
    pub page_token: Option<String>,
}

impl DensityQuery {
    /// Period length in milliseconds.
    pub fn increment_millis(&self) -> i64 {
        self.increment.saturating_mul(self.unit.unit_millis())
    }
}

fn validate_density_query(query: &DensityQuery) -> Result<(), ValidationError> {
    if query.end_time <= query.start_time {
        return Err(ValidationError::new("window").with_message("end must be after start".into()));
    }
    // Density below one bucket is not modeled.
    if query.increment_millis() < query.unit.bucket_millis() {
        return Err(ValidationError::new("increment")
            .with_message(format!("increment must cover at least one {} bucket", query.unit).into()));
    }
    match period_count(query.start_time, query.end_time, query.increment_millis()) {
        Some(count) if count <= MAX_DENSITY_PERIODS => Ok(()),
        _ => Err(ValidationError::new("window")
            .with_message(format!("window must span at most {} periods", MAX_DENSITY_PERIODS).into())),
    }
}

/// Detailed timeline request over `[start, end]`.
#[derive(Debug, Clone, Validate)]
#[validate(schema(function = "validate_detailed_query"))]
pub struct DetailedQuery {
    #[validate(length(min = 1, message = "device id is required"))]
    pub device_id: String,
    pub start_time: i64,
    pub end_time: i64,
    pub page_token: Option<String>,
}

fn validate_detailed_query(query: &DetailedQuery) -> Result<(), ValidationError> {
    if query.end_time <= query.start_time {
        return Err(ValidationError::new("window").with_message("end must be after start".into()));
    }
    Ok(())
}

/// The two read paths exposed to the API layer.
pub struct TimelineQueryService {
    aggregates: Arc<dyn AggregateStore>,
    detailed: DetailedTimelineGenerator,
}

impl TimelineQueryService {
    pub fn new(raw: Arc<dyn RawIntervalStore>, aggregates: Arc<dyn AggregateStore>) -> Self {
        Self {
            aggregates,
            detailed: DetailedTimelineGenerator::new(raw),
        }
    }

    /// One page of aggregate buckets turned into density periods.
    #[instrument(skip(self, query), fields(device_id = %query.device_id, unit = %query.unit))]
    pub async fn list_density(&self, query: &DensityQuery) -> TimelineResult<DensityPage> {
        query.validate()?;

        let page = self
            .aggregates
            .list_range(
                &query.device_id,
                query.unit,
                query.start_time,
                query.end_time,
                query.page_token.as_deref(),
            )
            .await?;

        debug!(buckets = page.items.len(), "Loaded aggregate buckets");

        Ok(DensityPage {
            periods: generate_density(
                &page.items,
                query.start_time,
                query.end_time,
                query.increment_millis(),
            ),
            next_page_token: page.next_page_token,
        })
    }

    #[instrument(skip(self, query), fields(device_id = %query.device_id))]
    pub async fn list_detailed_timeline(&self, query: &DetailedQuery) -> TimelineResult<DetailedTimeline> {
        query.validate()?;

        self.detailed
            .generate(
                &query.device_id,
                query.start_time,
                query.end_time,
                query.page_token.as_deref(),
            )
            .await
    }
}
