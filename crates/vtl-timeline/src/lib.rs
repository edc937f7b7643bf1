//! Timeline computations for the video timeline pipeline.
//!
//! This crate provides:
//! - Bucket planning: splitting a raw interval across aligned buckets
//! - The density list generator over persisted aggregate buckets
//! - The detailed timeline generator stitching raw intervals
//! - The query service exposing both read paths with request validation

pub mod bucket_planner;
pub mod detailed;
pub mod error;
pub mod list_generator;
pub mod query;

pub use bucket_planner::{plan, plan_contributions, PlannedBucket};
pub use detailed::{DetailedTimelineGenerator, LOOKBACK_BUFFER_MILLIS};
pub use error::{TimelineError, TimelineResult};
pub use list_generator::{generate_density, period_count, MAX_DENSITY_PERIODS};
pub use query::{DensityQuery, DetailedQuery, TimelineQueryService};
