//! Shared data models for the video timeline pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Raw video intervals and their storage location
//! - Time granularities and bucket arithmetic
//! - Bucket contributions exchanged over the contribution queue
//! - Persisted aggregate buckets
//! - Change-feed records and their classification
//! - Computed timeline views (density periods, detailed segments)

pub mod aggregate;
pub mod change_feed;
pub mod contribution;
pub mod error;
pub mod granularity;
pub mod interval;
pub mod location;
pub mod timeline;

// Re-export common types
pub use aggregate::{AggregateBucket, BucketKey, AGGREGATE_TTL_SECS};
pub use change_feed::{ChangeEventType, ChangeFeedRecord, IgnoreReason, NewImage, OldImage, StreamEvent};
pub use contribution::BucketContribution;
pub use error::{ModelError, ModelResult};
pub use granularity::Granularity;
pub use interval::{RawInterval, RawIntervalKey};
pub use location::VideoLocation;
pub use timeline::{DensityPage, DensityPeriod, DetailedSegment, DetailedTimeline};
