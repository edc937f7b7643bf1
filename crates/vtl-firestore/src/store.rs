//! Storage seams consumed by the pipeline.
//!
//! Implemented by the Firestore repositories and by [`crate::MemoryStore`].

use async_trait::async_trait;

use vtl_models::{AggregateBucket, BucketKey, Granularity, RawInterval, RawIntervalKey};

use crate::error::FirestoreResult;

/// One page of a range listing.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Opaque token for the next page, absent on the last page
    pub next_page_token: Option<String>,
}

impl<T> Page<T> {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            next_page_token: None,
        }
    }
}

/// A stored value together with the version it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub value: T,
    /// Store-assigned version, absent when the store does not track versions
    pub version: Option<String>,
}

/// Store of raw presence intervals keyed by `(device_id, start_millis)`.
#[async_trait]
pub trait RawIntervalStore: Send + Sync {
    /// Insert or fully overwrite an interval.
    async fn save(&self, interval: &RawInterval) -> FirestoreResult<()>;

    async fn load(&self, key: &RawIntervalKey) -> FirestoreResult<Option<RawInterval>>;

    /// Intervals of one device with `start <= start_millis < end`, ascending.
    async fn list_range(
        &self,
        device_id: &str,
        start_millis: i64,
        end_millis: i64,
        page_token: Option<&str>,
    ) -> FirestoreResult<Page<RawInterval>>;
}

/// Store of rolling aggregate buckets.
#[async_trait]
pub trait AggregateStore: Send + Sync {
    async fn load(&self, key: &BucketKey) -> FirestoreResult<Option<Versioned<AggregateBucket>>>;

    /// Full-record upsert.
    async fn save(&self, bucket: &AggregateBucket) -> FirestoreResult<()>;

    /// Write only if the stored version still equals `expected_version`.
    ///
    /// `None` means the bucket must not exist yet. A lost race surfaces as an
    /// error for which `is_precondition_failed()` holds. Returns the new
    /// version.
    async fn save_conditional(
        &self,
        bucket: &AggregateBucket,
        expected_version: Option<&str>,
    ) -> FirestoreResult<String>;

    /// Buckets of one device and granularity with
    /// `start <= bucket_start_millis < end`, ascending.
    async fn list_range(
        &self,
        device_id: &str,
        granularity: Granularity,
        start_millis: i64,
        end_millis: i64,
        page_token: Option<&str>,
    ) -> FirestoreResult<Page<AggregateBucket>>;
}
