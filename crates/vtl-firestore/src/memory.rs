//! In-memory store for tests and local runs.
//!
//! Implements both store traits with the same ordering, range and paging
//! semantics as the Firestore repositories. Versions are a per-store
//! counter.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use vtl_models::{AggregateBucket, BucketKey, Granularity, RawInterval, RawIntervalKey};

use crate::error::{FirestoreError, FirestoreResult};
use crate::paging::{paginate, DEFAULT_PAGE_SIZE};
use crate::store::{AggregateStore, Page, RawIntervalStore, Versioned};

type AggregateKey = (String, Granularity, i64);

#[derive(Debug)]
pub struct MemoryStore {
    raw: RwLock<BTreeMap<(String, i64), RawInterval>>,
    aggregates: RwLock<BTreeMap<AggregateKey, (AggregateBucket, String)>>,
    page_size: usize,
    next_version: AtomicU64,
    unavailable: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE)
    }

    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            raw: RwLock::new(BTreeMap::new()),
            aggregates: RwLock::new(BTreeMap::new()),
            page_size: page_size.max(1),
            next_version: AtomicU64::new(1),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Make every subsequent operation fail with a 503 until cleared.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Current value of a bucket, without its version.
    pub async fn aggregate(&self, key: &BucketKey) -> Option<AggregateBucket> {
        self.aggregates
            .read()
            .await
            .get(&aggregate_key(key))
            .map(|(bucket, _)| bucket.clone())
    }

    /// All stored buckets in key order.
    pub async fn aggregates(&self) -> Vec<AggregateBucket> {
        self.aggregates
            .read()
            .await
            .values()
            .map(|(bucket, _)| bucket.clone())
            .collect()
    }

    fn check_available(&self) -> FirestoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(FirestoreError::ServerError(503, "memory store unavailable".to_string()));
        }
        Ok(())
    }

    fn bump_version(&self) -> String {
        self.next_version.fetch_add(1, Ordering::SeqCst).to_string()
    }
}

fn aggregate_key(key: &BucketKey) -> AggregateKey {
    (key.device_id.clone(), key.granularity, key.bucket_start_millis)
}

#[async_trait]
impl RawIntervalStore for MemoryStore {
    async fn save(&self, interval: &RawInterval) -> FirestoreResult<()> {
        self.check_available()?;
        self.raw.write().await.insert(
            (interval.device_id.clone(), interval.start_millis),
            interval.clone(),
        );
        Ok(())
    }

    async fn load(&self, key: &RawIntervalKey) -> FirestoreResult<Option<RawInterval>> {
        self.check_available()?;
        Ok(self
            .raw
            .read()
            .await
            .get(&(key.device_id.clone(), key.start_millis))
            .cloned())
    }

    async fn list_range(
        &self,
        device_id: &str,
        start_millis: i64,
        end_millis: i64,
        page_token: Option<&str>,
    ) -> FirestoreResult<Page<RawInterval>> {
        self.check_available()?;
        let raw = self.raw.read().await;
        paginate(
            raw.values().filter(|i| i.device_id == device_id).cloned(),
            |i| i.start_millis,
            start_millis,
            end_millis,
            page_token,
            self.page_size,
        )
    }
}

#[async_trait]
impl AggregateStore for MemoryStore {
    async fn load(&self, key: &BucketKey) -> FirestoreResult<Option<Versioned<AggregateBucket>>> {
        self.check_available()?;
        Ok(self
            .aggregates
            .read()
            .await
            .get(&aggregate_key(key))
            .map(|(bucket, version)| Versioned {
                value: bucket.clone(),
                version: Some(version.clone()),
            }))
    }

    async fn save(&self, bucket: &AggregateBucket) -> FirestoreResult<()> {
        self.check_available()?;
        let version = self.bump_version();
        self.aggregates
            .write()
            .await
            .insert(aggregate_key(&bucket.key()), (bucket.clone(), version));
        Ok(())
    }

    async fn save_conditional(
        &self,
        bucket: &AggregateBucket,
        expected_version: Option<&str>,
    ) -> FirestoreResult<String> {
        self.check_available()?;
        let key = aggregate_key(&bucket.key());
        let mut aggregates = self.aggregates.write().await;

        let current = aggregates.get(&key).map(|(_, version)| version.as_str());
        match (current, expected_version) {
            (None, None) => {}
            (Some(current), Some(expected)) if current == expected => {}
            (Some(_), None) => {
                return Err(FirestoreError::AlreadyExists(bucket.key().to_string()));
            }
            _ => {
                return Err(FirestoreError::PreconditionFailed(bucket.key().to_string()));
            }
        }

        let version = self.bump_version();
        aggregates.insert(key, (bucket.clone(), version.clone()));
        Ok(version)
    }

    async fn list_range(
        &self,
        device_id: &str,
        granularity: Granularity,
        start_millis: i64,
        end_millis: i64,
        page_token: Option<&str>,
    ) -> FirestoreResult<Page<AggregateBucket>> {
        self.check_available()?;
        let aggregates = self.aggregates.read().await;
        paginate(
            aggregates
                .values()
                .map(|(bucket, _)| bucket)
                .filter(|b| b.device_id == device_id && b.granularity == granularity)
                .cloned(),
            |b| b.bucket_start_millis,
            start_millis,
            end_millis,
            page_token,
            self.page_size,
        )
    }
}
