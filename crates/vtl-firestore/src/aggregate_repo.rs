//! Aggregate bucket repository.
//!
//! One document per bucket, id `{device_id}#{UNIT}#{bucket_start}`. The
//! document `updateTime` doubles as the version for conditional writes, and
//! `expiration` is a timestamp field so a Firestore TTL policy can reap old
//! buckets.

use std::collections::HashMap;
use std::str::FromStr;

use async_trait::async_trait;
use tracing::debug;

use vtl_models::{AggregateBucket, BucketKey, Granularity};

use crate::client::FirestoreClient;
use crate::error::{FirestoreError, FirestoreResult};
use crate::metrics::record_query_documents;
use crate::paging::{next_token, range_query};
use crate::store::{AggregateStore, Page, Versioned};
use crate::types::{timestamp_from_epoch_seconds, Document, ToFirestoreValue, Value};

const FIELD_DEVICE_ID: &str = "device_id";
const FIELD_UNITS: &str = "time_increment_units";
const FIELD_BUCKET_START: &str = "bucket_start_time";
const FIELD_CLOUD: &str = "cloud_millis";
const FIELD_DEVICE: &str = "device_millis";
const FIELD_EXPIRATION: &str = "expiration";
const FIELD_EXPIRATION_SECS: &str = "expiration_epoch_seconds";

/// Firestore-backed [`AggregateStore`].
pub struct AggregateRepository {
    client: FirestoreClient,
    collection: String,
    page_size: usize,
}

impl AggregateRepository {
    pub fn new(client: FirestoreClient) -> Self {
        let collection = client.config().aggregate_collection.clone();
        let page_size = client.config().page_size;
        Self {
            client,
            collection,
            page_size,
        }
    }
}

#[async_trait]
impl AggregateStore for AggregateRepository {
    async fn load(&self, key: &BucketKey) -> FirestoreResult<Option<Versioned<AggregateBucket>>> {
        let Some(doc) = self
            .client
            .get_document(&self.collection, &key.to_string())
            .await?
        else {
            return Ok(None);
        };

        Ok(Some(Versioned {
            value: document_to_bucket(&doc)?,
            version: doc.update_time.clone(),
        }))
    }

    async fn save(&self, bucket: &AggregateBucket) -> FirestoreResult<()> {
        self.client
            .set_document(&self.collection, &bucket.key().to_string(), bucket_to_fields(bucket))
            .await?;
        Ok(())
    }

    async fn save_conditional(
        &self,
        bucket: &AggregateBucket,
        expected_version: Option<&str>,
    ) -> FirestoreResult<String> {
        let doc_id = bucket.key().to_string();
        let fields = bucket_to_fields(bucket);

        let doc = match expected_version {
            None => {
                self.client
                    .create_document(&self.collection, &doc_id, fields)
                    .await?
            }
            Some(version) => {
                self.client
                    .update_document_with_precondition(&self.collection, &doc_id, fields, version)
                    .await?
            }
        };

        debug!(doc_id = %doc_id, "Conditionally wrote aggregate bucket");

        doc.update_time
            .or(doc.create_time)
            .ok_or_else(|| FirestoreError::invalid_response(format!("{} written without updateTime", doc_id)))
    }

    async fn list_range(
        &self,
        device_id: &str,
        granularity: Granularity,
        start_millis: i64,
        end_millis: i64,
        page_token: Option<&str>,
    ) -> FirestoreResult<Page<AggregateBucket>> {
        let query = range_query(
            &self.collection,
            vec![
                (FIELD_DEVICE_ID, device_id.to_firestore_value()),
                (FIELD_UNITS, granularity.as_str().to_firestore_value()),
            ],
            FIELD_BUCKET_START,
            start_millis,
            end_millis,
            page_token,
            self.page_size,
        )?;

        let items = self
            .client
            .run_query(query)
            .await?
            .iter()
            .map(document_to_bucket)
            .collect::<FirestoreResult<Vec<_>>>()?;

        record_query_documents(&self.collection, items.len());
        let next_page_token = next_token(&items, self.page_size, |b| b.bucket_start_millis);
        Ok(Page {
            items,
            next_page_token,
        })
    }
}

fn bucket_to_fields(bucket: &AggregateBucket) -> HashMap<String, Value> {
    let mut fields = HashMap::new();
    fields.insert(FIELD_DEVICE_ID.to_string(), bucket.device_id.to_firestore_value());
    fields.insert(FIELD_UNITS.to_string(), bucket.granularity.as_str().to_firestore_value());
    fields.insert(FIELD_BUCKET_START.to_string(), bucket.bucket_start_millis.to_firestore_value());
    fields.insert(FIELD_CLOUD.to_string(), bucket.cloud_millis.to_firestore_value());
    fields.insert(FIELD_DEVICE.to_string(), bucket.device_millis.to_firestore_value());
    fields.insert(
        FIELD_EXPIRATION.to_string(),
        timestamp_from_epoch_seconds(bucket.expiration_epoch_seconds),
    );
    fields.insert(
        FIELD_EXPIRATION_SECS.to_string(),
        bucket.expiration_epoch_seconds.to_firestore_value(),
    );
    fields
}

fn document_to_bucket(doc: &Document) -> FirestoreResult<AggregateBucket> {
    let missing = |field: &str| {
        FirestoreError::invalid_response(format!(
            "aggregate {} missing field {}",
            doc.id().unwrap_or("<unnamed>"),
            field
        ))
    };

    let units: String = doc.get(FIELD_UNITS).ok_or_else(|| missing(FIELD_UNITS))?;
    let granularity = Granularity::from_str(&units)
        .map_err(|e| FirestoreError::invalid_response(e.to_string()))?;

    Ok(AggregateBucket {
        device_id: doc.get(FIELD_DEVICE_ID).ok_or_else(|| missing(FIELD_DEVICE_ID))?,
        granularity,
        bucket_start_millis: doc
            .get(FIELD_BUCKET_START)
            .ok_or_else(|| missing(FIELD_BUCKET_START))?,
        // Counters absent on a partially written document read as zero
        cloud_millis: doc.get(FIELD_CLOUD).unwrap_or(0),
        device_millis: doc.get(FIELD_DEVICE).unwrap_or(0),
        expiration_epoch_seconds: doc.get(FIELD_EXPIRATION_SECS).unwrap_or(0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> AggregateBucket {
        let mut bucket = AggregateBucket::empty(BucketKey::new("cam-1", Granularity::Seconds, 1_696_444_400_000));
        bucket.cloud_millis = 1_000;
        bucket.device_millis = -250;
        bucket
    }

    #[test]
    fn test_document_mapping() {
        let bucket = sample();
        let doc = Document::new(bucket_to_fields(&bucket));
        assert_eq!(document_to_bucket(&doc).unwrap(), bucket);
    }

    #[test]
    fn test_expiration_written_as_timestamp() {
        let bucket = sample();
        let fields = bucket_to_fields(&bucket);

        assert!(matches!(fields.get(FIELD_EXPIRATION), Some(Value::TimestampValue(_))));
        assert_eq!(
            fields.get(FIELD_EXPIRATION_SECS),
            Some(&Value::IntegerValue(bucket.expiration_epoch_seconds.to_string()))
        );
        assert_eq!(
            fields.get(FIELD_UNITS),
            Some(&Value::StringValue("SECONDS".to_string()))
        );
    }

    #[test]
    fn test_missing_counters_read_as_zero() {
        let mut fields = bucket_to_fields(&sample());
        fields.remove(FIELD_CLOUD);
        fields.remove(FIELD_DEVICE);

        let bucket = document_to_bucket(&Document::new(fields)).unwrap();
        assert_eq!(bucket.cloud_millis, 0);
        assert_eq!(bucket.device_millis, 0);
    }

    #[test]
    fn test_unknown_units_are_invalid() {
        let mut fields = bucket_to_fields(&sample());
        fields.insert(FIELD_UNITS.to_string(), "WEEKS".to_firestore_value());

        assert!(matches!(
            document_to_bucket(&Document::new(fields)),
            Err(FirestoreError::InvalidResponse(_))
        ));
    }
}
