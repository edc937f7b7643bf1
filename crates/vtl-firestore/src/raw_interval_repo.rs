//! Raw interval repository.
//!
//! One document per interval, id `{device_id}#{start_millis}`.

use std::collections::HashMap;
use std::str::FromStr;

use async_trait::async_trait;
use tracing::debug;

use vtl_models::{RawInterval, RawIntervalKey, VideoLocation};

use crate::client::FirestoreClient;
use crate::error::{FirestoreError, FirestoreResult};
use crate::metrics::record_query_documents;
use crate::paging::{next_token, range_query};
use crate::store::{Page, RawIntervalStore};
use crate::types::{Document, ToFirestoreValue, Value};

const FIELD_DEVICE_ID: &str = "device_id";
const FIELD_TIMESTAMP: &str = "timestamp";
const FIELD_DURATION: &str = "duration";
const FIELD_LOCATION: &str = "location";

/// Firestore-backed [`RawIntervalStore`].
pub struct RawIntervalRepository {
    client: FirestoreClient,
    collection: String,
    page_size: usize,
}

impl RawIntervalRepository {
    pub fn new(client: FirestoreClient) -> Self {
        let collection = client.config().raw_interval_collection.clone();
        let page_size = client.config().page_size;
        Self {
            client,
            collection,
            page_size,
        }
    }
}

#[async_trait]
impl RawIntervalStore for RawIntervalRepository {
    async fn save(&self, interval: &RawInterval) -> FirestoreResult<()> {
        self.client
            .set_document(
                &self.collection,
                &interval.key().to_string(),
                interval_to_fields(interval),
            )
            .await?;
        debug!(
            device_id = %interval.device_id,
            start = interval.start_millis,
            location = %interval.location,
            "Saved raw interval"
        );
        Ok(())
    }

    async fn load(&self, key: &RawIntervalKey) -> FirestoreResult<Option<RawInterval>> {
        self.client
            .get_document(&self.collection, &key.to_string())
            .await?
            .map(|doc| document_to_interval(&doc))
            .transpose()
    }

    async fn list_range(
        &self,
        device_id: &str,
        start_millis: i64,
        end_millis: i64,
        page_token: Option<&str>,
    ) -> FirestoreResult<Page<RawInterval>> {
        let query = range_query(
            &self.collection,
            vec![(FIELD_DEVICE_ID, device_id.to_firestore_value())],
            FIELD_TIMESTAMP,
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
            .map(document_to_interval)
            .collect::<FirestoreResult<Vec<_>>>()?;

        record_query_documents(&self.collection, items.len());
        let next_page_token = next_token(&items, self.page_size, |i| i.start_millis);
        Ok(Page {
            items,
            next_page_token,
        })
    }
}

fn interval_to_fields(interval: &RawInterval) -> HashMap<String, Value> {
    let mut fields = HashMap::new();
    fields.insert(FIELD_DEVICE_ID.to_string(), interval.device_id.to_firestore_value());
    fields.insert(FIELD_TIMESTAMP.to_string(), interval.start_millis.to_firestore_value());
    fields.insert(FIELD_DURATION.to_string(), interval.duration_millis.to_firestore_value());
    fields.insert(FIELD_LOCATION.to_string(), interval.location.as_str().to_firestore_value());
    fields
}

fn document_to_interval(doc: &Document) -> FirestoreResult<RawInterval> {
    let missing = |field: &str| {
        FirestoreError::invalid_response(format!(
            "raw interval {} missing field {}",
            doc.id().unwrap_or("<unnamed>"),
            field
        ))
    };

    let device_id: String = doc.get(FIELD_DEVICE_ID).ok_or_else(|| missing(FIELD_DEVICE_ID))?;
    let start_millis: i64 = doc.get(FIELD_TIMESTAMP).ok_or_else(|| missing(FIELD_TIMESTAMP))?;
    let duration_millis: i64 = doc.get(FIELD_DURATION).ok_or_else(|| missing(FIELD_DURATION))?;
    let location: String = doc.get(FIELD_LOCATION).ok_or_else(|| missing(FIELD_LOCATION))?;
    let location = VideoLocation::from_str(&location)
        .map_err(|e| FirestoreError::invalid_response(e.to_string()))?;

    Ok(RawInterval::new(device_id, start_millis, duration_millis, location))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_mapping() {
        let interval = RawInterval::new("cam-1", 1_696_444_404_000, 4_000, VideoLocation::Device);
        let doc = Document {
            name: Some("projects/p/databases/(default)/documents/video_timeline/cam-1#1696444404000".into()),
            ..Document::new(interval_to_fields(&interval))
        };

        assert_eq!(document_to_interval(&doc).unwrap(), interval);
    }

    #[test]
    fn test_fields_use_store_names() {
        let interval = RawInterval::new("cam-1", 42, 1_000, VideoLocation::Cloud);
        let fields = interval_to_fields(&interval);

        assert_eq!(fields.get("timestamp"), Some(&Value::IntegerValue("42".into())));
        assert_eq!(fields.get("location"), Some(&Value::StringValue("CLOUD".into())));
    }

    #[test]
    fn test_unknown_location_is_invalid() {
        let mut fields = interval_to_fields(&RawInterval::new("cam-1", 42, 1_000, VideoLocation::Cloud));
        fields.insert(FIELD_LOCATION.to_string(), "ATTIC".to_firestore_value());

        assert!(matches!(
            document_to_interval(&Document::new(fields)),
            Err(FirestoreError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_missing_field_is_invalid() {
        let mut fields = interval_to_fields(&RawInterval::new("cam-1", 42, 1_000, VideoLocation::Cloud));
        fields.remove(FIELD_DURATION);

        assert!(matches!(
            document_to_interval(&Document::new(fields)),
            Err(FirestoreError::InvalidResponse(_))
        ));
    }
}
