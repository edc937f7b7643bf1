//! Firestore REST API types.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Firestore document value types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Value {
    NullValue(()),
    BooleanValue(bool),
    IntegerValue(String), // Firestore sends integers as strings
    DoubleValue(f64),
    TimestampValue(String),
    StringValue(String),
}

/// Firestore document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    /// Full resource name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<HashMap<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub create_time: Option<String>,
    /// Server timestamp of the last write, used as the document version
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_time: Option<String>,
}

impl Document {
    pub fn new(fields: HashMap<String, Value>) -> Self {
        Self {
            fields: Some(fields),
            ..Default::default()
        }
    }

    /// Typed field lookup.
    pub fn get<T: FromFirestoreValue>(&self, field: &str) -> Option<T> {
        self.fields
            .as_ref()
            .and_then(|fields| fields.get(field))
            .and_then(T::from_firestore_value)
    }

    /// Trailing document id of the resource name.
    pub fn id(&self) -> Option<&str> {
        self.name
            .as_deref()
            .and_then(|name| name.rsplit('/').next())
    }
}

// ============================================================================
// Structured queries
// ============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunQueryRequest {
    pub structured_query: StructuredQuery,
}

/// One element of the streamed `runQuery` response array.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunQueryResponse {
    #[serde(default)]
    pub document: Option<Document>,
    #[serde(default)]
    pub read_time: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredQuery {
    pub from: Vec<CollectionSelector>,
    #[serde(rename = "where", skip_serializing_if = "Option::is_none")]
    pub filter: Option<Filter>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub order_by: Vec<Order>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_at: Option<Cursor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<i32>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionSelector {
    pub collection_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Filter {
    CompositeFilter(CompositeFilter),
    FieldFilter(FieldFilter),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositeFilter {
    pub op: CompositeOperator,
    pub filters: Vec<Filter>,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompositeOperator {
    And,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldFilter {
    pub field: FieldReference,
    pub op: FieldOperator,
    pub value: Value,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FieldOperator {
    Equal,
    GreaterThanOrEqual,
    LessThan,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldReference {
    pub field_path: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub field: FieldReference,
    pub direction: Direction,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Ascending,
}

/// Position in the ordered result set.
#[derive(Debug, Clone, Serialize)]
pub struct Cursor {
    pub values: Vec<Value>,
    /// `false` starts after the cursor values instead of at them
    pub before: bool,
}

impl Filter {
    pub fn field(path: &str, op: FieldOperator, value: Value) -> Self {
        Filter::FieldFilter(FieldFilter {
            field: FieldReference {
                field_path: path.to_string(),
            },
            op,
            value,
        })
    }

    pub fn and(filters: Vec<Filter>) -> Self {
        Filter::CompositeFilter(CompositeFilter {
            op: CompositeOperator::And,
            filters,
        })
    }
}

impl Order {
    pub fn ascending(path: &str) -> Self {
        Self {
            field: FieldReference {
                field_path: path.to_string(),
            },
            direction: Direction::Ascending,
        }
    }
}

// ============================================================================
// Value conversions
// ============================================================================

/// Convert a Rust value to Firestore Value.
pub trait ToFirestoreValue {
    fn to_firestore_value(&self) -> Value;
}

impl ToFirestoreValue for String {
    fn to_firestore_value(&self) -> Value {
        Value::StringValue(self.clone())
    }
}

impl ToFirestoreValue for &str {
    fn to_firestore_value(&self) -> Value {
        Value::StringValue(self.to_string())
    }
}

impl ToFirestoreValue for i64 {
    fn to_firestore_value(&self) -> Value {
        Value::IntegerValue(self.to_string())
    }
}

impl ToFirestoreValue for bool {
    fn to_firestore_value(&self) -> Value {
        Value::BooleanValue(*self)
    }
}

impl ToFirestoreValue for DateTime<Utc> {
    fn to_firestore_value(&self) -> Value {
        Value::TimestampValue(self.to_rfc3339())
    }
}

impl<T: ToFirestoreValue> ToFirestoreValue for Option<T> {
    fn to_firestore_value(&self) -> Value {
        match self {
            Some(v) => v.to_firestore_value(),
            None => Value::NullValue(()),
        }
    }
}

/// Convert Firestore Value to Rust type.
pub trait FromFirestoreValue: Sized {
    fn from_firestore_value(value: &Value) -> Option<Self>;
}

impl FromFirestoreValue for String {
    fn from_firestore_value(value: &Value) -> Option<Self> {
        match value {
            Value::StringValue(s) => Some(s.clone()),
            _ => None,
        }
    }
}

impl FromFirestoreValue for i64 {
    fn from_firestore_value(value: &Value) -> Option<Self> {
        match value {
            Value::IntegerValue(s) => s.parse().ok(),
            Value::DoubleValue(f) => Some(*f as i64),
            _ => None,
        }
    }
}

impl FromFirestoreValue for bool {
    fn from_firestore_value(value: &Value) -> Option<Self> {
        match value {
            Value::BooleanValue(b) => Some(*b),
            _ => None,
        }
    }
}

impl FromFirestoreValue for DateTime<Utc> {
    fn from_firestore_value(value: &Value) -> Option<Self> {
        match value {
            Value::TimestampValue(s) => DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.into()),
            _ => None,
        }
    }
}

/// Timestamp value for whole epoch seconds.
pub fn timestamp_from_epoch_seconds(secs: i64) -> Value {
    match Utc.timestamp_opt(secs, 0).single() {
        Some(dt) => dt.to_firestore_value(),
        None => Value::NullValue(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_value_wire_format() {
        assert_eq!(
            serde_json::to_value(42i64.to_firestore_value()).unwrap(),
            json!({"integerValue": "42"})
        );
        assert_eq!(
            serde_json::to_value("cam-1".to_firestore_value()).unwrap(),
            json!({"stringValue": "cam-1"})
        );
    }

    #[test]
    fn test_document_typed_get() {
        let raw = json!({
            "name": "projects/p/databases/(default)/documents/video_timeline/cam-1#42",
            "fields": {
                "device_id": {"stringValue": "cam-1"},
                "duration": {"integerValue": "4000"}
            },
            "updateTime": "2024-01-01T00:00:00.000001Z"
        });
        let doc: Document = serde_json::from_value(raw).unwrap();

        assert_eq!(doc.get::<String>("device_id").as_deref(), Some("cam-1"));
        assert_eq!(doc.get::<i64>("duration"), Some(4000));
        assert_eq!(doc.get::<i64>("missing"), None);
        assert_eq!(doc.id(), Some("cam-1#42"));
    }

    #[test]
    fn test_structured_query_serialization() {
        let query = StructuredQuery {
            from: vec![CollectionSelector {
                collection_id: "video_density".to_string(),
            }],
            filter: Some(Filter::and(vec![
                Filter::field("device_id", FieldOperator::Equal, "cam-1".to_firestore_value()),
                Filter::field(
                    "bucket_start_time",
                    FieldOperator::GreaterThanOrEqual,
                    0i64.to_firestore_value(),
                ),
            ])),
            order_by: vec![Order::ascending("bucket_start_time")],
            start_at: None,
            limit: Some(100),
        };

        let value = serde_json::to_value(&query).unwrap();
        assert_eq!(value["where"]["compositeFilter"]["op"], "AND");
        assert_eq!(
            value["where"]["compositeFilter"]["filters"][1]["fieldFilter"]["op"],
            "GREATER_THAN_OR_EQUAL"
        );
        assert_eq!(value["orderBy"][0]["direction"], "ASCENDING");
        assert_eq!(value["limit"], 100);
        assert!(value.get("startAt").is_none());
    }

    #[test]
    fn test_timestamp_from_epoch_seconds() {
        let value = timestamp_from_epoch_seconds(86_400);
        assert_eq!(
            DateTime::<Utc>::from_firestore_value(&value).map(|dt| dt.timestamp()),
            Some(86_400)
        );
    }
}
