//! Page tokens for time-ordered range listings.
//!
//! A token is the URL-encoded time value of the last item of a full page;
//! the next page starts strictly after it.

use crate::error::{FirestoreError, FirestoreResult};
use crate::store::Page;
use crate::types::{
    CollectionSelector, Cursor, FieldOperator, Filter, Order, StructuredQuery, ToFirestoreValue,
    Value,
};

/// Results per page when `STORE_PAGE_SIZE` is unset.
pub const DEFAULT_PAGE_SIZE: usize = 100;

pub fn encode_token(last_time_millis: i64) -> String {
    urlencoding::encode(&last_time_millis.to_string()).into_owned()
}

pub fn decode_token(token: &str) -> FirestoreResult<i64> {
    let decoded = urlencoding::decode(token)
        .map_err(|_| FirestoreError::InvalidPageToken(token.to_string()))?;
    decoded
        .parse()
        .map_err(|_| FirestoreError::InvalidPageToken(token.to_string()))
}

/// Token for the page after `items`, present only when the page is full.
pub fn next_token<T>(items: &[T], page_size: usize, time_of: impl Fn(&T) -> i64) -> Option<String> {
    if page_size == 0 || items.len() < page_size {
        return None;
    }
    items.last().map(|item| encode_token(time_of(item)))
}

/// Page over items already sorted ascending by `time_of`.
pub fn paginate<T>(
    sorted: impl IntoIterator<Item = T>,
    time_of: impl Fn(&T) -> i64,
    start_millis: i64,
    end_millis: i64,
    page_token: Option<&str>,
    page_size: usize,
) -> FirestoreResult<Page<T>> {
    let after = page_token.map(decode_token).transpose()?;

    let items: Vec<T> = sorted
        .into_iter()
        .filter(|item| {
            let t = time_of(item);
            t >= start_millis && t < end_millis && after.map_or(true, |cursor| t > cursor)
        })
        .take(page_size)
        .collect();

    let next_page_token = next_token(&items, page_size, &time_of);
    Ok(Page {
        items,
        next_page_token,
    })
}

/// Query for documents matching `equals` whose `time_field` lies in
/// `[start, end)`, ascending, resuming after `page_token`.
pub fn range_query(
    collection: &str,
    equals: Vec<(&str, Value)>,
    time_field: &str,
    start_millis: i64,
    end_millis: i64,
    page_token: Option<&str>,
    page_size: usize,
) -> FirestoreResult<StructuredQuery> {
    let after = page_token.map(decode_token).transpose()?;

    let mut filters: Vec<Filter> = equals
        .into_iter()
        .map(|(field, value)| Filter::field(field, FieldOperator::Equal, value))
        .collect();
    filters.push(Filter::field(
        time_field,
        FieldOperator::GreaterThanOrEqual,
        start_millis.to_firestore_value(),
    ));
    filters.push(Filter::field(
        time_field,
        FieldOperator::LessThan,
        end_millis.to_firestore_value(),
    ));

    Ok(StructuredQuery {
        from: vec![CollectionSelector {
            collection_id: collection.to_string(),
        }],
        filter: Some(Filter::and(filters)),
        order_by: vec![Order::ascending(time_field)],
        start_at: after.map(|cursor| Cursor {
            values: vec![cursor.to_firestore_value()],
            before: false,
        }),
        limit: Some(page_size.min(i32::MAX as usize) as i32),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_round_trip() {
        assert_eq!(decode_token(&encode_token(1_696_444_404_000)).unwrap(), 1_696_444_404_000);
    }

    #[test]
    fn test_garbage_token_is_rejected() {
        assert!(matches!(
            decode_token("not-a-time"),
            Err(FirestoreError::InvalidPageToken(_))
        ));
    }

    #[test]
    fn test_paginate_walks_all_pages() {
        let times: Vec<i64> = (0..5).map(|i| i * 10).collect();

        let first = paginate(times.clone(), |t| *t, 0, 100, None, 2).unwrap();
        assert_eq!(first.items, vec![0, 10]);
        let token = first.next_page_token.unwrap();

        let second = paginate(times.clone(), |t| *t, 0, 100, Some(&token), 2).unwrap();
        assert_eq!(second.items, vec![20, 30]);
        let token = second.next_page_token.unwrap();

        let third = paginate(times, |t| *t, 0, 100, Some(&token), 2).unwrap();
        assert_eq!(third.items, vec![40]);
        assert!(third.next_page_token.is_none());
    }

    #[test]
    fn test_range_query_resumes_after_token() {
        let token = encode_token(5_000);
        let query = range_query(
            "video_density",
            vec![("device_id", "cam-1".to_firestore_value())],
            "bucket_start_time",
            0,
            60_000,
            Some(&token),
            50,
        )
        .unwrap();

        let json = serde_json::to_value(&query).unwrap();
        assert_eq!(json["startAt"]["values"][0]["integerValue"], "5000");
        assert_eq!(json["startAt"]["before"], false);
        assert_eq!(json["limit"], 50);
        assert_eq!(
            json["where"]["compositeFilter"]["filters"].as_array().map(Vec::len),
            Some(3)
        );
    }

    #[test]
    fn test_paginate_respects_half_open_range() {
        let page = paginate(vec![5, 10, 20, 30], |t| *t, 10, 30, None, 10).unwrap();
        assert_eq!(page.items, vec![10, 20]);
        assert!(page.next_page_token.is_none());
    }
}
