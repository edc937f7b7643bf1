//! Change-feed records over the raw-interval store.
//!
//! Records arrive in the shape the raw store emits them (event type plus
//! optional before/after images). [`ChangeFeedRecord::classify`] turns each
//! one into a [`StreamEvent`] so consumers match on intent instead of on
//! which image fields happen to be present.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{ModelError, ModelResult};
use crate::interval::{RawInterval, RawIntervalKey};
use crate::location::VideoLocation;

/// Kind of write observed on the raw-interval store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeEventType {
    Insert,
    Modify,
    Remove,
}

/// After-image of a changed raw interval.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewImage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

/// Before-image of a changed raw interval.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OldImage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

/// One change-feed record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeFeedRecord {
    pub event_type: ChangeEventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_image: Option<NewImage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_image: Option<OldImage>,
}

/// Why a record produces no aggregate work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// The raw interval was deleted
    Removal,
    /// A location change other than DEVICE to CLOUD (including no change)
    UnsupportedTransition {
        from: VideoLocation,
        to: VideoLocation,
    },
    /// The old or new location is absent or unreadable
    IncompleteImages,
}

/// Intent of a change-feed record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A new raw interval was written
    Ingestion(RawIntervalKey),
    /// A device-local interval finished uploading to the cloud
    Correction(RawIntervalKey),
    /// Nothing to aggregate
    Ignored(IgnoreReason),
}

impl ChangeFeedRecord {
    /// Record for a newly written interval.
    pub fn insert(interval: &RawInterval) -> Self {
        Self {
            event_type: ChangeEventType::Insert,
            new_image: Some(NewImage::for_interval(interval)),
            old_image: None,
        }
    }

    /// Record for an overwrite of an interval previously stored at `previous`.
    pub fn modify(interval: &RawInterval, previous: VideoLocation) -> Self {
        Self {
            event_type: ChangeEventType::Modify,
            new_image: Some(NewImage::for_interval(interval)),
            old_image: Some(OldImage {
                location: Some(previous.as_str().to_string()),
            }),
        }
    }

    /// Classify the record.
    ///
    /// Only DEVICE to CLOUD modifications become corrections; every other
    /// modification is ignored. Keys are required for ingestions and
    /// corrections and their absence is an error.
    pub fn classify(&self) -> ModelResult<StreamEvent> {
        match self.event_type {
            ChangeEventType::Insert => Ok(StreamEvent::Ingestion(self.key()?)),
            ChangeEventType::Remove => Ok(StreamEvent::Ignored(IgnoreReason::Removal)),
            ChangeEventType::Modify => {
                let old = self
                    .old_image
                    .as_ref()
                    .and_then(|image| parse_location(image.location.as_deref()));
                match (old, self.new_location()) {
                    (Some(VideoLocation::Device), Some(VideoLocation::Cloud)) => {
                        Ok(StreamEvent::Correction(self.key()?))
                    }
                    (Some(from), Some(to)) => Ok(StreamEvent::Ignored(
                        IgnoreReason::UnsupportedTransition { from, to },
                    )),
                    _ => Ok(StreamEvent::Ignored(IgnoreReason::IncompleteImages)),
                }
            }
        }
    }

    /// Location recorded in the after-image, if present and readable.
    pub fn new_location(&self) -> Option<VideoLocation> {
        self.new_image
            .as_ref()
            .and_then(|image| parse_location(image.location.as_deref()))
    }

    fn key(&self) -> ModelResult<RawIntervalKey> {
        let image = self
            .new_image
            .as_ref()
            .ok_or(ModelError::MissingKey("partitionKey"))?;

        let device_id = image
            .partition_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or(ModelError::MissingKey("partitionKey"))?;
        let sort_key = image
            .sort_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or(ModelError::MissingKey("sortKey"))?;

        let start_millis = sort_key
            .parse::<i64>()
            .map_err(|_| ModelError::InvalidSortKey(sort_key.to_string()))?;

        Ok(RawIntervalKey::new(device_id, start_millis))
    }
}

impl NewImage {
    fn for_interval(interval: &RawInterval) -> Self {
        Self {
            partition_key: Some(interval.device_id.clone()),
            sort_key: Some(interval.start_millis.to_string()),
            location: Some(interval.location.as_str().to_string()),
        }
    }
}

fn parse_location(raw: Option<&str>) -> Option<VideoLocation> {
    raw.and_then(|s| VideoLocation::from_str(s).ok())
}
