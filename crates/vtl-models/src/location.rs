//! Storage location of captured video.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ModelError;

/// Where a piece of video currently lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VideoLocation {
    /// Uploaded to cloud storage
    Cloud,
    /// Only on the camera's local storage
    Device,
}

impl VideoLocation {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoLocation::Cloud => "CLOUD",
            VideoLocation::Device => "DEVICE",
        }
    }
}

impl fmt::Display for VideoLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for VideoLocation {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CLOUD" => Ok(VideoLocation::Cloud),
            "DEVICE" => Ok(VideoLocation::Device),
            other => Err(ModelError::UnknownLocation(other.to_string())),
        }
    }
}
