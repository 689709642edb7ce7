use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Error};
use serde::{Deserialize, Serialize};

/// Where the poller takes its frame from on each tick.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum SourceMode {
    /// Read the continuously updated video slot. Silent, may be slightly stale.
    #[default]
    LatestVideoFrame,
    /// Ask the device for a fresh photo every cycle. Higher resolution, audible shutter.
    FreshPhotoCapture,
}

impl SourceMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceMode::LatestVideoFrame => "video",
            SourceMode::FreshPhotoCapture => "photo",
        }
    }
}

impl fmt::Display for SourceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceMode {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "video" | "latestVideoFrame" => Ok(SourceMode::LatestVideoFrame),
            "photo" | "freshPhotoCapture" => Ok(SourceMode::FreshPhotoCapture),
            other => Err(anyhow!("unknown source mode '{other}'")),
        }
    }
}
