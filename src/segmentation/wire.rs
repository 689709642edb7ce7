//! JSON shapes exchanged with the fal.ai queue API.

use serde::{Deserialize, Serialize};

use crate::config::OutputFormat;
use crate::models::{BoundingBox, SegmentationResult};

use super::error::SegmentationError;

#[derive(Debug, Serialize)]
pub struct SegmentRequest<'a> {
    pub image_url: &'a str,
    pub prompt: &'a str,
    pub apply_mask: bool,
    pub output_format: OutputFormat,
    pub sync_mode: bool,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ImageRef {
    pub url: String,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub file_size: Option<u64>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

/// Final result body, either returned directly or fetched after the queue completes.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SegmentResponse {
    #[serde(default)]
    pub image: Option<ImageRef>,
    #[serde(default)]
    pub masks: Vec<ImageRef>,
    #[serde(default)]
    pub scores: Vec<f32>,
    #[serde(default)]
    pub boxes: Vec<[f32; 4]>,
}

impl SegmentResponse {
    pub fn is_empty(&self) -> bool {
        self.image.is_none() && self.masks.is_empty() && self.scores.is_empty() && self.boxes.is_empty()
    }

    /// Collapses the response into one result, using the composited image
    /// when present and the first mask otherwise. `None` means nothing was found.
    pub fn into_result(self) -> Option<SegmentationResult> {
        if self.is_empty() {
            return None;
        }
        let mask_url = self
            .image
            .map(|image| image.url)
            .or_else(|| self.masks.into_iter().next().map(|mask| mask.url));
        let score = self.scores.first().copied();
        let bounding_box = self.boxes.first().copied().map(BoundingBox::from_array);
        Some(SegmentationResult::new(mask_url, score, bounding_box))
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct QueueTicket {
    pub request_id: String,
    #[serde(default)]
    pub response_url: Option<String>,
    #[serde(default)]
    pub status_url: Option<String>,
    #[serde(default)]
    pub cancel_url: Option<String>,
    #[serde(default)]
    pub queue_position: Option<u32>,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueStatus {
    InQueue,
    InProgress,
    Completed,
    Failed,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusResponse {
    pub status: QueueStatus,
    #[serde(default)]
    pub response_url: Option<String>,
    #[serde(default)]
    pub queue_position: Option<u32>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug)]
pub enum SubmitReply {
    Completed(SegmentResponse),
    Queued(QueueTicket),
}

/// A body with a `request_id` and no result fields is a queue ticket;
/// anything else is treated as a finished result.
pub fn parse_submit_reply(body: &[u8]) -> Result<SubmitReply, SegmentationError> {
    let value: serde_json::Value = serde_json::from_slice(body)?;
    let is_ticket = value.get("request_id").is_some()
        && value.get("image").is_none()
        && value.get("masks").is_none();

    if is_ticket {
        Ok(SubmitReply::Queued(serde_json::from_value(value)?))
    } else {
        Ok(SubmitReply::Completed(serde_json::from_value(value)?))
    }
}
