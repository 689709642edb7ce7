use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Axis-aligned box as reported by the segmentation API.
///
/// Values are passed through exactly as received; nothing here clamps or
/// normalizes them.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BoundingBox {
    pub x_min: f32,
    pub y_min: f32,
    pub x_max: f32,
    pub y_max: f32,
}

impl BoundingBox {
    pub fn from_array(values: [f32; 4]) -> Self {
        Self {
            x_min: values[0],
            y_min: values[1],
            x_max: values[2],
            y_max: values[3],
        }
    }

    pub fn to_array(self) -> [f32; 4] {
        [self.x_min, self.y_min, self.x_max, self.y_max]
    }
}

/// Downloaded mask asset, ready for display.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MaskImage {
    #[serde(skip)]
    bytes: Arc<Vec<u8>>,
    pub width: u32,
    pub height: u32,
    /// False when the asset had no opaque region and the original bytes were kept.
    pub cropped: bool,
}

impl MaskImage {
    pub fn new(bytes: Vec<u8>, width: u32, height: u32, cropped: bool) -> Self {
        Self {
            bytes: Arc::new(bytes),
            width,
            height,
            cropped,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// One completed segmentation. Built once by the client/poller, then only read.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SegmentationResult {
    id: Uuid,
    mask_image: Option<MaskImage>,
    mask_url: Option<String>,
    score: Option<f32>,
    bounding_box: Option<BoundingBox>,
    created_at: DateTime<Utc>,
}

impl SegmentationResult {
    pub fn new(
        mask_url: Option<String>,
        score: Option<f32>,
        bounding_box: Option<BoundingBox>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            mask_image: None,
            mask_url,
            score,
            bounding_box,
            created_at: Utc::now(),
        }
    }

    /// Attaches the downloaded mask before the result is published.
    pub fn with_mask_image(mut self, mask: MaskImage) -> Self {
        self.mask_image = Some(mask);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn mask_image(&self) -> Option<&MaskImage> {
        self.mask_image.as_ref()
    }

    pub fn mask_url(&self) -> Option<&str> {
        self.mask_url.as_deref()
    }

    pub fn score(&self) -> Option<f32> {
        self.score
    }

    pub fn bounding_box(&self) -> Option<BoundingBox> {
        self.bounding_box
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Compares the remote payload fields, ignoring identity and timestamps.
    pub fn same_payload(&self, other: &SegmentationResult) -> bool {
        self.mask_url == other.mask_url
            && self.score == other.score
            && self.bounding_box == other.bounding_box
            && self.mask_image == other.mask_image
    }
}
