//! Persisted sticker library entries.

use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Error};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{BoundingBox, SegmentationResult};

/// Look applied to a sticker when rendered. Only the selection is stored.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StickerStyle {
    #[default]
    Original,
    Outlined,
    Cartoon,
    Neon,
    Retro,
}

impl StickerStyle {
    pub const ALL: [StickerStyle; 5] = [
        StickerStyle::Original,
        StickerStyle::Outlined,
        StickerStyle::Cartoon,
        StickerStyle::Neon,
        StickerStyle::Retro,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StickerStyle::Original => "original",
            StickerStyle::Outlined => "outlined",
            StickerStyle::Cartoon => "cartoon",
            StickerStyle::Neon => "neon",
            StickerStyle::Retro => "retro",
        }
    }
}

impl fmt::Display for StickerStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StickerStyle {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        StickerStyle::ALL
            .into_iter()
            .find(|style| style.as_str().eq_ignore_ascii_case(value))
            .ok_or_else(|| anyhow!("unknown sticker style '{value}'"))
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Sticker {
    pub id: String,
    pub prompt: String,
    /// Encoded mask image (PNG unless the API was asked for something else)
    #[serde(skip)]
    pub image: Vec<u8>,
    pub image_width: u32,
    pub image_height: u32,
    pub score: Option<f32>,
    pub bounding_box: Option<BoundingBox>,
    pub is_favorite: bool,
    pub style: StickerStyle,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for [`crate::db::Database::save_sticker`].
#[derive(Debug, Clone)]
pub struct NewSticker {
    pub prompt: String,
    pub image: Vec<u8>,
    pub image_width: u32,
    pub image_height: u32,
    pub score: Option<f32>,
    pub bounding_box: Option<BoundingBox>,
}

impl NewSticker {
    /// `None` when the result carries no downloaded mask to store.
    pub fn from_result(result: &SegmentationResult, prompt: &str) -> Option<Self> {
        let mask = result.mask_image().filter(|mask| !mask.is_empty())?;
        Some(Self {
            prompt: prompt.to_string(),
            image: mask.bytes().to_vec(),
            image_width: mask.width,
            image_height: mask.height,
            score: result.score(),
            bounding_box: result.bounding_box(),
        })
    }
}
