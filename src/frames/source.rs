use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use image::ImageFormat;
use serde::Serialize;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FrameKind {
    Video,
    Photo,
}

/// Availability of the wearable device behind a [`FrameSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SourceState {
    /// No device connected or the session is not running.
    Unavailable,
    /// Connected, no video flowing yet.
    Ready,
    Streaming,
}

impl SourceState {
    pub fn is_available(&self) -> bool {
        !matches!(self, SourceState::Unavailable)
    }
}

/// An encoded image (JPEG/PNG/...) as delivered by the device.
#[derive(Debug, Clone)]
pub struct Frame {
    bytes: Arc<Vec<u8>>,
    pub kind: FrameKind,
    pub captured_at: DateTime<Utc>,
}

impl Frame {
    pub fn new(bytes: Vec<u8>, kind: FrameKind) -> Self {
        Self {
            bytes: Arc::new(bytes),
            kind,
            captured_at: Utc::now(),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// MIME type sniffed from the encoded bytes, `None` when unrecognised.
    pub fn mime_type(&self) -> Option<&'static str> {
        let format = image::guess_format(&self.bytes).ok()?;
        match format {
            ImageFormat::Png => Some("image/png"),
            ImageFormat::Jpeg => Some("image/jpeg"),
            ImageFormat::WebP => Some("image/webp"),
            ImageFormat::Gif => Some("image/gif"),
            ImageFormat::Bmp => Some("image/bmp"),
            ImageFormat::Tiff => Some("image/tiff"),
            _ => None,
        }
    }
}

/// What the poller needs from a camera: the freshest frame, an on-demand
/// photo, and availability.
#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Most recent video frame, if any has arrived. Never blocks.
    fn latest_frame(&self) -> Option<Frame>;

    /// Requests a fresh photo and resolves once it is delivered. Callers are
    /// expected to bound the wait; `None` means the capture could not start.
    async fn capture_photo(&self) -> Option<Frame>;

    fn state(&self) -> SourceState;

    fn subscribe_state(&self) -> watch::Receiver<SourceState>;
}
