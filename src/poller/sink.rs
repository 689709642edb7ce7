use anyhow::Result;
use async_trait::async_trait;

use crate::models::SegmentationResult;

/// Where auto-saved results go. Called fire-and-forget from the poller; an
/// error is logged and otherwise ignored.
#[async_trait]
pub trait StickerSink: Send + Sync {
    /// Persists one result under the prompt that produced it, returning the stored id.
    async fn save_result(&self, result: &SegmentationResult, prompt: &str) -> Result<String>;
}
