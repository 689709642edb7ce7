//! The frame-throttled segmentation loop and its observable state.

pub mod controller;
pub mod history;
mod loop_worker;
pub mod sink;
pub mod state;

pub use controller::SegmentationPoller;
pub use history::ResultHistory;
pub use sink::StickerSink;
pub use state::{PollerCondition, PollerStatus, SkipReason, TickOutcome};
