pub mod result;
pub mod source_mode;

pub use result::{BoundingBox, MaskImage, SegmentationResult};
pub use source_mode::SourceMode;
