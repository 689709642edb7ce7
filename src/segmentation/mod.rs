//! Remote segmentation against the fal.ai SAM3 endpoint.

pub mod client;
pub mod error;
pub mod mask;
pub mod transport;
pub mod wire;

pub use client::SegmentationClient;
pub use error::SegmentationError;
pub use transport::{HttpReply, HttpTransport, ReqwestTransport};
