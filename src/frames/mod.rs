//! Frame sources the poller reads from.
//!
//! The wearable SDK is an external collaborator; [`DeviceFeed`] is the
//! adapter its glue code pushes frames into. [`FileFrameSource`] backs the CLI.

pub mod feed;
pub mod file;
pub mod source;

pub use feed::{DeviceFeed, PhotoRequest, PhotoRequests};
pub use file::FileFrameSource;
pub use source::{Frame, FrameKind, FrameSource, SourceState};
