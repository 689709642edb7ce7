use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use log::warn;
use tokio::sync::watch;

use super::source::{Frame, FrameKind, FrameSource, SourceState};

/// Treats an image file on disk as the camera. Every read picks up whatever
/// is currently in the file, so an external tool can keep overwriting it.
pub struct FileFrameSource {
    path: PathBuf,
    state: watch::Sender<SourceState>,
}

impl FileFrameSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let (state, _) = watch::channel(Self::probe(&path));
        Self { path, state }
    }

    fn probe(path: &Path) -> SourceState {
        if path.is_file() {
            SourceState::Streaming
        } else {
            SourceState::Unavailable
        }
    }

    fn read(&self, kind: FrameKind) -> Option<Frame> {
        match fs::read(&self.path) {
            Ok(bytes) if !bytes.is_empty() => Some(Frame::new(bytes, kind)),
            Ok(_) => None,
            Err(err) => {
                warn!("failed to read frame from {}: {err}", self.path.display());
                None
            }
        }
    }
}

#[async_trait]
impl FrameSource for FileFrameSource {
    fn latest_frame(&self) -> Option<Frame> {
        self.read(FrameKind::Video)
    }

    async fn capture_photo(&self) -> Option<Frame> {
        self.read(FrameKind::Photo)
    }

    fn state(&self) -> SourceState {
        let current = Self::probe(&self.path);
        self.state.send_if_modified(|state| {
            let changed = *state != current;
            *state = current;
            changed
        });
        current
    }

    fn subscribe_state(&self) -> watch::Receiver<SourceState> {
        self.state.subscribe()
    }
}
