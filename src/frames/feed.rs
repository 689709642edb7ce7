use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::warn;
use tokio::sync::watch;

use super::source::{Frame, FrameSource, SourceState};

/// Capture trigger handed to the device glue.
#[derive(Debug, Clone)]
pub struct PhotoRequest {
    pub requested_at: DateTime<Utc>,
}

/// Receiving side of photo triggers. The device glue awaits [`PhotoRequests::next`],
/// takes a picture, and hands it back through [`DeviceFeed::deliver_photo`].
///
/// At most one trigger is pending: requests made while the glue is busy
/// collapse into the newest one.
pub struct PhotoRequests {
    rx: watch::Receiver<Option<PhotoRequest>>,
}

impl PhotoRequests {
    pub async fn next(&mut self) -> Option<PhotoRequest> {
        self.rx.changed().await.ok()?;
        self.rx.borrow_and_update().clone()
    }

    pub fn try_next(&mut self) -> Option<PhotoRequest> {
        if !self.rx.has_changed().ok()? {
            return None;
        }
        self.rx.borrow_and_update().clone()
    }
}

/// [`FrameSource`] fed by a device SDK adapter.
///
/// Video frames land in a single overwrite-on-write slot: if they arrive
/// faster than the poller reads, the older ones are simply replaced.
pub struct DeviceFeed {
    video: watch::Sender<Option<Frame>>,
    photo: watch::Sender<Option<Frame>>,
    state: watch::Sender<SourceState>,
    photo_requests: watch::Sender<Option<PhotoRequest>>,
}

impl DeviceFeed {
    pub fn new() -> (Self, PhotoRequests) {
        let (video, _) = watch::channel(None);
        let (photo, _) = watch::channel(None);
        let (state, _) = watch::channel(SourceState::Unavailable);
        let (request_tx, request_rx) = watch::channel(None);

        let feed = Self {
            video,
            photo,
            state,
            photo_requests: request_tx,
        };
        (feed, PhotoRequests { rx: request_rx })
    }

    pub fn publish_video_frame(&self, frame: Frame) {
        self.video.send_replace(Some(frame));
        if *self.state.borrow() == SourceState::Ready {
            self.state.send_replace(SourceState::Streaming);
        }
    }

    pub fn deliver_photo(&self, frame: Frame) {
        self.photo.send_replace(Some(frame));
    }

    pub fn set_state(&self, state: SourceState) {
        self.state.send_replace(state);
        if state == SourceState::Unavailable {
            // A stale frame from a dropped session must not be submitted later.
            self.video.send_replace(None);
        }
    }
}

#[async_trait]
impl FrameSource for DeviceFeed {
    fn latest_frame(&self) -> Option<Frame> {
        self.video.borrow().clone()
    }

    async fn capture_photo(&self) -> Option<Frame> {
        if !self.state().is_available() {
            return None;
        }

        // Subscribing marks the current photo as seen, so only a new delivery wakes us.
        let mut rx = self.photo.subscribe();
        let request = PhotoRequest {
            requested_at: Utc::now(),
        };
        if self.photo_requests.send(Some(request)).is_err() {
            warn!("photo request dropped: device glue is not listening");
            return None;
        }

        rx.changed().await.ok()?;
        let photo = rx.borrow_and_update().clone();
        photo
    }

    fn state(&self) -> SourceState {
        *self.state.borrow()
    }

    fn subscribe_state(&self) -> watch::Receiver<SourceState> {
        self.state.subscribe()
    }
}
