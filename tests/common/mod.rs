//! Shared fakes for the integration suites: a scripted HTTP transport, frame
//! sources with controllable state, and recording sticker sinks.

#![allow(dead_code)]

use std::sync::Arc;

use stickercam_lib::config::{ApiKey, ApiKeySource, PipelineConfig};
use stickercam_lib::segmentation::{HttpTransport, SegmentationClient};

pub const TEST_KEY: &str = "test-key";

pub fn test_key() -> Option<ApiKey> {
    Some(ApiKey::new(TEST_KEY, ApiKeySource::Environment))
}

pub fn client_with(transport: Arc<transport::ScriptedTransport>) -> SegmentationClient {
    SegmentationClient::with_transport(
        PipelineConfig::default(),
        test_key(),
        transport as Arc<dyn HttpTransport>,
    )
}

/// Fake `HttpTransport` answering from per-route scripts.
pub mod transport {
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use stickercam_lib::segmentation::{HttpReply, HttpTransport, SegmentationError};
    use tokio::time::Instant;

    /// Replies served in order; the last one repeats forever.
    #[derive(Default)]
    struct Script {
        replies: VecDeque<Result<HttpReply, String>>,
    }

    impl Script {
        fn next(&mut self) -> Option<Result<HttpReply, String>> {
            if self.replies.len() > 1 {
                self.replies.pop_front()
            } else {
                self.replies.front().cloned()
            }
        }
    }

    #[derive(Debug, Clone)]
    pub struct RecordedCall {
        pub method: &'static str,
        pub url: String,
        pub authorization: Option<String>,
        pub body: Option<serde_json::Value>,
        pub at: Instant,
    }

    #[derive(Default)]
    pub struct ScriptedTransport {
        posts: Mutex<Script>,
        gets: Mutex<HashMap<String, Script>>,
        calls: Mutex<Vec<RecordedCall>>,
        post_delay: Mutex<Duration>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl ScriptedTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn on_post(&self, status: u16, body: &str) -> &Self {
            self.posts
                .lock()
                .unwrap()
                .replies
                .push_back(Ok(HttpReply::new(status, body.as_bytes().to_vec())));
            self
        }

        pub fn on_post_network_error(&self, message: &str) -> &Self {
            self.posts
                .lock()
                .unwrap()
                .replies
                .push_back(Err(message.to_string()));
            self
        }

        pub fn on_get(&self, url: &str, status: u16, body: impl Into<Vec<u8>>) -> &Self {
            self.gets
                .lock()
                .unwrap()
                .entry(url.to_string())
                .or_default()
                .replies
                .push_back(Ok(HttpReply::new(status, body.into())));
            self
        }

        /// Every POST waits this long before answering.
        pub fn set_post_delay(&self, delay: Duration) {
            *self.post_delay.lock().unwrap() = delay;
        }

        pub fn calls(&self) -> Vec<RecordedCall> {
            self.calls.lock().unwrap().clone()
        }

        pub fn posts(&self) -> Vec<RecordedCall> {
            self.calls()
                .into_iter()
                .filter(|call| call.method == "POST")
                .collect()
        }

        pub fn gets_to(&self, url: &str) -> usize {
            self.calls()
                .iter()
                .filter(|call| call.method == "GET" && call.url == url)
                .count()
        }

        pub fn posted_prompts(&self) -> Vec<String> {
            self.posts()
                .iter()
                .filter_map(|call| call.body.as_ref())
                .filter_map(|body| body["prompt"].as_str().map(str::to_string))
                .collect()
        }

        pub fn max_in_flight(&self) -> usize {
            self.max_in_flight.load(Ordering::SeqCst)
        }

        fn record(&self, call: RecordedCall) {
            self.calls.lock().unwrap().push(call);
        }
    }

    fn into_result(reply: Option<Result<HttpReply, String>>) -> Result<HttpReply, SegmentationError> {
        match reply {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(message)) => Err(SegmentationError::Network(message)),
            None => Ok(HttpReply::new(404, b"no scripted reply".to_vec())),
        }
    }

    #[async_trait]
    impl HttpTransport for ScriptedTransport {
        async fn post_json(
            &self,
            url: &str,
            authorization: &str,
            body: &serde_json::Value,
            _timeout: Duration,
        ) -> Result<HttpReply, SegmentationError> {
            self.record(RecordedCall {
                method: "POST",
                url: url.to_string(),
                authorization: Some(authorization.to_string()),
                body: Some(body.clone()),
                at: Instant::now(),
            });

            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            let delay = *self.post_delay.lock().unwrap();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let reply = self.posts.lock().unwrap().next();

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            into_result(reply)
        }

        async fn get(
            &self,
            url: &str,
            authorization: Option<&str>,
            _timeout: Duration,
        ) -> Result<HttpReply, SegmentationError> {
            self.record(RecordedCall {
                method: "GET",
                url: url.to_string(),
                authorization: authorization.map(str::to_string),
                body: None,
                at: Instant::now(),
            });
            let reply = self
                .gets
                .lock()
                .unwrap()
                .get_mut(url)
                .and_then(|script| script.next());
            into_result(reply)
        }
    }
}

/// Frame sources with state the test controls.
pub mod frames {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use stickercam_lib::frames::{Frame, FrameKind, FrameSource, SourceState};
    use tokio::sync::watch;

    pub struct StaticFrameSource {
        video: Mutex<Option<Frame>>,
        photo: Mutex<Option<Frame>>,
        photo_latency: Mutex<Duration>,
        state: watch::Sender<SourceState>,
        photo_requests: AtomicUsize,
    }

    impl StaticFrameSource {
        /// Streaming, with `bytes` as both the video frame and the photo.
        pub fn streaming(bytes: Vec<u8>) -> Self {
            let (state, _) = watch::channel(SourceState::Streaming);
            Self {
                video: Mutex::new(Some(Frame::new(bytes.clone(), FrameKind::Video))),
                photo: Mutex::new(Some(Frame::new(bytes, FrameKind::Photo))),
                photo_latency: Mutex::new(Duration::ZERO),
                state,
                photo_requests: AtomicUsize::new(0),
            }
        }

        /// Connected, but no frame has arrived yet.
        pub fn empty() -> Self {
            let source = Self::streaming(Vec::new());
            *source.video.lock().unwrap() = None;
            *source.photo.lock().unwrap() = None;
            source.set_state(SourceState::Ready);
            source
        }

        pub fn set_state(&self, state: SourceState) {
            self.state.send_replace(state);
        }

        pub fn set_photo_latency(&self, latency: Duration) {
            *self.photo_latency.lock().unwrap() = latency;
        }

        pub fn photo_requests(&self) -> usize {
            self.photo_requests.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl FrameSource for StaticFrameSource {
        fn latest_frame(&self) -> Option<Frame> {
            self.video.lock().unwrap().clone()
        }

        async fn capture_photo(&self) -> Option<Frame> {
            self.photo_requests.fetch_add(1, Ordering::SeqCst);
            let latency = *self.photo_latency.lock().unwrap();
            tokio::time::sleep(latency).await;
            self.photo.lock().unwrap().clone()
        }

        fn state(&self) -> SourceState {
            *self.state.borrow()
        }

        fn subscribe_state(&self) -> watch::Receiver<SourceState> {
            self.state.subscribe()
        }
    }
}

/// Sticker sinks that remember what they were asked to store.
pub mod sinks {
    use std::sync::Mutex;

    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use stickercam_lib::models::SegmentationResult;
    use stickercam_lib::poller::StickerSink;
    use uuid::Uuid;

    #[derive(Default)]
    pub struct RecordingSink {
        saved: Mutex<Vec<(Uuid, String)>>,
        fail: bool,
    }

    impl RecordingSink {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        pub fn saved(&self) -> Vec<(Uuid, String)> {
            self.saved.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl StickerSink for RecordingSink {
        async fn save_result(&self, result: &SegmentationResult, prompt: &str) -> Result<String> {
            if self.fail {
                bail!("disk full");
            }
            self.saved
                .lock()
                .unwrap()
                .push((result.id(), prompt.to_string()));
            Ok(result.id().to_string())
        }
    }
}

/// Encoded test images and canned API bodies.
pub mod fixtures {
    use std::io::Cursor;

    use image::{ImageFormat, Rgba, RgbaImage};

    pub const MASK_URL: &str = "https://v3.fal.media/files/mask.png";

    pub fn png(width: u32, height: u32, pixel: [u8; 4]) -> Vec<u8> {
        let image = RgbaImage::from_pixel(width, height, Rgba(pixel));
        let mut out = Cursor::new(Vec::new());
        image.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    /// An opaque frame as a camera would deliver it.
    pub fn camera_frame() -> Vec<u8> {
        png(8, 8, [120, 90, 60, 255])
    }

    /// A 40x40 mask with a 10x10 opaque square at (15, 15).
    pub fn mask_png() -> Vec<u8> {
        let mut image = RgbaImage::from_pixel(40, 40, Rgba([0, 0, 0, 0]));
        for y in 15..25 {
            for x in 15..25 {
                image.put_pixel(x, y, Rgba([255, 255, 255, 255]));
            }
        }
        let mut out = Cursor::new(Vec::new());
        image.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    pub fn result_body(mask_url: &str, score: f32) -> String {
        format!(
            r#"{{"image": {{"url": "{mask_url}", "content_type": "image/png", "file_name": "mask.png",
                 "file_size": 2048, "width": 40, "height": 40}},
                "masks": [{{"url": "{mask_url}"}}],
                "scores": [{score}],
                "boxes": [[15, 15, 25, 25]]}}"#
        )
    }

    /// A detection that carries no downloadable mask.
    pub fn result_body_without_mask(score: f32) -> String {
        format!(r#"{{"scores": [{score}], "boxes": [[1, 2, 3, 4]]}}"#)
    }

    pub const EMPTY_RESULT: &str = r#"{"masks": [], "scores": [], "boxes": []}"#;

    pub fn ticket(request_id: &str, status_url: &str, response_url: &str) -> String {
        format!(
            r#"{{"request_id": "{request_id}", "status_url": "{status_url}", "response_url": "{response_url}",
                "cancel_url": "{response_url}/cancel", "queue_position": 2}}"#
        )
    }

    pub fn status(state: &str) -> String {
        format!(r#"{{"status": "{state}"}}"#)
    }
}
