use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::config::PipelineConfig;
use crate::frames::FrameSource;
use crate::models::{SegmentationResult, SourceMode};
use crate::segmentation::SegmentationClient;
use crate::utils::SingleFlight;

use super::loop_worker::{polling_loop, run_tick};
use super::sink::StickerSink;
use super::state::{PollerCondition, PollerState, PollerStatus, TickOutcome};

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

/// Everything the loop task and the controller share.
pub(super) struct PollerShared {
    pub(super) config: PipelineConfig,
    pub(super) client: Arc<SegmentationClient>,
    pub(super) source: Arc<dyn FrameSource>,
    pub(super) sink: Option<Arc<dyn StickerSink>>,
    pub(super) state: Mutex<PollerState>,
    pub(super) in_flight: SingleFlight,
    status_tx: watch::Sender<PollerStatus>,
}

impl PollerShared {
    pub(super) fn condition(&self) -> Option<PollerCondition> {
        detect_condition(&self.client, self.source.as_ref())
    }

    /// Pushes a fresh snapshot to subscribers unless nothing changed.
    pub(super) fn publish(&self, state: &PollerState) {
        let next = state.snapshot(self.condition());
        self.status_tx.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}

fn detect_condition(
    client: &SegmentationClient,
    source: &dyn FrameSource,
) -> Option<PollerCondition> {
    if !client.has_api_key() {
        Some(PollerCondition::MissingApiKey)
    } else if !source.state().is_available() {
        Some(PollerCondition::SourceUnavailable)
    } else {
        None
    }
}

/// Cancels the loop when dropped, so tearing down the last poller clone stops it.
struct LoopHandle {
    handle: JoinHandle<()>,
    cancel: DropGuard,
}

/// Drives periodic segmentation of the freshest frame.
///
/// Cheap to clone; clones control the same loop. All settings take effect on
/// the next tick, except the polling interval, which restarts the loop.
#[derive(Clone)]
pub struct SegmentationPoller {
    shared: Arc<PollerShared>,
    worker: Arc<Mutex<Option<LoopHandle>>>,
}

impl SegmentationPoller {
    pub fn new(
        config: PipelineConfig,
        client: Arc<SegmentationClient>,
        source: Arc<dyn FrameSource>,
        sink: Option<Arc<dyn StickerSink>>,
    ) -> Self {
        let state = PollerState::new(config.default_polling_interval, config.history_capacity);
        let condition = detect_condition(&client, source.as_ref());
        let (status_tx, _) = watch::channel(state.snapshot(condition));

        Self {
            shared: Arc::new(PollerShared {
                config,
                client,
                source,
                sink,
                state: Mutex::new(state),
                in_flight: SingleFlight::new(),
                status_tx,
            }),
            worker: Arc::new(Mutex::new(None)),
        }
    }

    /// Enables polling. A no-op when already enabled.
    pub async fn start(&self) {
        let mut worker = self.worker.lock().await;
        let interval = {
            let mut state = self.shared.state.lock().await;
            if state.enabled {
                return;
            }
            state.enabled = true;
            state.last_error = None;
            self.shared.publish(&state);
            state.polling_interval
        };

        log_info!("segmentation polling started (every {:?})", interval);
        *worker = Some(self.spawn_loop(interval));
    }

    /// Disables polling and cancels the loop, dropping any request in flight.
    /// Safe to call repeatedly.
    pub async fn stop(&self) {
        let mut worker = self.worker.lock().await;
        {
            let mut state = self.shared.state.lock().await;
            state.enabled = false;
            self.shared.publish(&state);
        }

        if let Some(running) = worker.take() {
            shutdown(running).await;
            log_info!("segmentation polling stopped");
        }

        // The cancelled tick may have left the flag set; a manual capture still running keeps it.
        let mut state = self.shared.state.lock().await;
        state.is_processing = self.shared.in_flight.is_held();
        self.shared.publish(&state);
    }

    /// Sets the interval (raised to the configured floor) and returns the value
    /// actually applied. A running loop is restarted so the change lands on the
    /// next tick instead of after the current sleep.
    pub async fn set_polling_interval(&self, seconds: f64) -> Duration {
        let interval = self.shared.config.clamp_interval(seconds);
        let mut worker = self.worker.lock().await;
        let enabled = {
            let mut state = self.shared.state.lock().await;
            state.polling_interval = interval;
            self.shared.publish(&state);
            state.enabled
        };

        if enabled {
            if let Some(running) = worker.take() {
                shutdown(running).await;
            }
            *worker = Some(self.spawn_loop(interval));
            log_info!("polling interval changed to {:?}, loop restarted", interval);
        }
        interval
    }

    pub async fn set_prompt(&self, prompt: impl Into<String>) {
        let mut state = self.shared.state.lock().await;
        state.prompt = prompt.into();
        self.shared.publish(&state);
    }

    pub async fn set_source_mode(&self, mode: SourceMode) {
        let mut state = self.shared.state.lock().await;
        state.source_mode = mode;
        self.shared.publish(&state);
    }

    pub async fn set_auto_save(&self, enabled: bool) {
        let mut state = self.shared.state.lock().await;
        state.auto_save_enabled = enabled;
        self.shared.publish(&state);
    }

    /// Empties the in-memory history. `last_result` and persisted stickers stay.
    pub async fn clear_history(&self) {
        let mut state = self.shared.state.lock().await;
        state.history.clear();
        self.shared.publish(&state);
    }

    /// Runs one tick right now, whether or not the loop is enabled. Shares the
    /// in-flight guard with the loop, so it skips while a loop tick is running.
    pub async fn capture_now(&self) -> TickOutcome {
        run_tick(&self.shared).await.outcome
    }

    pub fn subscribe(&self) -> watch::Receiver<PollerStatus> {
        self.shared.status_tx.subscribe()
    }

    pub async fn status(&self) -> PollerStatus {
        let state = self.shared.state.lock().await;
        state.snapshot(self.shared.condition())
    }

    pub async fn is_enabled(&self) -> bool {
        self.shared.state.lock().await.enabled
    }

    pub async fn polling_interval(&self) -> Duration {
        self.shared.state.lock().await.polling_interval
    }

    /// Newest first.
    pub async fn history(&self) -> Vec<SegmentationResult> {
        self.shared.state.lock().await.history.to_vec()
    }

    pub async fn last_result(&self) -> Option<SegmentationResult> {
        self.shared.state.lock().await.last_result.clone()
    }

    pub async fn last_error(&self) -> Option<String> {
        self.shared.state.lock().await.last_error.clone()
    }

    pub fn condition(&self) -> Option<PollerCondition> {
        self.shared.condition()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.shared.config
    }

    fn spawn_loop(&self, interval: Duration) -> LoopHandle {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(polling_loop(
            Arc::clone(&self.shared),
            interval,
            cancel.clone(),
        ));
        LoopHandle {
            handle,
            cancel: cancel.drop_guard(),
        }
    }
}

async fn shutdown(running: LoopHandle) {
    drop(running.cancel);
    if let Err(err) = running.handle.await {
        if !err.is_cancelled() {
            log_warn!("polling loop task failed to join: {err}");
        }
    }
}
