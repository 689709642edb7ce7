use std::sync::Arc;

use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::frames::Frame;
use crate::models::{SegmentationResult, SourceMode};
use crate::segmentation::SegmentationError;

use super::controller::PollerShared;
use super::state::{SkipReason, TickOutcome};

// Set to false to silence per-tick logging
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

pub(super) struct Tick {
    pub(super) outcome: TickOutcome,
    /// True when the tick spent the fixed photo capture delay.
    pub(super) waited_for_photo: bool,
}

impl Tick {
    fn skipped(reason: SkipReason) -> Self {
        Self {
            outcome: TickOutcome::Skipped(reason),
            waited_for_photo: false,
        }
    }
}

pub(super) async fn polling_loop(
    shared: Arc<PollerShared>,
    interval: Duration,
    cancel_token: CancellationToken,
) {
    let photo_delay = shared.config.photo_capture_delay;

    loop {
        let cycle = async {
            let tick = run_tick(&shared).await;
            log_tick(&tick.outcome);

            let pause = if tick.waited_for_photo {
                interval.saturating_sub(photo_delay)
            } else {
                interval
            };
            tokio::time::sleep(pause).await;
        };

        tokio::select! {
            _ = cycle => {}
            _ = cancel_token.cancelled() => {
                log_info!("polling loop shutting down");
                break;
            }
        }
    }
}

fn log_tick(outcome: &TickOutcome) {
    match outcome {
        TickOutcome::Skipped(reason) => log_debug!("tick skipped: {reason:?}"),
        TickOutcome::NoDetection => log_debug!("tick finished with no detection"),
        TickOutcome::Produced(id) => log_info!("tick produced result {id}"),
        TickOutcome::Failed(message) => log_warn!("tick failed: {message}"),
    }
}

/// One poll cycle: pick a frame, submit it, fold the outcome into state.
pub(super) async fn run_tick(shared: &Arc<PollerShared>) -> Tick {
    let (prompt, mode, auto_save) = {
        let state = shared.state.lock().await;
        (
            state.prompt.trim().to_string(),
            state.source_mode,
            state.auto_save_enabled,
        )
    };

    if prompt.is_empty() {
        return Tick::skipped(SkipReason::EmptyPrompt);
    }
    if !shared.client.has_api_key() {
        publish_current(shared).await;
        return Tick::skipped(SkipReason::MissingApiKey);
    }
    if !shared.source.state().is_available() {
        publish_current(shared).await;
        return Tick::skipped(SkipReason::SourceUnavailable);
    }

    // Taken before a photo capture so a busy cycle never fires the shutter.
    let Some(_permit) = shared.in_flight.try_acquire() else {
        return Tick::skipped(SkipReason::InFlight);
    };

    let (frame, waited_for_photo) = match mode {
        SourceMode::LatestVideoFrame => (shared.source.latest_frame(), false),
        SourceMode::FreshPhotoCapture => (capture_photo(shared).await, true),
    };
    let Some(frame) = frame else {
        return Tick {
            outcome: TickOutcome::Skipped(SkipReason::NoFrame),
            waited_for_photo,
        };
    };

    set_processing(shared, true).await;
    let submitted = submit(shared, &frame, &prompt).await;

    let outcome = {
        let mut state = shared.state.lock().await;
        state.is_processing = false;

        let outcome = match submitted {
            Ok(Some(result)) => {
                let id = result.id();
                state.last_error = None;
                state.last_result = Some(result.clone());
                state.history.push(result.clone());
                if auto_save {
                    persist(shared, result, prompt);
                }
                TickOutcome::Produced(id)
            }
            Ok(None) => {
                state.last_error = None;
                TickOutcome::NoDetection
            }
            Err(err) if err.is_busy() => TickOutcome::Skipped(SkipReason::Busy),
            Err(err) => {
                let message = err.to_string();
                state.last_error = Some(message.clone());
                TickOutcome::Failed(message)
            }
        };
        shared.publish(&state);
        outcome
    };

    Tick {
        outcome,
        waited_for_photo,
    }
}

/// Asks for a fresh photo and always spends exactly the capture delay, so
/// the caller can subtract it from the interval.
async fn capture_photo(shared: &PollerShared) -> Option<Frame> {
    let deadline = Instant::now() + shared.config.photo_capture_delay;
    let photo = tokio::time::timeout_at(deadline, shared.source.capture_photo())
        .await
        .ok()
        .flatten();
    tokio::time::sleep_until(deadline).await;
    if photo.is_none() {
        log_debug!("no photo arrived within {:?}", shared.config.photo_capture_delay);
    }
    photo
}

async fn submit(
    shared: &PollerShared,
    frame: &Frame,
    prompt: &str,
) -> Result<Option<SegmentationResult>, SegmentationError> {
    let Some(result) = shared.client.segment(frame, prompt).await? else {
        return Ok(None);
    };

    match result.mask_url().map(str::to_owned) {
        Some(url) => {
            let mask = shared.client.download_mask(&url).await?;
            Ok(Some(result.with_mask_image(mask)))
        }
        None => Ok(Some(result)),
    }
}

fn persist(shared: &PollerShared, result: SegmentationResult, prompt: String) {
    let Some(sink) = shared.sink.clone() else {
        return;
    };
    tokio::spawn(async move {
        match sink.save_result(&result, &prompt).await {
            Ok(sticker_id) => log_debug!("auto-saved result {} as sticker {sticker_id}", result.id()),
            Err(err) => log_error!("failed to auto-save result {}: {err:?}", result.id()),
        }
    });
}

async fn set_processing(shared: &PollerShared, processing: bool) {
    let mut state = shared.state.lock().await;
    state.is_processing = processing;
    shared.publish(&state);
}

async fn publish_current(shared: &PollerShared) {
    let state = shared.state.lock().await;
    shared.publish(&state);
}
