use std::sync::Arc;
use std::time::Instant;

use base64::{engine::general_purpose, Engine as _};

use crate::config::{ApiKey, PipelineConfig};
use crate::frames::Frame;
use crate::models::{MaskImage, SegmentationResult};
use crate::utils::SingleFlight;

use super::error::SegmentationError;
use super::mask::tighten_to_opaque;
use super::transport::{HttpReply, HttpTransport, ReqwestTransport};
use super::wire::{parse_submit_reply, QueueStatus, QueueTicket, SegmentRequest, StatusResponse, SubmitReply};

// Set to false to silence per-request logging
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

/// fal.ai SAM3 client: one image plus one prompt in, at most one result out.
///
/// Hides the two response shapes (direct result vs. queue ticket) behind
/// [`SegmentationClient::segment`]. Only one `segment` call may be in flight
/// per client; a concurrent call fails immediately with
/// [`SegmentationError::Busy`].
pub struct SegmentationClient {
    config: PipelineConfig,
    api_key: Option<ApiKey>,
    transport: Arc<dyn HttpTransport>,
    in_flight: SingleFlight,
}

impl SegmentationClient {
    pub fn new(config: PipelineConfig, api_key: Option<ApiKey>) -> Result<Self, SegmentationError> {
        let transport = ReqwestTransport::new()?;
        Ok(Self::with_transport(config, api_key, Arc::new(transport)))
    }

    pub fn with_transport(
        config: PipelineConfig,
        api_key: Option<ApiKey>,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        Self {
            config,
            api_key,
            transport,
            in_flight: SingleFlight::new(),
        }
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.is_held()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Runs one segmentation. `Ok(None)` means the API found nothing for the prompt.
    pub async fn segment(
        &self,
        frame: &Frame,
        prompt: &str,
    ) -> Result<Option<SegmentationResult>, SegmentationError> {
        let _permit = self
            .in_flight
            .try_acquire()
            .ok_or(SegmentationError::Busy)?;
        let api_key = self.api_key.as_ref().ok_or(SegmentationError::MissingApiKey)?;
        let authorization = format!("Key {}", api_key.as_str());

        let image_url = encode_data_uri(frame)?;
        let request = SegmentRequest {
            image_url: &image_url,
            prompt,
            apply_mask: self.config.apply_mask,
            output_format: self.config.output_format,
            sync_mode: self.config.sync_mode,
        };
        let body = serde_json::to_value(&request)?;

        let started = Instant::now();
        let reply = self
            .transport
            .post_json(
                &self.config.submit_url(),
                &authorization,
                &body,
                self.config.request_timeout,
            )
            .await?;
        ensure_success(&reply)?;

        let result = match parse_submit_reply(&reply.body)? {
            SubmitReply::Completed(response) => response.into_result(),
            SubmitReply::Queued(ticket) => {
                log_debug!(
                    "segmentation queued as {} (position {:?})",
                    ticket.request_id,
                    ticket.queue_position
                );
                self.await_queued(&ticket, &authorization).await?
            }
        };

        log_info!(
            "segmentation for {prompt:?} finished in {}ms (detection: {})",
            started.elapsed().as_millis(),
            result.is_some()
        );
        Ok(result)
    }

    /// Polls the queue at a fixed interval until the request completes,
    /// fails, or the attempt budget runs out.
    async fn await_queued(
        &self,
        ticket: &QueueTicket,
        authorization: &str,
    ) -> Result<Option<SegmentationResult>, SegmentationError> {
        let status_url = ticket
            .status_url
            .clone()
            .unwrap_or_else(|| self.config.status_url(&ticket.request_id));
        let mut response_url = ticket.response_url.clone();

        for attempt in 1..=self.config.queue_max_attempts {
            tokio::time::sleep(self.config.queue_poll_interval).await;

            let reply = self
                .transport
                .get(&status_url, Some(authorization), self.config.request_timeout)
                .await?;
            ensure_success(&reply)?;
            let status: StatusResponse = serde_json::from_slice(&reply.body)?;

            match status.status {
                QueueStatus::Completed => {
                    if status.response_url.is_some() {
                        response_url = status.response_url;
                    }
                    let url = response_url
                        .unwrap_or_else(|| self.config.result_url(&ticket.request_id));
                    return self.fetch_result(&url, authorization).await;
                }
                QueueStatus::Failed => {
                    return Err(SegmentationError::RequestFailed {
                        request_id: ticket.request_id.clone(),
                        message: status.error.unwrap_or_else(|| "status FAILED".into()),
                    });
                }
                other => {
                    log_debug!(
                        "request {} still {:?} (attempt {attempt}/{})",
                        ticket.request_id,
                        other,
                        self.config.queue_max_attempts
                    );
                }
            }
        }

        log_warn!(
            "request {} did not complete after {} status checks",
            ticket.request_id,
            self.config.queue_max_attempts
        );
        Err(SegmentationError::Timeout {
            attempts: self.config.queue_max_attempts,
        })
    }

    async fn fetch_result(
        &self,
        url: &str,
        authorization: &str,
    ) -> Result<Option<SegmentationResult>, SegmentationError> {
        let reply = self
            .transport
            .get(url, Some(authorization), self.config.request_timeout)
            .await?;
        ensure_success(&reply)?;
        match parse_submit_reply(&reply.body)? {
            SubmitReply::Completed(response) => Ok(response.into_result()),
            SubmitReply::Queued(ticket) => Err(SegmentationError::Decode(format!(
                "result endpoint returned another ticket ({})",
                ticket.request_id
            ))),
        }
    }

    /// Downloads a mask asset (`https:` or inline `data:` URL) and crops it
    /// to its visible content. Not covered by the single-flight guard.
    pub async fn download_mask(&self, url: &str) -> Result<MaskImage, SegmentationError> {
        let bytes = if let Some(encoded) = url.strip_prefix("data:") {
            decode_data_uri(encoded)?
        } else {
            let reply = self
                .transport
                .get(url, None, self.config.request_timeout)
                .await?;
            ensure_success(&reply)?;
            reply.body
        };

        let threshold = self.config.mask_alpha_threshold;
        let padding = self.config.mask_padding;
        tokio::task::spawn_blocking(move || tighten_to_opaque(bytes, threshold, padding))
            .await
            .map_err(|err| SegmentationError::Decode(format!("mask worker join failed: {err}")))?
    }
}

fn ensure_success(reply: &HttpReply) -> Result<(), SegmentationError> {
    if reply.is_success() {
        Ok(())
    } else {
        Err(SegmentationError::Api {
            status: reply.status,
            message: reply.text(),
        })
    }
}

fn encode_data_uri(frame: &Frame) -> Result<String, SegmentationError> {
    if frame.bytes().is_empty() {
        return Err(SegmentationError::InvalidImage("frame is empty".into()));
    }
    let mime = frame
        .mime_type()
        .ok_or_else(|| SegmentationError::InvalidImage("unrecognised image encoding".into()))?;
    let encoded = general_purpose::STANDARD.encode(frame.bytes());
    Ok(format!("data:{mime};base64,{encoded}"))
}

/// Decodes the part after `data:`, e.g. `image/png;base64,iVBOR...`.
fn decode_data_uri(rest: &str) -> Result<Vec<u8>, SegmentationError> {
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| SegmentationError::Decode("malformed data URI".into()))?;
    if !meta.ends_with(";base64") {
        return Err(SegmentationError::Decode(
            "only base64 data URIs are supported".into(),
        ));
    }
    general_purpose::STANDARD
        .decode(payload)
        .map_err(|err| SegmentationError::Decode(format!("data URI payload: {err}")))
}
