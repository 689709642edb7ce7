use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Result};
use log::warn;
use serde::{Deserialize, Serialize};

/// Environment variable (and build-time variable) carrying the fal.ai key.
pub const API_KEY_ENV: &str = "FAL_KEY";

/// Output encoding requested from the segmentation API.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Png,
    Jpeg,
    Webp,
}

/// Tunables for the segmentation pipeline, built once and handed to the
/// client and the poller.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Lowest polling interval the poller accepts; smaller requests are raised to this
    pub min_polling_interval: Duration,
    pub default_polling_interval: Duration,

    /// Maximum number of results kept in the in-memory history
    pub history_capacity: usize,

    /// Per-request HTTP timeout
    pub request_timeout: Duration,

    /// Queue polling: fixed sleep between status checks, and how many checks before giving up
    pub queue_poll_interval: Duration,
    pub queue_max_attempts: u32,

    /// Fixed time budget for a fresh photo capture, absorbed from the polling interval
    pub photo_capture_delay: Duration,

    /// fal.ai endpoints
    pub queue_base_url: String,
    pub model_path: String,
    pub app_path: String,

    pub output_format: OutputFormat,
    pub apply_mask: bool,
    pub sync_mode: bool,

    /// Mask cropping: alpha strictly above this counts as opaque
    pub mask_alpha_threshold: u8,
    pub mask_padding: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            min_polling_interval: Duration::from_secs(1),
            default_polling_interval: Duration::from_secs(2),
            history_capacity: 50,
            request_timeout: Duration::from_secs(30),
            queue_poll_interval: Duration::from_millis(500),
            queue_max_attempts: 30,
            photo_capture_delay: Duration::from_secs(1),
            queue_base_url: "https://queue.fal.run".into(),
            model_path: "fal-ai/sam-3/image".into(),
            app_path: "fal-ai/sam-3".into(),
            output_format: OutputFormat::Png,
            apply_mask: true,
            sync_mode: false,
            mask_alpha_threshold: 10,
            mask_padding: 4,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.min_polling_interval.is_zero() {
            bail!("minimum polling interval must be greater than zero");
        }
        if self.default_polling_interval < self.min_polling_interval {
            bail!("default polling interval is below the minimum");
        }
        if self.history_capacity == 0 {
            bail!("history capacity must be at least 1");
        }
        if self.queue_max_attempts == 0 {
            bail!("queue polling needs at least one attempt");
        }
        if self.photo_capture_delay > self.min_polling_interval {
            bail!("photo capture delay must fit inside the minimum polling interval");
        }
        if self.queue_base_url.trim().is_empty() {
            bail!("queue base url is empty");
        }
        Ok(())
    }

    /// Converts a user-supplied interval in seconds, raising it to the floor.
    /// Non-finite input also maps to the floor.
    pub fn clamp_interval(&self, seconds: f64) -> Duration {
        if !seconds.is_finite() || seconds <= self.min_polling_interval.as_secs_f64() {
            return self.min_polling_interval;
        }
        Duration::from_secs_f64(seconds)
    }

    pub fn submit_url(&self) -> String {
        format!("{}/{}", self.queue_base_url.trim_end_matches('/'), self.model_path)
    }

    pub fn status_url(&self, request_id: &str) -> String {
        format!(
            "{}/{}/requests/{}/status",
            self.queue_base_url.trim_end_matches('/'),
            self.app_path,
            request_id
        )
    }

    pub fn result_url(&self, request_id: &str) -> String {
        format!(
            "{}/{}/requests/{}",
            self.queue_base_url.trim_end_matches('/'),
            self.app_path,
            request_id
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ApiKeySource {
    BuildTime,
    Environment,
    BundledConfig,
}

/// fal.ai credential. `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey {
    value: String,
    source: ApiKeySource,
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiKey")
            .field("value", &"<redacted>")
            .field("source", &self.source)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct BundledConfig {
    fal_api_key: Option<String>,
}

impl ApiKey {
    pub fn new(value: impl Into<String>, source: ApiKeySource) -> Self {
        Self {
            value: value.into(),
            source,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn source(&self) -> ApiKeySource {
        self.source
    }

    /// Build-time secret, then `FAL_KEY` from the environment, then the bundled
    /// config file. `None` means no key is configured anywhere.
    pub fn resolve(bundled_config: Option<&Path>) -> Option<Self> {
        Self::resolve_with(
            option_env!("FAL_KEY"),
            |name| std::env::var(name).ok(),
            bundled_config,
        )
    }

    pub fn resolve_with<F>(
        build_time: Option<&str>,
        env_lookup: F,
        bundled_config: Option<&Path>,
    ) -> Option<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = non_blank(build_time.map(str::to_string)) {
            return Some(Self::new(value, ApiKeySource::BuildTime));
        }
        if let Some(value) = non_blank(env_lookup(API_KEY_ENV)) {
            return Some(Self::new(value, ApiKeySource::Environment));
        }
        let path = bundled_config?;
        if !path.exists() {
            return None;
        }
        let parsed = fs::read_to_string(path)
            .map_err(anyhow::Error::from)
            .and_then(|raw| serde_json::from_str::<BundledConfig>(&raw).map_err(Into::into));
        match parsed {
            Ok(config) => non_blank(config.fal_api_key)
                .map(|value| Self::new(value, ApiKeySource::BundledConfig)),
            Err(err) => {
                warn!("Ignoring unreadable bundled config {}: {err}", path.display());
                None
            }
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
