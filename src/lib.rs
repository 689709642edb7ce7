pub mod config;
pub mod db;
pub mod frames;
pub mod models;
pub mod poller;
pub mod segmentation;
pub mod settings;
pub mod utils;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use log::{info, warn};

use config::{ApiKey, PipelineConfig};
use db::Database;
use frames::FrameSource;
use models::SourceMode;
use poller::{PollerStatus, SegmentationPoller, StickerSink, TickOutcome};
use segmentation::{HttpTransport, ReqwestTransport, SegmentationClient};
use settings::{PollerSettings, SettingsStore};

pub const DATABASE_FILE: &str = "stickers.sqlite3";
pub const SETTINGS_FILE: &str = "settings.json";
pub const BUNDLED_CONFIG_FILE: &str = "config.json";

/// Installs `env_logger` at info level; `RUST_LOG` overrides. Safe to call twice.
pub fn init_logging() {
    let _ = env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .try_init();
}

/// Everything a host shell needs: the sticker library, persisted settings and
/// a poller wired to the segmentation client.
///
/// The command methods mirror what the UI can do, and each one writes the
/// new setting back to `settings.json`.
pub struct AppState {
    pub db: Database,
    pub settings: SettingsStore,
    pub client: Arc<SegmentationClient>,
    pub poller: SegmentationPoller,
}

impl AppState {
    /// Opens (or creates) the app data in `data_dir` using default pipeline
    /// settings, the resolved API key and the reqwest transport.
    pub async fn bootstrap(data_dir: &Path, source: Arc<dyn FrameSource>) -> Result<Self> {
        let api_key = ApiKey::resolve(Some(&data_dir.join(BUNDLED_CONFIG_FILE)));
        let transport = ReqwestTransport::new().context("failed to build HTTP client")?;
        Self::bootstrap_with(
            data_dir,
            PipelineConfig::default(),
            api_key,
            Arc::new(transport),
            source,
        )
        .await
    }

    pub async fn bootstrap_with(
        data_dir: &Path,
        config: PipelineConfig,
        api_key: Option<ApiKey>,
        transport: Arc<dyn HttpTransport>,
        source: Arc<dyn FrameSource>,
    ) -> Result<Self> {
        config.validate().context("invalid pipeline configuration")?;
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;

        let db = Database::new(data_dir.join(DATABASE_FILE))?;
        let settings = SettingsStore::new(data_dir.join(SETTINGS_FILE))?;

        match &api_key {
            Some(key) => info!("fal.ai API key loaded ({:?})", key.source()),
            None => warn!("No fal.ai API key configured; segmentation is disabled"),
        }

        let client = Arc::new(SegmentationClient::with_transport(
            config.clone(),
            api_key,
            transport,
        ));
        let sink: Arc<dyn StickerSink> = Arc::new(db.clone());
        let poller = SegmentationPoller::new(config, Arc::clone(&client), source, Some(sink));

        let state = Self {
            db,
            settings,
            client,
            poller,
        };
        state.apply_settings(&state.settings.poller()).await;
        Ok(state)
    }

    async fn apply_settings(&self, saved: &PollerSettings) {
        self.poller.set_prompt(saved.prompt.clone()).await;
        self.poller.set_source_mode(saved.source_mode).await;
        self.poller.set_auto_save(saved.auto_save_enabled).await;
        self.poller
            .set_polling_interval(saved.polling_interval_secs)
            .await;
        if saved.enabled {
            info!("Resuming segmentation polling from saved settings");
            self.poller.start().await;
        }
    }

    pub async fn start_polling(&self) -> Result<PollerStatus> {
        self.poller.start().await;
        self.settings.modify_poller(|s| s.enabled = true)?;
        Ok(self.poller.status().await)
    }

    pub async fn stop_polling(&self) -> Result<PollerStatus> {
        self.poller.stop().await;
        self.settings.modify_poller(|s| s.enabled = false)?;
        Ok(self.poller.status().await)
    }

    /// Returns the interval actually applied, in seconds.
    pub async fn set_polling_interval(&self, seconds: f64) -> Result<f64> {
        let applied = self.poller.set_polling_interval(seconds).await.as_secs_f64();
        self.settings
            .modify_poller(|s| s.polling_interval_secs = applied)?;
        Ok(applied)
    }

    pub async fn set_prompt(&self, prompt: &str) -> Result<()> {
        self.poller.set_prompt(prompt).await;
        self.settings
            .modify_poller(|s| s.prompt = prompt.to_string())?;
        Ok(())
    }

    pub async fn set_source_mode(&self, mode: SourceMode) -> Result<()> {
        self.poller.set_source_mode(mode).await;
        self.settings.modify_poller(|s| s.source_mode = mode)?;
        Ok(())
    }

    pub async fn set_auto_save(&self, enabled: bool) -> Result<()> {
        self.poller.set_auto_save(enabled).await;
        self.settings
            .modify_poller(|s| s.auto_save_enabled = enabled)?;
        Ok(())
    }

    pub async fn clear_history(&self) {
        self.poller.clear_history().await;
    }

    pub async fn capture_now(&self) -> TickOutcome {
        self.poller.capture_now().await
    }

    /// Stops the loop without touching the saved `enabled` flag, so the next
    /// launch resumes where the user left off.
    pub async fn shutdown(&self) {
        self.poller.stop().await;
    }
}
