use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use crate::models::SourceMode;

/// Poller settings as the user last left them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PollerSettings {
    pub enabled: bool,
    pub polling_interval_secs: f64,
    pub prompt: String,
    pub source_mode: SourceMode,
    pub auto_save_enabled: bool,
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            polling_interval_secs: 2.0,
            prompt: String::new(),
            source_mode: SourceMode::LatestVideoFrame,
            auto_save_enabled: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct UserSettings {
    poller: PollerSettings,
}

/// JSON-backed settings file. Every update is written through immediately.
pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<UserSettings>,
}

impl SettingsStore {
    /// Loads `path`. A missing file gives defaults; so does a corrupt one,
    /// which is overwritten on the next update.
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                warn!("Ignoring corrupt settings file {}: {err}", path.display());
                UserSettings::default()
            })
        } else {
            UserSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn poller(&self) -> PollerSettings {
        self.read().poller.clone()
    }

    /// Applies `change` to the poller settings and persists the result.
    pub fn modify_poller<F>(&self, change: F) -> Result<PollerSettings>
    where
        F: FnOnce(&mut PollerSettings),
    {
        let mut guard = self.write();
        change(&mut guard.poller);
        self.persist(&guard)?;
        Ok(guard.poller.clone())
    }

    fn read(&self) -> RwLockReadGuard<'_, UserSettings> {
        match self.data.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, UserSettings> {
        match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn persist(&self, data: &UserSettings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create settings directory {}", parent.display())
            })?;
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}
