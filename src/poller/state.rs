use std::time::Duration;

use serde::Serialize;
use uuid::Uuid;

use crate::models::{SegmentationResult, SourceMode};

use super::history::ResultHistory;

/// Configuration problems that stop the poller from doing useful work.
/// Reported separately from `last_error`, which only holds transient failures.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum PollerCondition {
    MissingApiKey,
    SourceUnavailable,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SkipReason {
    EmptyPrompt,
    MissingApiKey,
    SourceUnavailable,
    NoFrame,
    InFlight,
    Busy,
}

/// What a single poll cycle did.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Skipped(SkipReason),
    NoDetection,
    Produced(Uuid),
    Failed(String),
}

impl TickOutcome {
    pub fn is_skipped(&self) -> bool {
        matches!(self, TickOutcome::Skipped(_))
    }
}

/// Mutable poller state. Lives behind the poller's async mutex.
#[derive(Debug)]
pub struct PollerState {
    pub enabled: bool,
    pub polling_interval: Duration,
    pub prompt: String,
    pub source_mode: SourceMode,
    pub auto_save_enabled: bool,
    pub is_processing: bool,
    pub last_error: Option<String>,
    pub last_result: Option<SegmentationResult>,
    pub history: ResultHistory,
}

impl PollerState {
    pub fn new(polling_interval: Duration, history_capacity: usize) -> Self {
        Self {
            enabled: false,
            polling_interval,
            prompt: String::new(),
            source_mode: SourceMode::default(),
            auto_save_enabled: false,
            is_processing: false,
            last_error: None,
            last_result: None,
            history: ResultHistory::new(history_capacity),
        }
    }

    pub fn snapshot(&self, condition: Option<PollerCondition>) -> PollerStatus {
        PollerStatus {
            enabled: self.enabled,
            polling_interval_secs: self.polling_interval.as_secs_f64(),
            prompt: self.prompt.clone(),
            source_mode: self.source_mode,
            auto_save_enabled: self.auto_save_enabled,
            is_processing: self.is_processing,
            last_error: self.last_error.clone(),
            last_result: self.last_result.clone(),
            history_len: self.history.len(),
            condition,
        }
    }
}

/// Read-only view published to observers after every state change.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PollerStatus {
    pub enabled: bool,
    pub polling_interval_secs: f64,
    pub prompt: String,
    pub source_mode: SourceMode,
    pub auto_save_enabled: bool,
    pub is_processing: bool,
    pub last_error: Option<String>,
    pub last_result: Option<SegmentationResult>,
    pub history_len: usize,
    pub condition: Option<PollerCondition>,
}
