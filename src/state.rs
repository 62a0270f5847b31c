use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::retry::CancelToken;
use crate::whisper::WhisperRecord;

/// Whispers kept in memory for the control surface.
const WHISPER_KEEP: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Delivering,
    Collecting,
}

/// Outcome of the most recent automation run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub task: Phase,
    pub success: bool,
    /// Sets sent or payments claimed, depending on the task.
    pub completed: u32,
    pub cancelled: bool,
    pub finished_at: DateTime<Utc>,
}

pub struct AppStateInner {
    pub phase: Phase,
    pub config: Config,
    /// Stop signal for the running workflow; cleared when a new run starts.
    pub cancel: CancelToken,
    pub worker: Option<JoinHandle<()>>,
    pub last_run: Option<RunReport>,
    whispers: Vec<WhisperRecord>,
}

pub type AppState = Arc<Mutex<AppStateInner>>;

impl AppStateInner {
    pub fn new(config: Config) -> Self {
        Self {
            phase: Phase::Idle,
            config,
            cancel: CancelToken::new(),
            worker: None,
            last_run: None,
            whispers: Vec::new(),
        }
    }

    pub fn push_whisper(&mut self, record: WhisperRecord) {
        self.whispers.push(record);
        if self.whispers.len() > WHISPER_KEEP {
            let excess = self.whispers.len() - WHISPER_KEEP;
            self.whispers.drain(..excess);
        }
    }

    pub fn recent_whispers(&self, count: usize) -> Vec<WhisperRecord> {
        self.whispers.iter().rev().take(count).cloned().collect()
    }

    /// Newest-first sender names, deduplicated, at most `count`.
    pub fn latest_unique_names(&self, count: usize) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        let mut names = Vec::new();
        for record in self.whispers.iter().rev() {
            if seen.insert(record.name.clone()) {
                names.push(record.name.clone());
                if names.len() >= count {
                    break;
                }
            }
        }
        names
    }
}
