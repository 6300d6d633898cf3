//! Session event log: one JSON object per line in `events.jsonl`.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::request::Flow;

/// Everything the orchestrator records about a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    SessionStarted {
        session_dir: String,
        text_model: String,
        image_model: String,
        video_model: String,
    },
    RequestState {
        flow: Flow,
        request_id: String,
        from: String,
        to: String,
    },
    Progress {
        flow: Flow,
        request_id: String,
        status: String,
        message: String,
    },
    ReceiptWritten {
        flow: Flow,
        request_id: String,
        receipt_path: String,
    },
    TurnIndexed {
        id: String,
    },
    TurnIndexFailed {
        id: String,
        error: String,
    },
    HistoryCleared,
}

impl SessionEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SessionStarted { .. } => "session_started",
            Self::RequestState { .. } => "request_state",
            Self::Progress { .. } => "progress",
            Self::ReceiptWritten { .. } => "receipt_written",
            Self::TurnIndexed { .. } => "turn_indexed",
            Self::TurnIndexFailed { .. } => "turn_index_failed",
            Self::HistoryCleared => "history_cleared",
        }
    }
}

/// A logged event with the envelope the writer adds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub session_id: String,
    pub ts: String,
    #[serde(flatten)]
    pub event: SessionEvent,
}

/// Appends [`SessionEvent`]s for one session. Clones share the open file.
#[derive(Debug, Clone)]
pub struct EventWriter {
    shared: Arc<Shared>,
}

#[derive(Debug)]
struct Shared {
    path: PathBuf,
    session_id: String,
    file: Mutex<Option<File>>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(Shared {
                path: path.into(),
                session_id: session_id.into(),
                file: Mutex::new(None),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    pub fn session_id(&self) -> &str {
        &self.shared.session_id
    }

    pub fn record(&self, event: SessionEvent) -> anyhow::Result<EventRecord> {
        let record = EventRecord {
            session_id: self.shared.session_id.clone(),
            ts: now_utc_iso(),
            event,
        };
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');

        let mut slot = self.shared.file.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(open_append(&self.shared.path)?);
        }
        if let Some(file) = slot.as_mut() {
            file.write_all(&line)
                .with_context(|| format!("failed to append to {}", self.shared.path.display()))?;
        }
        Ok(record)
    }
}

fn open_append(path: &Path) -> anyhow::Result<File> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open {}", path.display()))
}

/// Reads a log back, skipping lines that are not events.
pub fn read_events(path: &Path) -> anyhow::Result<Vec<EventRecord>> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut records = Vec::new();
    for line in BufReader::new(file).lines() {
        if let Ok(record) = serde_json::from_str::<EventRecord>(&line?) {
            records.push(record);
        }
    }
    Ok(records)
}

pub fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
