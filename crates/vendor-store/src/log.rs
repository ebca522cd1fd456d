use crate::persist::PersistenceError;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// One line of the scan log. Serialized with an `event` discriminator.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LogEntry {
    ScanStarted { session: String, relays: Vec<String>, filters: usize },
    RelayConnected { relay: String },
    RelayFailed { relay: String, error: String },
    RelayEose { relay: String, events: u64 },
    RelayClosed { relay: String, events: u64 },
    VendorDiscovered { pubkey: String },
    VendorUpdated { pubkey: String },
    MergeDropped { relay: String, event_id: String, reason: String },
    ProtocolAnomaly { relay: String, reason: String },
    ScanFinished {
        session: String,
        phase: String,
        outcome: String,
        relays_ok: usize,
        relays_partial: usize,
        relays_failed: usize,
        events: u64,
        duplicates: u64,
        dropped: u64,
        vendors_discovered: usize,
        vendors_updated: usize,
        total_vendors: usize,
    },
}

impl LogEntry {
    pub fn level(&self) -> &'static str {
        match self {
            LogEntry::RelayFailed { .. }
            | LogEntry::MergeDropped { .. }
            | LogEntry::ProtocolAnomaly { .. } => "warn",
            _ => "info",
        }
    }
}

/// Append-only JSON-lines log kept next to the vendor file. Never truncated.
#[derive(Debug)]
pub struct ScanLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl ScanLog {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|source| PersistenceError::Write { path: parent.to_path_buf(), source })?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| PersistenceError::Write { path: path.clone(), source })?;
        Ok(ScanLog { path, file: Mutex::new(file) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, entry: &LogEntry) -> Result<(), PersistenceError> {
        let mut line = Map::new();
        line.insert("ts".into(), Value::String(now_rfc3339()));
        line.insert("level".into(), Value::String(entry.level().into()));
        if let Value::Object(fields) = serde_json::to_value(entry)? {
            line.extend(fields);
        }
        let mut text = serde_json::to_string(&Value::Object(line))?;
        text.push('\n');

        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        file.write_all(text.as_bytes())
            .and_then(|()| file.flush())
            .map_err(|source| PersistenceError::Write { path: self.path.clone(), source })
    }
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}
