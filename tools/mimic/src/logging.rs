use crate::config::LoggingConfig;
use crate::errors::MimicError;
use serde::Serialize;
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

pub const DEFAULT_DISK_BUDGET_BYTES: u64 = 50 * 1024 * 1024;
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 4096;

#[derive(Debug, Clone)]
pub struct JsonlLogger {
    pub path: PathBuf,
    pub max_payload_bytes: usize,
    pub budget_bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEvent<'a> {
    pub level: &'a str,
    pub event_type: &'a str,
    pub payload: Value,
}

impl JsonlLogger {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            budget_bytes: DEFAULT_DISK_BUDGET_BYTES,
        }
    }

    pub fn from_config(config: &LoggingConfig) -> Option<Self> {
        config.path.as_ref().map(|path| Self {
            path: path.clone(),
            max_payload_bytes: config.max_payload_bytes,
            budget_bytes: config.budget_bytes,
        })
    }

    pub fn append(&self, event: &LogEvent<'_>) -> Result<(), MimicError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| MimicError::Io(e.to_string()))?;
        }
        let truncated = truncate_json(event.payload.clone(), self.max_payload_bytes);
        let line = serde_json::to_string(&LogEvent {
            level: event.level,
            event_type: event.event_type,
            payload: truncated,
        })
        .map_err(|e| MimicError::Io(e.to_string()))?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| MimicError::Io(e.to_string()))?;
        file.write_all(line.as_bytes())
            .map_err(|e| MimicError::Io(e.to_string()))?;
        file.write_all(b"\n")
            .map_err(|e| MimicError::Io(e.to_string()))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            prune_to_budget(parent, self.budget_bytes, &self.path)?;
        }

        Ok(())
    }
}

/// Appends to `logger` if there is one. Logging failures are dropped so a
/// full disk never aborts playback or recording.
pub fn emit(logger: Option<&JsonlLogger>, level: &str, event_type: &str, payload: Value) {
    if let Some(logger) = logger {
        let _ = logger.append(&LogEvent {
            level,
            event_type,
            payload,
        });
    }
}

/// Deletes the oldest files beside the active log until the directory fits
/// in `budget_bytes`. The active log itself is never deleted.
fn prune_to_budget(dir: &Path, budget_bytes: u64, active: &Path) -> Result<Vec<PathBuf>, MimicError> {
    let mut files = fs::read_dir(dir)
        .map_err(|e| MimicError::Io(e.to_string()))?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let meta = entry.metadata().ok().filter(|meta| meta.is_file())?;
            let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            Some((modified, meta.len(), entry.path()))
        })
        .collect::<Vec<_>>();
    files.sort();

    let mut total = files.iter().map(|(_, len, _)| len).sum::<u64>();
    let mut deleted = Vec::new();
    for (_, len, path) in files {
        if total <= budget_bytes {
            break;
        }
        if path == active {
            continue;
        }
        fs::remove_file(&path).map_err(|e| MimicError::Io(e.to_string()))?;
        total = total.saturating_sub(len);
        deleted.push(path);
    }
    Ok(deleted)
}

fn truncate_json(value: Value, max_bytes: usize) -> Value {
    let rendered = serde_json::to_string(&value).unwrap_or_default();
    if rendered.len() <= max_bytes {
        return value;
    }
    let mut cut = max_bytes.saturating_sub(3);
    while !rendered.is_char_boundary(cut) {
        cut -= 1;
    }
    Value::String(format!("{}...", &rendered[..cut]))
}
