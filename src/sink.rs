//! Persistence of variant records and run summaries.
//!
//! [`JsonFileSink`] writes under its output directory:
//!
//! ```text
//! conversation_log/index{prefix}_{timestamp}.json   one CaseRunRecord per variant
//! log/index{id}_{timestamp}.json                    one RunSummary per dataset
//! ```
//!
//! Each file holds a JSON array that is read, extended and rewritten on every
//! append. The timestamp is fixed when the sink is created.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::SinkError;
use crate::pipeline::{CaseRunRecord, RunSummary};

/// Destination for evaluation results.
pub trait ResultSink: Send + Sync {
    fn append_record(&self, record: &CaseRunRecord) -> Result<(), SinkError>;

    fn append_summary(&self, summary: &RunSummary) -> Result<(), SinkError>;
}

/// Sink writing JSON arrays to the local filesystem.
pub struct JsonFileSink {
    root: PathBuf,
    timestamp: String,
    write_lock: Mutex<()>,
}

impl JsonFileSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_started_at(root, Utc::now())
    }

    /// Creates a sink whose file names use `started_at`.
    pub fn with_started_at(root: impl Into<PathBuf>, started_at: DateTime<Utc>) -> Self {
        Self {
            root: root.into(),
            timestamp: started_at.format("%Y-%m-%d_%H-%M-%S").to_string(),
            write_lock: Mutex::new(()),
        }
    }

    /// Conversation log for cases whose index starts with `prefix`.
    pub fn conversation_path(&self, prefix: &str) -> PathBuf {
        self.root
            .join("conversation_log")
            .join(format!("index{}_{}.json", prefix, self.timestamp))
    }

    /// Run log for dataset `id`.
    pub fn summary_path(&self, id: &str) -> PathBuf {
        self.root
            .join("log")
            .join(format!("index{}_{}.json", id, self.timestamp))
    }

    fn append<T: Serialize>(&self, path: &Path, item: &T) -> Result<(), SinkError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut items: Vec<serde_json::Value> = match std::fs::read_to_string(path) {
            Ok(content) if !content.trim().is_empty() => {
                match serde_json::from_str::<serde_json::Value>(&content)? {
                    serde_json::Value::Array(items) => items,
                    other => vec![other],
                }
            }
            Ok(_) => Vec::new(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        items.push(serde_json::to_value(item)?);

        std::fs::write(path, serde_json::to_string_pretty(&items)?)?;
        debug!(path = %path.display(), entries = items.len(), "Appended result");
        Ok(())
    }

    /// Reads back every entry of a JSON array file.
    pub fn read_all<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, SinkError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

impl ResultSink for JsonFileSink {
    fn append_record(&self, record: &CaseRunRecord) -> Result<(), SinkError> {
        let prefix = record.index.split('_').next().unwrap_or(&record.index);
        self.append(&self.conversation_path(prefix), record)
    }

    fn append_summary(&self, summary: &RunSummary) -> Result<(), SinkError> {
        self.append(&self.summary_path(&summary.index), summary)
    }
}
