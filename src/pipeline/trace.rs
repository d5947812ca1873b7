// Compile progress tracing
// Append-only JSONL trace file for monitoring long compile runs

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::compile::{CompileSummary, FolderOutcome, FolderProgress};
use crate::state::Dataset;

#[derive(Debug, Error)]
pub enum TraceError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// A single line of the trace file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEntry {
    /// RFC 3339 timestamp of when this entry was created
    pub timestamp: String,

    /// "noise", "mono", "poly", "shuffle:training", ...
    pub stage: String,

    /// Progress within the stage [0.0, 1.0]
    pub progress: f32,

    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl TraceEntry {
    pub fn new(stage: impl Into<String>, progress: f32, message: impl Into<String>) -> Self {
        TraceEntry {
            timestamp: Utc::now().to_rfc3339(),
            stage: stage.into(),
            progress: progress.clamp(0.0, 1.0),
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Entry for one handled candidate folder
    pub fn folder(progress: &FolderProgress) -> Self {
        let (message, data) = match progress.outcome {
            FolderOutcome::Committed { dataset, records } => (
                format!("{} -> {} ({} records)", progress.folder, dataset, records),
                serde_json::json!({
                    "folder": progress.folder,
                    "dataset": dataset,
                    "records": records,
                }),
            ),
            FolderOutcome::Skipped => (
                format!("{} already compiled", progress.folder),
                serde_json::json!({ "folder": progress.folder, "skipped": true }),
            ),
        };

        TraceEntry::new(progress.category.as_str(), progress.fraction() as f32, message)
            .with_data(data)
    }

    pub fn shuffle(dataset: Dataset, progress: f64) -> Self {
        TraceEntry::new(
            format!("shuffle:{}", dataset),
            progress as f32,
            format!("Shuffling {} dataset", dataset),
        )
    }

    pub fn summary(summary: &CompileSummary) -> Self {
        TraceEntry::new(
            "summary",
            1.0,
            format!(
                "{} folders compiled, {} skipped",
                summary.appended_folders(),
                summary.skipped_folders.len()
            ),
        )
        .with_data(serde_json::json!({
            "training_folders": summary.training_folders,
            "testing_folders": summary.testing_folders,
            "records": summary.records,
            "short_examples": summary.short_examples,
        }))
    }

    /// Serialize to JSON line (with newline)
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        let json = serde_json::to_string(self)?;
        Ok(format!("{}\n", json))
    }
}

/// Appends entries to a JSONL trace file, creating it on first write
pub struct TraceWriter {
    file_path: PathBuf,
}

impl TraceWriter {
    pub fn new(file_path: PathBuf) -> Self {
        TraceWriter { file_path }
    }

    pub fn write(&self, entry: &TraceEntry) -> Result<(), TraceError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_path)?;

        file.write_all(entry.to_json_line()?.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }
}

/// Read trace entries from a JSONL file
pub fn read_trace_file(path: &Path) -> Result<Vec<TraceEntry>, TraceError> {
    let contents = std::fs::read_to_string(path)?;
    let mut entries = Vec::new();

    for line in contents.lines() {
        if line.trim().is_empty() {
            continue;
        }
        entries.push(serde_json::from_str(line)?);
    }

    Ok(entries)
}
