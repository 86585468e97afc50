//! Run status, progress snapshot, and log entry types.
//!
//! These are the shapes served to operators through the status/log surface.
//! Field names are part of the external contract.

use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::files::FileMetadata;
use crate::types::Timestamp;

// ---------------------------------------------------------------------------
// Step names
// ---------------------------------------------------------------------------

pub const STEP_INIT: &str = "init";
pub const STEP_LIST: &str = "list";
pub const STEP_FRESHNESS: &str = "freshness";
pub const STEP_DOWNLOAD: &str = "download";
pub const STEP_EXTRACT: &str = "extract";
pub const STEP_IMPORT: &str = "import";
pub const STEP_FINALIZE: &str = "finalize";
pub const STEP_CLEANUP: &str = "cleanup";
pub const STEP_SCHEDULER: &str = "scheduler";

// ---------------------------------------------------------------------------
// Run status
// ---------------------------------------------------------------------------

/// Status of the current (or most recent) import run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    #[default]
    Idle,
    Running,
    Success,
    Failed,
    Skipped,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    /// Terminal states only transition back to `Running` on the next run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Skipped)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Log level
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
    Debug,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
            Self::Debug => "DEBUG",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Status snapshot
// ---------------------------------------------------------------------------

/// File bookkeeping for the current run, populated from the download stage on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilesInfo {
    pub remote_files: Vec<FileMetadata>,
    pub last_imported: Vec<FileMetadata>,
    pub downloaded: Vec<String>,
    pub extracted: Vec<String>,
    /// Target names loaded successfully.
    pub imported: Vec<String>,
}

/// Snapshot of the import pipeline state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportStatus {
    pub status: RunStatus,
    pub progress: u8,
    pub current_step: String,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub last_success: Option<Timestamp>,
    pub next_scheduled: Option<Timestamp>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub error: Option<String>,
    pub skip_reason: Option<String>,
    pub files_info: Option<FilesInfo>,
}

impl ImportStatus {
    pub fn is_running(&self) -> bool {
        self.status == RunStatus::Running
    }
}

// ---------------------------------------------------------------------------
// Log entry
// ---------------------------------------------------------------------------

/// One entry in the bounded import log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportLogEntry {
    pub timestamp: Timestamp,
    pub level: LogLevel,
    pub message: String,
    pub step: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Human-readable duration, e.g. `"1.25s"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
}

impl ImportLogEntry {
    pub fn new(level: LogLevel, step: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message: message.into(),
            step: step.into(),
            error: None,
            duration: None,
            file_size: None,
        }
    }

    pub fn with_error(mut self, error: impl std::fmt::Display) -> Self {
        self.error = Some(error.to_string());
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(format_duration(duration));
        self
    }

    pub fn with_file_size(mut self, bytes: u64) -> Self {
        self.file_size = Some(bytes);
        self
    }
}

/// Format a duration with millisecond precision (`"850ms"`, `"12.40s"`).
pub fn format_duration(d: Duration) -> String {
    if d < Duration::from_secs(1) {
        format!("{}ms", d.as_millis())
    } else {
        format!("{:.2}s", d.as_secs_f64())
    }
}
