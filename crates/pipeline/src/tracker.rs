//! Shared status snapshot and bounded import log.
//!
//! [`StatusTracker`] owns the single [`ImportStatus`] and the log ring
//! buffer behind one `RwLock`. Readers always receive clones; the lock is
//! never exposed. Only the orchestrator mutates the tracker; any number of
//! HTTP handlers may read it concurrently.

use std::collections::VecDeque;

use chrono::Utc;
use dumpsync_core::config::DEFAULT_LOG_BUFFER_SIZE;
use dumpsync_core::status::{
    FilesInfo, ImportLogEntry, ImportStatus, LogLevel, RunStatus, STEP_FINALIZE, STEP_INIT,
};
use dumpsync_core::types::Timestamp;
use tokio::sync::RwLock;

struct TrackerState {
    status: ImportStatus,
    logs: VecDeque<ImportLogEntry>,
}

/// Concurrency-safe holder of the current run status and recent log entries.
///
/// Designed to be wrapped in `Arc` and shared between the orchestrator, the
/// scheduler task and the HTTP adapter.
pub struct StatusTracker {
    state: RwLock<TrackerState>,
    capacity: usize,
}

impl StatusTracker {
    /// Create a tracker whose log keeps at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: RwLock::new(TrackerState {
                status: ImportStatus::default(),
                logs: VecDeque::with_capacity(capacity),
            }),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Snapshot of the current status.
    pub async fn status(&self) -> ImportStatus {
        self.state.read().await.status.clone()
    }

    /// Up to `limit` most recent entries, oldest first.
    pub async fn logs(&self, limit: usize) -> Vec<ImportLogEntry> {
        let state = self.state.read().await;
        let skip = state.logs.len().saturating_sub(limit);
        state.logs.iter().skip(skip).cloned().collect()
    }

    // -----------------------------------------------------------------------
    // Log appends
    // -----------------------------------------------------------------------

    /// Append an entry, evicting the oldest one at capacity.
    pub async fn append(&self, entry: ImportLogEntry) {
        emit(&entry);
        let mut state = self.state.write().await;
        push_bounded(&mut state.logs, entry, self.capacity);
    }

    pub async fn log(&self, level: LogLevel, step: &str, message: impl Into<String>) {
        self.append(ImportLogEntry::new(level, step, message)).await;
    }

    // -----------------------------------------------------------------------
    // Status mutations
    // -----------------------------------------------------------------------

    /// Atomically set the current step and progress and append an INFO entry.
    ///
    /// Progress never decreases within a run; lower values are ignored.
    pub async fn update_status(&self, step: &str, message: impl Into<String>, progress: u8) {
        let entry = ImportLogEntry::new(LogLevel::Info, step, message);
        emit(&entry);

        let mut state = self.state.write().await;
        state.status.current_step = step.to_string();
        state.status.progress = state.status.progress.max(progress.min(100));
        push_bounded(&mut state.logs, entry, self.capacity);
    }

    /// Reset the snapshot for a new run and mark it running.
    pub async fn begin_run(&self, max_retries: u32) -> Timestamp {
        let now = Utc::now();
        let entry = ImportLogEntry::new(LogLevel::Info, STEP_INIT, "Import run started");
        emit(&entry);

        let mut state = self.state.write().await;
        let status = &mut state.status;
        status.status = RunStatus::Running;
        status.progress = 0;
        status.current_step = STEP_INIT.to_string();
        status.started_at = Some(now);
        status.completed_at = None;
        status.retry_count = 0;
        status.max_retries = max_retries;
        status.error = None;
        status.skip_reason = None;
        status.files_info = None;
        push_bounded(&mut state.logs, entry, self.capacity);
        now
    }

    /// Count one failed attempt of a transient stage and log it at WARN.
    ///
    /// Returns the updated retry count, which never exceeds `max_retries`.
    pub async fn record_retry(&self, entry: ImportLogEntry) -> u32 {
        let entry = ImportLogEntry {
            level: LogLevel::Warn,
            ..entry
        };
        emit(&entry);

        let mut state = self.state.write().await;
        let status = &mut state.status;
        status.retry_count = (status.retry_count + 1).min(status.max_retries);
        let count = status.retry_count;
        push_bounded(&mut state.logs, entry, self.capacity);
        count
    }

    /// Remaining failed attempts the current run may spend.
    pub async fn retry_budget(&self) -> u32 {
        let state = self.state.read().await;
        state
            .status
            .max_retries
            .saturating_sub(state.status.retry_count)
    }

    /// Apply `f` to the run's file bookkeeping, creating it on first use.
    pub async fn update_files_info<F>(&self, f: F)
    where
        F: FnOnce(&mut FilesInfo),
    {
        let mut state = self.state.write().await;
        f(state.status.files_info.get_or_insert_with(FilesInfo::default));
    }

    pub async fn set_next_scheduled(&self, next: Option<Timestamp>) {
        self.state.write().await.status.next_scheduled = next;
    }

    pub async fn set_last_success(&self, at: Option<Timestamp>) {
        self.state.write().await.status.last_success = at;
    }

    // -----------------------------------------------------------------------
    // Terminal transitions
    // -----------------------------------------------------------------------

    /// Mark the run successful; `at` is the checkpoint timestamp so status
    /// and checkpoint agree on when the last success happened.
    pub async fn finish_success(&self, message: impl Into<String>, at: Timestamp) {
        let now = Utc::now();
        let entry = ImportLogEntry::new(LogLevel::Info, STEP_FINALIZE, message);
        emit(&entry);

        let mut state = self.state.write().await;
        let status = &mut state.status;
        status.status = RunStatus::Success;
        status.progress = 100;
        status.current_step = STEP_FINALIZE.to_string();
        status.completed_at = Some(now);
        status.last_success = Some(at);
        push_bounded(&mut state.logs, entry, self.capacity);
    }

    pub async fn finish_skipped(&self, reason: impl Into<String>) {
        let reason = reason.into();
        let entry = ImportLogEntry::new(
            LogLevel::Info,
            STEP_FINALIZE,
            format!("Import skipped: {reason}"),
        );
        emit(&entry);

        let mut state = self.state.write().await;
        let status = &mut state.status;
        status.status = RunStatus::Skipped;
        status.progress = 100;
        status.current_step = STEP_FINALIZE.to_string();
        status.completed_at = Some(Utc::now());
        status.skip_reason = Some(reason);
        push_bounded(&mut state.logs, entry, self.capacity);
    }

    pub async fn finish_failed(&self, step: &str, error: impl Into<String>) {
        let error = error.into();
        let entry = ImportLogEntry::new(LogLevel::Error, step, "Import failed")
            .with_error(&error);
        emit(&entry);

        let mut state = self.state.write().await;
        let status = &mut state.status;
        status.status = RunStatus::Failed;
        status.current_step = step.to_string();
        status.completed_at = Some(Utc::now());
        status.error = Some(error);
        push_bounded(&mut state.logs, entry, self.capacity);
    }
}

impl Default for StatusTracker {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_BUFFER_SIZE)
    }
}

fn push_bounded(logs: &mut VecDeque<ImportLogEntry>, entry: ImportLogEntry, capacity: usize) {
    while logs.len() >= capacity {
        logs.pop_front();
    }
    logs.push_back(entry);
}

/// Mirror a log entry to `tracing` at the matching level.
fn emit(entry: &ImportLogEntry) {
    let error = entry.error.as_deref().unwrap_or_default();
    match entry.level {
        LogLevel::Info => tracing::info!(step = %entry.step, "{}", entry.message),
        LogLevel::Debug => tracing::debug!(step = %entry.step, "{}", entry.message),
        LogLevel::Warn => tracing::warn!(step = %entry.step, error, "{}", entry.message),
        LogLevel::Error => tracing::error!(step = %entry.step, error, "{}", entry.message),
    }
}
