//! Import orchestration.
//!
//! [`ImportOrchestrator`] owns the run state machine
//! (`idle -> running -> success | failed | skipped`), the single-flight
//! guard shared by the scheduler and manual triggers, and the background
//! scheduler task.
//!
//! A run executes its stages strictly in sequence:
//!
//! 1. list remote files (retried)
//! 2. freshness check against the checkpoint (may skip the run)
//! 3. download selected files (retried, per file)
//! 4. extract archives and assign content files to targets (retried)
//! 5. load targets sequentially, aborting on the first failure
//! 6. save the checkpoint, invalidate the cache, clean staging
//!
//! Retries share one budget per run: every failed attempt of a transient
//! stage increments `retry_count`, and a stage gives up once the count
//! reaches `max_retries`.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use dumpsync_core::config::SyncConfig;
use dumpsync_core::error::SyncError;
use dumpsync_core::files::{FileMetadata, ImportRecord};
use dumpsync_core::freshness::evaluate;
use dumpsync_core::hashing::sha256_file;
use dumpsync_core::retry::retry_with_backoff;
use dumpsync_core::schedule::ImportSchedule;
use dumpsync_core::status::{
    format_duration, ImportLogEntry, ImportStatus, LogLevel, STEP_CLEANUP, STEP_DOWNLOAD,
    STEP_EXTRACT, STEP_FINALIZE, STEP_FRESHNESS, STEP_INIT, STEP_LIST, STEP_SCHEDULER,
};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cache::CacheInvalidator;
use crate::checkpoint::CheckpointStore;
use crate::extractor::{assign_targets, ArchiveExtractor, ExtractedFile};
use crate::loader::{DatabaseApplier, DatabaseLoader};
use crate::remote::RemoteSource;
use crate::staging::StagingArea;
use crate::tracker::StatusTracker;

/// Skip reason when the remote listing matched nothing.
pub const REASON_NO_REMOTE_FILES: &str = "no matching remote files found";

/// Terminal result of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Success,
    Skipped(String),
    Failed(SyncError),
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Skipped(_) => "skipped",
            Self::Failed(_) => "failed",
        }
    }
}

struct SchedulerHandle {
    cancel: CancellationToken,
    // Dropping the handle detaches the task; the token is what stops it.
    _task: JoinHandle<()>,
}

struct Inner {
    config: SyncConfig,
    source: Arc<dyn RemoteSource>,
    extractor: ArchiveExtractor,
    loader: DatabaseLoader,
    cache: Arc<dyn CacheInvalidator>,
    checkpoint: CheckpointStore,
    staging: StagingArea,
    tracker: Arc<StatusTracker>,
    guard: Arc<Mutex<()>>,
    scheduler: std::sync::Mutex<Option<SchedulerHandle>>,
}

/// Coordinates import runs. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct ImportOrchestrator {
    inner: Arc<Inner>,
}

impl ImportOrchestrator {
    pub fn new(
        config: SyncConfig,
        source: Arc<dyn RemoteSource>,
        applier: Arc<dyn DatabaseApplier>,
        cache: Arc<dyn CacheInvalidator>,
    ) -> Self {
        let tracker = Arc::new(StatusTracker::new(config.log_buffer_size));
        let inner = Inner {
            extractor: ArchiveExtractor::new(config.archive.clone()),
            loader: DatabaseLoader::new(applier, config.import_timeout),
            checkpoint: CheckpointStore::new(&config.staging.checkpoint_path),
            staging: StagingArea::new(&config.staging.dir),
            source,
            cache,
            tracker,
            guard: Arc::new(Mutex::new(())),
            scheduler: std::sync::Mutex::new(None),
            config,
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.config.enabled
    }

    pub fn tracker(&self) -> Arc<StatusTracker> {
        Arc::clone(&self.inner.tracker)
    }

    // -----------------------------------------------------------------------
    // Operational surface
    // -----------------------------------------------------------------------

    /// Snapshot of the current run status.
    pub async fn status(&self) -> ImportStatus {
        self.inner.tracker.status().await
    }

    /// Up to `limit` most recent log entries, oldest first.
    pub async fn logs(&self, limit: usize) -> Vec<ImportLogEntry> {
        self.inner.tracker.logs(limit).await
    }

    /// Validate the configuration, read the checkpoint and start the
    /// background scheduler.
    pub async fn start(&self) -> Result<(), SyncError> {
        if !self.inner.config.enabled {
            return Err(SyncError::ServiceDisabled);
        }
        self.inner.config.validate()?;
        let schedule = ImportSchedule::parse(&self.inner.config.schedule)?;

        if let Some(record) = self.load_checkpoint().await {
            if record.success {
                self.inner.tracker.set_last_success(Some(record.timestamp)).await;
            }
        }

        let next = schedule.next_after(Utc::now());
        {
            let mut slot = self.scheduler_slot()?;
            if slot.is_some() {
                return Err(SyncError::Configuration(
                    "Import scheduler already started".to_string(),
                ));
            }
            let cancel = CancellationToken::new();
            let task = tokio::spawn(self.clone().scheduler_loop(schedule.clone(), cancel.clone()));
            *slot = Some(SchedulerHandle {
                cancel,
                _task: task,
            });
        }

        self.inner.tracker.set_next_scheduled(next).await;
        let next_text = next
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "never".to_string());
        self.inner
            .tracker
            .log(
                LogLevel::Info,
                STEP_SCHEDULER,
                format!(
                    "Scheduler started with '{}', next run at {next_text}",
                    schedule.expression()
                ),
            )
            .await;
        Ok(())
    }

    /// Stop future scheduled runs. A run already in progress continues to
    /// its terminal state. Calling this when not started is a no-op.
    pub fn stop(&self) -> Result<(), SyncError> {
        if let Some(handle) = self.scheduler_slot()?.take() {
            handle.cancel.cancel();
            tracing::info!("Import scheduler stop requested");
        }
        Ok(())
    }

    /// Start a run on a background task.
    ///
    /// Returns [`SyncError::AlreadyRunning`] immediately if a run holds the
    /// guard, and [`SyncError::ServiceDisabled`] when imports are switched
    /// off. The run is already `running` when this returns `Ok`.
    pub async fn trigger_manual_import(&self) -> Result<(), SyncError> {
        let guard = self.acquire().await?;
        self.inner
            .tracker
            .log(LogLevel::Info, STEP_INIT, "Manual import triggered")
            .await;

        let this = self.clone();
        tokio::spawn(async move {
            let _guard = guard;
            let outcome = this.execute().await;
            tracing::info!(outcome = outcome.as_str(), "Manual import finished");
        });
        Ok(())
    }

    /// Run an import on the caller's task and wait for it to finish.
    pub async fn run_now(&self) -> Result<RunOutcome, SyncError> {
        let _guard = self.acquire().await?;
        Ok(self.execute().await)
    }

    /// Wait until no run holds the single-flight guard.
    pub async fn wait_idle(&self) {
        let _guard = self.inner.guard.lock().await;
    }

    // -----------------------------------------------------------------------
    // Scheduling
    // -----------------------------------------------------------------------

    async fn scheduler_loop(self, schedule: ImportSchedule, cancel: CancellationToken) {
        tracing::info!(schedule = schedule.expression(), "Import scheduler started");

        loop {
            let Some(next) = schedule.next_after(Utc::now()) else {
                tracing::warn!(
                    schedule = schedule.expression(),
                    "Schedule has no upcoming runs"
                );
                break;
            };
            self.inner.tracker.set_next_scheduled(Some(next)).await;
            let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    break;
                }
                _ = tokio::time::sleep(wait) => {
                    match self.run_now().await {
                        Ok(outcome) => {
                            tracing::info!(outcome = outcome.as_str(), "Scheduled import finished");
                        }
                        Err(SyncError::AlreadyRunning) => {
                            self.inner
                                .tracker
                                .log(
                                    LogLevel::Warn,
                                    STEP_SCHEDULER,
                                    "Scheduled import skipped: an import is already running",
                                )
                                .await;
                        }
                        Err(e) => {
                            self.inner
                                .tracker
                                .append(
                                    ImportLogEntry::new(
                                        LogLevel::Warn,
                                        STEP_SCHEDULER,
                                        "Scheduled import not started",
                                    )
                                    .with_error(&e),
                                )
                                .await;
                        }
                    }
                }
            }
        }

        self.inner.tracker.set_next_scheduled(None).await;
        self.inner
            .tracker
            .log(LogLevel::Info, STEP_SCHEDULER, "Scheduler stopped")
            .await;
    }

    fn scheduler_slot(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, Option<SchedulerHandle>>, SyncError> {
        self.inner
            .scheduler
            .lock()
            .map_err(|_| SyncError::Internal("Scheduler state lock poisoned".to_string()))
    }

    fn is_scheduling(&self) -> bool {
        self.scheduler_slot()
            .map(|slot| slot.is_some())
            .unwrap_or(false)
    }

    async fn refresh_next_scheduled(&self) {
        if !self.is_scheduling() {
            return;
        }
        let next = ImportSchedule::parse(&self.inner.config.schedule)
            .ok()
            .and_then(|s| s.next_after(Utc::now()));
        self.inner.tracker.set_next_scheduled(next).await;
    }

    // -----------------------------------------------------------------------
    // Run
    // -----------------------------------------------------------------------

    /// Take the single-flight guard and mark a new run as running.
    async fn acquire(&self) -> Result<OwnedMutexGuard<()>, SyncError> {
        if !self.inner.config.enabled {
            return Err(SyncError::ServiceDisabled);
        }
        let guard = Arc::clone(&self.inner.guard)
            .try_lock_owned()
            .map_err(|_| SyncError::AlreadyRunning)?;
        self.inner
            .tracker
            .begin_run(self.inner.config.retry.max_retries)
            .await;
        Ok(guard)
    }

    /// Drive one run to a terminal state. Must be called with the guard held.
    async fn execute(&self) -> RunOutcome {
        let outcome = match self.pipeline().await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.inner.tracker.finish_failed(e.step(), e.to_string()).await;
                if !self.inner.config.staging.keep_failed_files {
                    self.cleanup_staging().await;
                }
                RunOutcome::Failed(e)
            }
        };
        self.refresh_next_scheduled().await;
        outcome
    }

    async fn pipeline(&self) -> Result<RunOutcome, SyncError> {
        let inner = &*self.inner;
        let tracker = &inner.tracker;
        let started = Instant::now();

        inner.config.validate()?;
        let matcher = inner.config.target_matcher()?;
        inner.staging.prepare().await?;
        let last_import = self.load_checkpoint().await;

        // -- list ------------------------------------------------------------
        tracker
            .update_status(
                STEP_LIST,
                format!("Listing remote files on {}", inner.source.describe()),
                5,
            )
            .await;
        let remote = self
            .retrying(STEP_LIST, "Remote listing", || inner.source.list_files())
            .await?;
        tracker
            .update_status(
                STEP_LIST,
                format!("Found {} matching remote file(s)", remote.len()),
                10,
            )
            .await;

        if remote.is_empty() {
            tracker.finish_skipped(REASON_NO_REMOTE_FILES).await;
            return Ok(RunOutcome::Skipped(REASON_NO_REMOTE_FILES.to_string()));
        }

        // -- freshness -------------------------------------------------------
        let freshness = evaluate(&remote, last_import.as_ref(), &inner.config.freshness);
        for cmp in &freshness.comparisons {
            let message = if cmp.is_newer {
                format!("{}: newer ({})", cmp.remote.filename, cmp.reasons.join(", "))
            } else {
                format!("{}: unchanged", cmp.remote.filename)
            };
            tracker.log(LogLevel::Debug, STEP_FRESHNESS, message).await;
        }
        tracker
            .update_status(
                STEP_FRESHNESS,
                format!("Freshness check: {}", freshness.reason),
                20,
            )
            .await;

        if !freshness.should_import {
            tracker.finish_skipped(freshness.reason.clone()).await;
            return Ok(RunOutcome::Skipped(freshness.reason));
        }

        // -- download --------------------------------------------------------
        let selected = freshness.selected_files();
        let last_files = last_import
            .as_ref()
            .map(|r| r.files.clone())
            .unwrap_or_default();
        tracker
            .update_files_info(|info| {
                info.remote_files = remote.clone();
                info.last_imported = last_files;
            })
            .await;

        let downloads_dir = inner.staging.downloads_dir();
        let total = selected.len().max(1);
        let mut downloaded: Vec<(FileMetadata, PathBuf)> = Vec::with_capacity(selected.len());

        for (i, file) in selected.iter().enumerate() {
            tracker
                .update_status(
                    STEP_DOWNLOAD,
                    format!("Downloading {} ({}/{})", file.filename, i + 1, selected.len()),
                    stage_progress(20, 50, i, total),
                )
                .await;

            let t0 = Instant::now();
            let (path, checksum) = self
                .retrying(STEP_DOWNLOAD, &format!("Download of {}", file.filename), || {
                    self.fetch(file, &downloads_dir)
                })
                .await?;
            tracker
                .append(
                    ImportLogEntry::new(
                        LogLevel::Info,
                        STEP_DOWNLOAD,
                        format!("Downloaded {}", file.filename),
                    )
                    .with_duration(t0.elapsed())
                    .with_file_size(file.size),
                )
                .await;

            let name = file.filename.clone();
            tracker
                .update_files_info(|info| info.downloaded.push(name))
                .await;
            downloaded.push((file.clone().with_checksum(checksum), path));
        }
        tracker
            .update_status(STEP_DOWNLOAD, "Download complete", 50)
            .await;

        // -- extract ---------------------------------------------------------
        let extracted_dir = inner.staging.extracted_dir();
        let total = downloaded.len().max(1);
        let mut content: Vec<ExtractedFile> = Vec::new();

        for (i, (meta, path)) in downloaded.iter_mut().enumerate() {
            tracker
                .update_status(
                    STEP_EXTRACT,
                    format!("Extracting {}", meta.filename),
                    stage_progress(50, 70, i, total),
                )
                .await;

            let t0 = Instant::now();
            let mut files = self
                .retrying(STEP_EXTRACT, &format!("Extraction of {}", meta.filename), || {
                    inner.extractor.extract(path.as_path(), &extracted_dir)
                })
                .await?;
            assign_targets(&mut files, &matcher);

            for unassigned in files.iter().filter(|f| f.target.is_none()) {
                tracker
                    .log(
                        LogLevel::Debug,
                        STEP_EXTRACT,
                        format!("{} matches no import target; ignoring", unassigned.name),
                    )
                    .await;
            }
            tracker
                .append(
                    ImportLogEntry::new(
                        LogLevel::Info,
                        STEP_EXTRACT,
                        format!("Extracted {} file(s) from {}", files.len(), meta.filename),
                    )
                    .with_duration(t0.elapsed()),
                )
                .await;

            let names: Vec<String> = files.iter().map(|f| f.name.clone()).collect();
            tracker
                .update_files_info(|info| info.extracted.extend(names))
                .await;
            meta.database = target_summary(&files);
            content.extend(files);
        }
        tracker
            .update_status(STEP_EXTRACT, "Extraction complete", 70)
            .await;

        if !content.iter().any(|f| f.target.is_some()) {
            return Err(SyncError::Configuration(
                "No extracted file matches any import target pattern".to_string(),
            ));
        }

        // -- import ----------------------------------------------------------
        let applied = inner
            .loader
            .load(&inner.config.targets, &content, tracker)
            .await?;
        let mut imported: Vec<String> = Vec::new();
        for target in applied.iter().filter_map(|f| f.target.as_ref()) {
            if !imported.contains(target) {
                imported.push(target.clone());
            }
        }
        tracker
            .update_files_info(|info| info.imported = imported)
            .await;

        // -- finalize --------------------------------------------------------
        tracker
            .update_status(STEP_FINALIZE, "Saving checkpoint", 96)
            .await;
        let imported_meta: Vec<FileMetadata> =
            downloaded.into_iter().map(|(meta, _)| meta).collect();
        let record = ImportRecord::merged(last_import.as_ref(), &imported_meta, Utc::now());
        inner.checkpoint.save(&record).await?;

        self.invalidate_cache().await;
        if inner.config.staging.cleanup_on_success {
            self.cleanup_staging().await;
        }

        tracker
            .finish_success(
                format!(
                    "Import completed: {} file(s) loaded in {}",
                    applied.len(),
                    format_duration(started.elapsed())
                ),
                record.timestamp,
            )
            .await;
        Ok(RunOutcome::Success)
    }

    /// Run `op` within the run-wide retry budget, recording each failed
    /// attempt of a transient stage as a retry.
    async fn retrying<T, F, Fut>(
        &self,
        step: &'static str,
        what: &str,
        mut op: F,
    ) -> Result<T, SyncError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SyncError>>,
    {
        let tracker = &self.inner.tracker;
        let attempts = tracker.retry_budget().await.max(1);

        retry_with_backoff(
            attempts,
            &self.inner.config.retry.backoff,
            |attempt| {
                let fut = op();
                async move {
                    let result = fut.await;
                    if let Err(e) = &result {
                        if e.is_retryable() {
                            tracker
                                .record_retry(
                                    ImportLogEntry::new(
                                        LogLevel::Warn,
                                        step,
                                        format!("{what} failed (attempt {attempt}/{attempts})"),
                                    )
                                    .with_error(e),
                                )
                                .await;
                        }
                    }
                    result
                }
            },
            |failed| {
                if failed.will_retry {
                    tracing::debug!(step, attempt = failed.attempt, "Retrying after transient failure");
                }
            },
        )
        .await
    }

    /// Download `file` and compute its checksum.
    async fn fetch(
        &self,
        file: &FileMetadata,
        dest_dir: &Path,
    ) -> Result<(PathBuf, String), SyncError> {
        let path = self.inner.source.download(file, dest_dir).await?;
        let checksum = sha256_file(&path).await.map_err(|e| {
            SyncError::Transfer(format!("Cannot checksum {}: {e}", path.display()))
        })?;
        Ok((path, checksum))
    }

    /// Read the checkpoint; an unreadable one is logged and treated as absent.
    async fn load_checkpoint(&self) -> Option<ImportRecord> {
        match self.inner.checkpoint.load().await {
            Ok(record) => record,
            Err(e) => {
                self.inner
                    .tracker
                    .append(
                        ImportLogEntry::new(
                            LogLevel::Warn,
                            STEP_INIT,
                            "Ignoring unreadable checkpoint",
                        )
                        .with_error(&e),
                    )
                    .await;
                None
            }
        }
    }

    async fn invalidate_cache(&self) {
        match self.inner.cache.invalidate().await {
            Ok(()) => {
                self.inner
                    .tracker
                    .log(LogLevel::Info, STEP_FINALIZE, "Downstream cache invalidated")
                    .await;
            }
            Err(e) => {
                self.inner
                    .tracker
                    .append(
                        ImportLogEntry::new(
                            LogLevel::Warn,
                            STEP_FINALIZE,
                            "Cache invalidation failed; import still succeeded",
                        )
                        .with_error(&e),
                    )
                    .await;
            }
        }
    }

    async fn cleanup_staging(&self) {
        match self.inner.staging.cleanup().await {
            Ok(()) => {
                self.inner
                    .tracker
                    .log(LogLevel::Debug, STEP_CLEANUP, "Staging directory cleaned")
                    .await;
            }
            Err(e) => {
                self.inner
                    .tracker
                    .append(
                        ImportLogEntry::new(
                            LogLevel::Warn,
                            STEP_CLEANUP,
                            "Failed to clean staging directory",
                        )
                        .with_error(&e),
                    )
                    .await;
            }
        }
    }
}

/// Comma-separated targets fed by one download, if any.
fn target_summary(files: &[ExtractedFile]) -> Option<String> {
    let mut targets: Vec<&str> = files.iter().filter_map(|f| f.target.as_deref()).collect();
    targets.sort_unstable();
    targets.dedup();
    (!targets.is_empty()).then(|| targets.join(","))
}

/// Progress within `[from, to]` after `done` of `total` items.
fn stage_progress(from: u8, to: u8, done: usize, total: usize) -> u8 {
    let span = usize::from(to.saturating_sub(from));
    from + (span * done.min(total) / total.max(1)) as u8
}
