//! Shared fixtures for orchestrator integration tests.
//!
//! Runs use a real [`LocalDirSource`] over a temporary "remote" directory
//! holding AES-encrypted zip exports, plus in-memory fakes for the database
//! applier and the cache.

#![allow(dead_code)]

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dumpsync_core::config::{
    ArchiveConfig, RemoteConfig, RemoteProtocol, RetryConfig, StagingConfig, SyncConfig,
    TargetConfig,
};
use dumpsync_core::error::SyncError;
use dumpsync_core::files::FileMetadata;
use dumpsync_core::retry::BackoffPolicy;
use dumpsync_pipeline::cache::{CacheError, CacheInvalidator};
use dumpsync_pipeline::loader::{ApplyError, DatabaseApplier};
use dumpsync_pipeline::remote::{LocalDirSource, RemoteSource};
use dumpsync_pipeline::ImportOrchestrator;
use tempfile::TempDir;
use zip::write::SimpleFileOptions;
use zip::{AesMode, ZipWriter};

pub const ARCHIVE_PASSWORD: &str = "export-pw";

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// Write an AES-256 encrypted zip into `dir`.
pub fn write_archive(dir: &Path, name: &str, password: &str, entries: &[(&str, &str)]) -> PathBuf {
    let path = dir.join(name);
    let file = std::fs::File::create(&path).unwrap();
    let mut writer = ZipWriter::new(file);
    for (entry, body) in entries {
        let options =
            SimpleFileOptions::default().with_aes_encryption(AesMode::Aes256, password);
        writer.start_file(*entry, options).unwrap();
        writer.write_all(body.as_bytes()).unwrap();
    }
    writer.finish().unwrap();
    path
}

/// The standard export: one archive feeding both targets.
pub fn write_standard_export(dir: &Path) -> PathBuf {
    write_archive(
        dir,
        "export_20240601.zip",
        ARCHIVE_PASSWORD,
        &[
            ("users.sql", "INSERT INTO users VALUES (1);"),
            ("orders.sql", "INSERT INTO orders VALUES (1);"),
        ],
    )
}

fn target(name: &str) -> TargetConfig {
    TargetConfig {
        name: name.to_string(),
        pattern: format!("{name}*.sql"),
        database_url: format!("postgres://localhost/{name}"),
    }
}

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

/// Records every applied file as `(target, file name, contents)`.
#[derive(Default)]
pub struct RecordingApplier {
    pub applied: Mutex<Vec<(String, String, String)>>,
    pub fail_target: Option<String>,
}

impl RecordingApplier {
    pub fn failing(target: &str) -> Self {
        Self {
            fail_target: Some(target.to_string()),
            ..Default::default()
        }
    }

    pub fn targets(&self) -> Vec<String> {
        self.applied
            .lock()
            .unwrap()
            .iter()
            .map(|(t, _, _)| t.clone())
            .collect()
    }

    pub fn count(&self) -> usize {
        self.applied.lock().unwrap().len()
    }
}

#[async_trait]
impl DatabaseApplier for RecordingApplier {
    async fn apply(&self, target: &TargetConfig, file: &Path) -> Result<(), ApplyError> {
        if self.fail_target.as_deref() == Some(target.name.as_str()) {
            return Err(ApplyError::Client {
                code: 1,
                stderr: "ERROR: permission denied for schema public".to_string(),
            });
        }
        let body = tokio::fs::read_to_string(file).await?;
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.applied
            .lock()
            .unwrap()
            .push((target.name.clone(), name, body));
        Ok(())
    }
}

/// Counts invalidation calls; optionally fails each one.
#[derive(Default)]
pub struct CountingCache {
    pub calls: AtomicUsize,
    pub fail: bool,
}

#[async_trait]
impl CacheInvalidator for CountingCache {
    async fn invalidate(&self) -> Result<(), CacheError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(CacheError::HttpStatus(502));
        }
        Ok(())
    }
}

/// Wraps a source, delaying listings and failing the first `fail_lists`
/// of them with a connection error.
pub struct FlakySource {
    pub inner: Arc<dyn RemoteSource>,
    pub list_delay: Duration,
    pub fail_lists: AtomicU32,
    pub list_calls: AtomicU32,
}

impl FlakySource {
    pub fn new(inner: Arc<dyn RemoteSource>) -> Self {
        Self {
            inner,
            list_delay: Duration::ZERO,
            fail_lists: AtomicU32::new(0),
            list_calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl RemoteSource for FlakySource {
    fn describe(&self) -> String {
        format!("flaky({})", self.inner.describe())
    }

    async fn list_files(&self) -> Result<Vec<FileMetadata>, SyncError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if !self.list_delay.is_zero() {
            tokio::time::sleep(self.list_delay).await;
        }
        let remaining = self.fail_lists.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_lists.store(remaining - 1, Ordering::SeqCst);
            return Err(SyncError::Connection("connection reset by peer".to_string()));
        }
        self.inner.list_files().await
    }

    async fn download(&self, file: &FileMetadata, dest_dir: &Path) -> Result<PathBuf, SyncError> {
        self.inner.download(file, dest_dir).await
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// A temporary workspace with a remote directory, staging area and
/// checkpoint path, plus the fakes wired into each orchestrator it builds.
pub struct Harness {
    pub dir: TempDir,
    pub config: SyncConfig,
    pub applier: Arc<RecordingApplier>,
    pub cache: Arc<CountingCache>,
}

impl Harness {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let remote = dir.path().join("remote");
        std::fs::create_dir_all(&remote).unwrap();

        let config = SyncConfig {
            remote: RemoteConfig {
                protocol: RemoteProtocol::Local,
                path: remote.to_string_lossy().into_owned(),
                patterns: vec!["*.zip".to_string()],
                timeout: Duration::from_secs(10),
                ..Default::default()
            },
            archive: ArchiveConfig {
                default_password: Some(ARCHIVE_PASSWORD.to_string()),
                passwords: Vec::new(),
                extract_timeout: Duration::from_secs(10),
            },
            targets: vec![target("users"), target("orders")],
            import_timeout: Duration::from_secs(10),
            staging: StagingConfig {
                dir: dir.path().join("staging"),
                checkpoint_path: dir.path().join("state").join("last_import.json"),
                cleanup_on_success: true,
                keep_failed_files: true,
            },
            retry: RetryConfig {
                max_retries: 3,
                backoff: BackoffPolicy::immediate(),
            },
            ..Default::default()
        };

        Self {
            dir,
            config,
            applier: Arc::new(RecordingApplier::default()),
            cache: Arc::new(CountingCache::default()),
        }
    }

    pub fn remote_dir(&self) -> PathBuf {
        self.dir.path().join("remote")
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.config.staging.checkpoint_path.clone()
    }

    pub fn local_source(&self) -> Arc<dyn RemoteSource> {
        Arc::new(
            LocalDirSource::new(
                self.remote_dir(),
                &self.config.remote.patterns,
                self.config.remote.timeout,
            )
            .unwrap(),
        )
    }

    pub fn orchestrator(&self) -> ImportOrchestrator {
        self.orchestrator_with_source(self.local_source())
    }

    pub fn orchestrator_with_source(&self, source: Arc<dyn RemoteSource>) -> ImportOrchestrator {
        ImportOrchestrator::new(
            self.config.clone(),
            source,
            self.applier.clone(),
            self.cache.clone(),
        )
    }
}
