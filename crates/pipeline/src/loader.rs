//! Loading extracted content files into target databases.
//!
//! [`DatabaseLoader`] walks the configured targets in order and applies each
//! target's files one at a time through a [`DatabaseApplier`], stopping at
//! the first failure. Every apply is bounded by the import timeout.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dumpsync_core::config::TargetConfig;
use dumpsync_core::error::SyncError;
use dumpsync_core::status::{format_duration, ImportLogEntry, LogLevel, STEP_IMPORT};
use dumpsync_db::DbPool;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::Mutex;

use crate::extractor::ExtractedFile;
use crate::tracker::StatusTracker;

/// Progress reported when the import stage starts and ends.
pub const PROGRESS_START: u8 = 70;
pub const PROGRESS_END: u8 = 95;

/// Placeholder replaced by the target's database URL in command arguments.
pub const URL_PLACEHOLDER: &str = "{url}";

/// Maximum stderr captured from a client program (64 KiB).
const MAX_STDERR_BYTES: u64 = 64 * 1024;

/// Largest SQL file [`PgApplier`] reads into memory (256 MiB).
pub const DEFAULT_MAX_SCRIPT_BYTES: u64 = 256 * 1024 * 1024;

/// Failure reported by an applier; the text ends up in the import error.
#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    #[error("{0}")]
    Database(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("client exited with status {code}: {stderr}")]
    Client { code: i32, stderr: String },

    #[error("script is {size} bytes, over the {limit} byte limit; use a command loader")]
    TooLarge { size: u64, limit: u64 },
}

// ---------------------------------------------------------------------------
// Appliers
// ---------------------------------------------------------------------------

/// Applies one content file to one target database.
#[async_trait]
pub trait DatabaseApplier: Send + Sync {
    async fn apply(&self, target: &TargetConfig, file: &Path) -> Result<(), ApplyError>;
}

/// Applies SQL dumps through per-target PostgreSQL pools.
///
/// Pools are created lazily on first use and reused across runs. Each file
/// is read whole and must be UTF-8 text no larger than `max_script_bytes`;
/// binary or very large dumps belong to [`CommandApplier`], which streams.
pub struct PgApplier {
    pools: Mutex<HashMap<String, DbPool>>,
    max_script_bytes: u64,
}

impl Default for PgApplier {
    fn default() -> Self {
        Self {
            pools: Mutex::new(HashMap::new()),
            max_script_bytes: DEFAULT_MAX_SCRIPT_BYTES,
        }
    }
}

impl PgApplier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_script_bytes(mut self, limit: u64) -> Self {
        self.max_script_bytes = limit;
        self
    }

    async fn read_script(&self, file: &Path) -> Result<String, ApplyError> {
        let size = tokio::fs::metadata(file).await?.len();
        if size > self.max_script_bytes {
            return Err(ApplyError::TooLarge {
                size,
                limit: self.max_script_bytes,
            });
        }
        Ok(tokio::fs::read_to_string(file).await?)
    }

    async fn pool_for(&self, target: &TargetConfig) -> Result<DbPool, ApplyError> {
        let mut pools = self.pools.lock().await;
        if let Some(pool) = pools.get(&target.name) {
            return Ok(pool.clone());
        }
        let pool = dumpsync_db::create_lazy_pool(&target.database_url)?;
        pools.insert(target.name.clone(), pool.clone());
        Ok(pool)
    }
}

#[async_trait]
impl DatabaseApplier for PgApplier {
    async fn apply(&self, target: &TargetConfig, file: &Path) -> Result<(), ApplyError> {
        let script = self.read_script(file).await?;
        let pool = self.pool_for(target).await?;
        dumpsync_db::apply_sql_script(&pool, &script).await?;
        Ok(())
    }
}

/// Pipes the content file into an external client program (`psql`,
/// `mysql`, `pg_restore`, ...).
///
/// The target's database URL is exported as `DATABASE_URL` and substituted
/// for `{url}` in the arguments. The child is killed if the apply future is
/// dropped, which is how the loader's timeout stops it.
#[derive(Debug, Clone)]
pub struct CommandApplier {
    program: String,
    args: Vec<String>,
}

impl CommandApplier {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Build from a whitespace-separated command line.
    pub fn parse(command_line: &str) -> Result<Self, SyncError> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts.next().ok_or_else(|| {
            SyncError::Configuration("Loader command must not be empty".to_string())
        })?;
        Ok(Self::new(program, parts.collect()))
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

#[async_trait]
impl DatabaseApplier for CommandApplier {
    async fn apply(&self, target: &TargetConfig, file: &Path) -> Result<(), ApplyError> {
        let input = tokio::fs::File::open(file).await?.into_std().await;

        let mut cmd = Command::new(&self.program);
        cmd.args(
            self.args
                .iter()
                .map(|arg| arg.replace(URL_PLACEHOLDER, &target.database_url)),
        )
        .env("DATABASE_URL", &target.database_url)
        .stdin(Stdio::from(input))
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

        let mut child = cmd.spawn()?;
        let stderr = child.stderr.take();
        let stderr_task = tokio::spawn(async move { read_capped(stderr).await });

        let status = child.wait().await?;
        let stderr = stderr_task.await.unwrap_or_default();

        if status.success() {
            Ok(())
        } else {
            Err(ApplyError::Client {
                code: status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&stderr).trim().to_string(),
            })
        }
    }
}

async fn read_capped<R: AsyncRead + Unpin>(handle: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut h) = handle {
        let _ = (&mut h).take(MAX_STDERR_BYTES).read_to_end(&mut buf).await;
    }
    buf
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

pub struct DatabaseLoader {
    applier: Arc<dyn DatabaseApplier>,
    timeout: Duration,
}

impl DatabaseLoader {
    pub fn new(applier: Arc<dyn DatabaseApplier>, timeout: Duration) -> Self {
        Self { applier, timeout }
    }

    /// Apply every assigned file, target by target in configuration order.
    ///
    /// Returns the files that were applied. The first failure aborts the
    /// load with [`SyncError::Import`] naming the target.
    pub async fn load(
        &self,
        targets: &[TargetConfig],
        files: &[ExtractedFile],
        tracker: &StatusTracker,
    ) -> Result<Vec<ExtractedFile>, SyncError> {
        let plan: Vec<(&TargetConfig, Vec<&ExtractedFile>)> = targets
            .iter()
            .map(|target| {
                let assigned = files
                    .iter()
                    .filter(|f| f.target.as_deref() == Some(target.name.as_str()))
                    .collect();
                (target, assigned)
            })
            .collect();

        let total = plan.iter().map(|(_, f)| f.len()).sum::<usize>().max(1);
        let mut applied = Vec::new();

        for (target, assigned) in plan {
            if assigned.is_empty() {
                tracker
                    .log(
                        LogLevel::Debug,
                        STEP_IMPORT,
                        format!("No files for target '{}' in this run", target.name),
                    )
                    .await;
                continue;
            }

            for file in assigned {
                tracker
                    .update_status(
                        STEP_IMPORT,
                        format!("Importing {} into '{}'", file.name, target.name),
                        progress_at(applied.len(), total),
                    )
                    .await;

                let started = Instant::now();
                self.apply_one(target, file).await?;

                tracker
                    .append(
                        ImportLogEntry::new(
                            LogLevel::Info,
                            STEP_IMPORT,
                            format!("Imported {} into '{}'", file.name, target.name),
                        )
                        .with_duration(started.elapsed())
                        .with_file_size(file.size),
                    )
                    .await;
                applied.push(file.clone());
            }
        }

        Ok(applied)
    }

    async fn apply_one(&self, target: &TargetConfig, file: &ExtractedFile) -> Result<(), SyncError> {
        match tokio::time::timeout(self.timeout, self.applier.apply(target, &file.path)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(SyncError::Import {
                target: target.name.clone(),
                message: format!("{}: {e}", file.name),
            }),
            Err(_elapsed) => Err(SyncError::Import {
                target: target.name.clone(),
                message: format!(
                    "{} timed out after {}",
                    file.name,
                    format_duration(self.timeout)
                ),
            }),
        }
    }
}

fn progress_at(done: usize, total: usize) -> u8 {
    let span = usize::from(PROGRESS_END - PROGRESS_START);
    PROGRESS_START + (span * done.min(total) / total) as u8
}
