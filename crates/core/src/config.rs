//! Import pipeline configuration.
//!
//! Plain data plus [`SyncConfig::validate`]. Loading from the environment is
//! done by the binary; tests build configs from [`Default`] and override
//! what they need.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::SyncError;
use crate::freshness::FreshnessOptions;
use crate::patterns::{GlobPattern, TargetMatcher};
use crate::retry::BackoffPolicy;
use crate::schedule::ImportSchedule;

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

pub const DEFAULT_SCHEDULE: &str = "0 3 * * *";
pub const DEFAULT_SFTP_PORT: u16 = 22;
pub const DEFAULT_REMOTE_PATTERN: &str = "*.zip";
pub const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_EXTRACT_TIMEOUT: Duration = Duration::from_secs(600);
pub const DEFAULT_IMPORT_TIMEOUT: Duration = Duration::from_secs(1800);
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_STAGING_DIR: &str = "data/staging";
pub const DEFAULT_CHECKPOINT_PATH: &str = "data/last_import.json";
pub const DEFAULT_LOG_BUFFER_SIZE: usize = 1000;

/// Upper bound on `max_retries`, to keep a broken remote from pinning a run.
pub const MAX_RETRIES_LIMIT: u32 = 20;

// ---------------------------------------------------------------------------
// Remote
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteProtocol {
    /// SSH file transfer to a remote host.
    Sftp,
    /// A locally mounted export directory.
    Local,
}

impl RemoteProtocol {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sftp" => Some(Self::Sftp),
            "local" => Some(Self::Local),
            _ => None,
        }
    }
}

#[derive(Clone)]
pub struct RemoteConfig {
    pub protocol: RemoteProtocol,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: Option<String>,
    pub private_key_path: Option<PathBuf>,
    /// Remote directory (or local directory for [`RemoteProtocol::Local`]).
    pub path: String,
    pub patterns: Vec<String>,
    pub timeout: Duration,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            protocol: RemoteProtocol::Sftp,
            host: "localhost".to_string(),
            port: DEFAULT_SFTP_PORT,
            username: String::new(),
            password: None,
            private_key_path: None,
            path: "/".to_string(),
            patterns: vec![DEFAULT_REMOTE_PATTERN.to_string()],
            timeout: DEFAULT_REMOTE_TIMEOUT,
        }
    }
}

impl std::fmt::Debug for RemoteConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteConfig")
            .field("protocol", &self.protocol)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("private_key_path", &self.private_key_path)
            .field("path", &self.path)
            .field("patterns", &self.patterns)
            .field("timeout", &self.timeout)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Archives
// ---------------------------------------------------------------------------

/// Password for archives whose name matches `pattern`.
#[derive(Clone)]
pub struct ArchivePassword {
    pub pattern: String,
    pub password: String,
}

#[derive(Clone)]
pub struct ArchiveConfig {
    pub default_password: Option<String>,
    /// Checked in order; the first matching pattern wins.
    pub passwords: Vec<ArchivePassword>,
    pub extract_timeout: Duration,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            default_password: None,
            passwords: Vec::new(),
            extract_timeout: DEFAULT_EXTRACT_TIMEOUT,
        }
    }
}

impl ArchiveConfig {
    /// Password to use for `archive_name`, falling back to the default.
    pub fn password_for(&self, archive_name: &str) -> Option<&str> {
        self.passwords
            .iter()
            .find(|p| {
                GlobPattern::new(&p.pattern)
                    .map(|g| g.matches(archive_name))
                    .unwrap_or(false)
            })
            .map(|p| p.password.as_str())
            .or(self.default_password.as_deref())
    }
}

impl std::fmt::Debug for ArchiveConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let patterns: Vec<&str> = self.passwords.iter().map(|p| p.pattern.as_str()).collect();
        f.debug_struct("ArchiveConfig")
            .field("default_password", &self.default_password.as_ref().map(|_| "***"))
            .field("password_patterns", &patterns)
            .field("extract_timeout", &self.extract_timeout)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Targets
// ---------------------------------------------------------------------------

/// A target database and the content files that load into it.
#[derive(Clone)]
pub struct TargetConfig {
    pub name: String,
    pub pattern: String,
    pub database_url: String,
}

impl std::fmt::Debug for TargetConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetConfig")
            .field("name", &self.name)
            .field("pattern", &self.pattern)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Staging / retry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct StagingConfig {
    pub dir: PathBuf,
    pub checkpoint_path: PathBuf,
    pub cleanup_on_success: bool,
    pub keep_failed_files: bool,
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(DEFAULT_STAGING_DIR),
            checkpoint_path: PathBuf::from(DEFAULT_CHECKPOINT_PATH),
            cleanup_on_success: true,
            keep_failed_files: true,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    /// Run-wide budget of failed attempts across the transient stages.
    pub max_retries: u32,
    pub backoff: BackoffPolicy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff: BackoffPolicy::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// SyncConfig
// ---------------------------------------------------------------------------

/// Complete configuration of the import pipeline.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Master switch. When off, nothing is scheduled and manual triggers fail.
    pub enabled: bool,
    pub schedule: String,
    pub remote: RemoteConfig,
    pub archive: ArchiveConfig,
    pub targets: Vec<TargetConfig>,
    pub import_timeout: Duration,
    pub staging: StagingConfig,
    pub freshness: FreshnessOptions,
    pub retry: RetryConfig,
    pub cache_invalidate_url: Option<String>,
    pub log_buffer_size: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            schedule: DEFAULT_SCHEDULE.to_string(),
            remote: RemoteConfig::default(),
            archive: ArchiveConfig::default(),
            targets: Vec::new(),
            import_timeout: DEFAULT_IMPORT_TIMEOUT,
            staging: StagingConfig::default(),
            freshness: FreshnessOptions::default(),
            retry: RetryConfig::default(),
            cache_invalidate_url: None,
            log_buffer_size: DEFAULT_LOG_BUFFER_SIZE,
        }
    }
}

impl SyncConfig {
    /// Check the configuration for semantic consistency.
    pub fn validate(&self) -> Result<(), SyncError> {
        ImportSchedule::parse(&self.schedule)?;

        if self.remote.patterns.is_empty() {
            return Err(SyncError::Configuration(
                "At least one remote file pattern is required".to_string(),
            ));
        }
        for pattern in &self.remote.patterns {
            GlobPattern::new(pattern)?;
        }
        if self.remote.path.trim().is_empty() {
            return Err(SyncError::Configuration(
                "Remote path must not be empty".to_string(),
            ));
        }
        if self.remote.protocol == RemoteProtocol::Sftp {
            if self.remote.host.trim().is_empty() {
                return Err(SyncError::Configuration(
                    "Remote host must not be empty".to_string(),
                ));
            }
            if self.remote.username.trim().is_empty() {
                return Err(SyncError::Configuration(
                    "Remote username must not be empty".to_string(),
                ));
            }
            if self.remote.password.is_none() && self.remote.private_key_path.is_none() {
                return Err(SyncError::Configuration(
                    "Remote credentials require a password or a private key".to_string(),
                ));
            }
        }

        for entry in &self.archive.passwords {
            GlobPattern::new(&entry.pattern)?;
        }

        if self.targets.is_empty() {
            return Err(SyncError::Configuration(
                "At least one import target is required".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for target in &self.targets {
            if target.name.trim().is_empty() {
                return Err(SyncError::Configuration(
                    "Target name must not be empty".to_string(),
                ));
            }
            if !seen.insert(target.name.as_str()) {
                return Err(SyncError::Configuration(format!(
                    "Duplicate target name '{}'",
                    target.name
                )));
            }
            GlobPattern::new(&target.pattern)?;
            if target.database_url.trim().is_empty() {
                return Err(SyncError::Configuration(format!(
                    "Target '{}' has no database URL",
                    target.name
                )));
            }
        }

        if self.retry.max_retries == 0 || self.retry.max_retries > MAX_RETRIES_LIMIT {
            return Err(SyncError::Configuration(format!(
                "max_retries must be between 1 and {MAX_RETRIES_LIMIT}, got {}",
                self.retry.max_retries
            )));
        }

        for (name, timeout) in [
            ("remote timeout", self.remote.timeout),
            ("extract timeout", self.archive.extract_timeout),
            ("import timeout", self.import_timeout),
        ] {
            if timeout.is_zero() {
                return Err(SyncError::Configuration(format!("{name} must be > 0")));
            }
        }

        if self.log_buffer_size == 0 {
            return Err(SyncError::Configuration(
                "Log buffer size must be > 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Ordered target matcher built from the configured targets.
    pub fn target_matcher(&self) -> Result<TargetMatcher, SyncError> {
        TargetMatcher::new(
            self.targets
                .iter()
                .map(|t| (t.pattern.as_str(), t.name.as_str())),
        )
    }
}
