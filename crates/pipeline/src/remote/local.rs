//! Exports read from a locally mounted directory.
//!
//! Useful when the remote system drops its dumps on a network share, and as
//! the source used by integration tests. Unlike SFTP listings, local
//! listings carry SHA-256 checksums.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dumpsync_core::error::SyncError;
use dumpsync_core::files::FileMetadata;
use dumpsync_core::hashing::sha256_file;
use dumpsync_core::patterns::{compile_all, GlobPattern};
use dumpsync_core::status::format_duration;

use super::{copy_cancellable, fetch_into, select_matching, with_timeout, RawEntry, RemoteSource};

pub struct LocalDirSource {
    dir: PathBuf,
    patterns: Vec<GlobPattern>,
    timeout: Duration,
}

impl LocalDirSource {
    pub fn new(
        dir: impl Into<PathBuf>,
        patterns: &[String],
        timeout: Duration,
    ) -> Result<Self, SyncError> {
        Ok(Self {
            dir: dir.into(),
            patterns: compile_all(patterns)?,
            timeout,
        })
    }

    async fn read_entries(&self) -> Result<Vec<RawEntry>, SyncError> {
        let connection_err = |e: std::io::Error| {
            SyncError::Connection(format!("Cannot read {}: {e}", self.dir.display()))
        };

        let mut reader = tokio::fs::read_dir(&self.dir).await.map_err(connection_err)?;
        let mut entries = Vec::new();

        while let Some(entry) = reader.next_entry().await.map_err(connection_err)? {
            let meta = entry.metadata().await.map_err(connection_err)?;
            if !meta.is_file() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if !self.patterns.iter().any(|p| p.matches(&name)) {
                continue;
            }
            let modified: DateTime<Utc> = meta.modified().map_err(connection_err)?.into();
            let checksum = sha256_file(&entry.path()).await.map_err(connection_err)?;
            entries.push(RawEntry {
                name,
                size: meta.len(),
                modified_at: modified,
                checksum: Some(checksum),
            });
        }
        Ok(entries)
    }
}

#[async_trait]
impl RemoteSource for LocalDirSource {
    fn describe(&self) -> String {
        format!("local:{}", self.dir.display())
    }

    async fn list_files(&self) -> Result<Vec<FileMetadata>, SyncError> {
        let timeout = self.timeout;
        let entries = with_timeout(timeout, self.read_entries(), || {
            SyncError::Connection(format!("Listing timed out after {}", format_duration(timeout)))
        })
        .await?;
        Ok(select_matching(entries, &self.patterns))
    }

    async fn download(&self, file: &FileMetadata, dest_dir: &Path) -> Result<PathBuf, SyncError> {
        let source = self.dir.join(&file.filename);
        fetch_into(dest_dir, &file.filename, self.timeout, move |out, cancelled| {
            let copy_err = |e: std::io::Error| {
                SyncError::Transfer(format!("Failed to copy {}: {e}", source.display()))
            };
            let mut input = std::fs::File::open(&source).map_err(copy_err)?;
            copy_cancellable(&mut input, out, cancelled).map_err(copy_err)
        })
        .await
    }
}
