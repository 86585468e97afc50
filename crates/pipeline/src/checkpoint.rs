//! Durable last-import checkpoint.
//!
//! The checkpoint is a small JSON document written with
//! write-temp-then-rename so a crash mid-write never leaves a truncated file
//! behind. Only the orchestrator writes it, and only while holding the
//! single-flight guard.

use std::path::{Path, PathBuf};

use dumpsync_core::error::SyncError;
use dumpsync_core::files::{ImportRecord, LastImportMetadata};
use tokio::io::AsyncWriteExt;

pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the last import record. A missing file means no import yet.
    pub async fn load(&self) -> Result<Option<ImportRecord>, SyncError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(SyncError::Checkpoint(format!(
                    "Failed to read {}: {e}",
                    self.path.display()
                )))
            }
        };

        let doc: LastImportMetadata = serde_json::from_slice(&bytes).map_err(|e| {
            SyncError::Checkpoint(format!("Failed to parse {}: {e}", self.path.display()))
        })?;
        Ok(doc.last_import)
    }

    /// Atomically replace the checkpoint with `record`.
    pub async fn save(&self, record: &ImportRecord) -> Result<(), SyncError> {
        let doc = LastImportMetadata {
            last_import: Some(record.clone()),
        };
        let json = serde_json::to_vec_pretty(&doc)
            .map_err(|e| SyncError::Checkpoint(format!("Failed to serialize checkpoint: {e}")))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.write_error(e))?;
        }

        let tmp = self.temp_path();
        let result = async {
            let mut file = tokio::fs::File::create(&tmp).await?;
            file.write_all(&json).await?;
            file.sync_all().await?;
            drop(file);
            tokio::fs::rename(&tmp, &self.path).await
        }
        .await;

        if let Err(e) = result {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(self.write_error(e));
        }

        tracing::debug!(
            path = %self.path.display(),
            files = record.files.len(),
            "Checkpoint written",
        );
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn write_error(&self, e: std::io::Error) -> SyncError {
        SyncError::Checkpoint(format!("Failed to write {}: {e}", self.path.display()))
    }
}
