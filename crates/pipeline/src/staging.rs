//! Local staging area for downloaded and extracted files.
//!
//! ```text
//! <root>/downloads/              fetched remote files
//! <root>/extracted/<archive>/    archive contents
//! <root>/extracted/.extract-*/   scratch directories (in-flight extraction)
//! ```

use std::path::{Path, PathBuf};

use dumpsync_core::error::SyncError;

const DOWNLOADS_DIR: &str = "downloads";
const EXTRACTED_DIR: &str = "extracted";

#[derive(Debug, Clone)]
pub struct StagingArea {
    root: PathBuf,
}

impl StagingArea {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn downloads_dir(&self) -> PathBuf {
        self.root.join(DOWNLOADS_DIR)
    }

    pub fn extracted_dir(&self) -> PathBuf {
        self.root.join(EXTRACTED_DIR)
    }

    /// Create the staging directories if they do not exist yet.
    pub async fn prepare(&self) -> Result<(), SyncError> {
        for dir in [self.downloads_dir(), self.extracted_dir()] {
            tokio::fs::create_dir_all(&dir).await.map_err(|e| {
                SyncError::Internal(format!(
                    "Failed to create staging directory {}: {e}",
                    dir.display()
                ))
            })?;
        }
        Ok(())
    }

    /// Remove everything the pipeline staged. Missing directories are fine.
    pub async fn cleanup(&self) -> Result<(), SyncError> {
        for dir in [self.downloads_dir(), self.extracted_dir()] {
            match tokio::fs::remove_dir_all(&dir).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(SyncError::Internal(format!(
                        "Failed to remove {}: {e}",
                        dir.display()
                    )))
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn prepare_and_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let staging = StagingArea::new(dir.path().join("staging"));

        staging.prepare().await.unwrap();
        assert!(staging.downloads_dir().is_dir());
        assert!(staging.extracted_dir().is_dir());

        tokio::fs::write(staging.downloads_dir().join("a.zip"), b"x")
            .await
            .unwrap();
        staging.cleanup().await.unwrap();
        assert!(!staging.downloads_dir().exists());
        assert!(!staging.extracted_dir().exists());
    }

    #[tokio::test]
    async fn cleanup_of_missing_dirs_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let staging = StagingArea::new(dir.path().join("never-created"));
        assert!(staging.cleanup().await.is_ok());
    }
}
