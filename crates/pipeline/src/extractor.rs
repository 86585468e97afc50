//! Password-protected archive extraction.
//!
//! Each archive is unpacked into a scratch directory under the extraction
//! root and renamed to `<root>/<archive stem>/` only once every entry has
//! been written. Any failure removes the scratch directory, so a failed
//! extraction never leaves partial output behind.
//!
//! Downloads that are not `.zip` archives are passed through unchanged as
//! content files.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dumpsync_core::config::ArchiveConfig;
use dumpsync_core::error::SyncError;
use dumpsync_core::patterns::TargetMatcher;
use dumpsync_core::status::format_duration;
use zip::result::ZipError;
use zip::ZipArchive;

/// Prefix of in-flight extraction directories.
pub const SCRATCH_PREFIX: &str = ".extract-";

const ARCHIVE_EXTENSION: &str = "zip";

/// A content file ready for loading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedFile {
    /// Name of the download this file came from.
    pub archive: String,
    /// Base name used for target matching.
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
    /// Target assigned by [`assign_targets`], if any pattern matched.
    pub target: Option<String>,
}

/// Whether `path` should be unpacked rather than passed through.
pub fn is_archive(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case(ARCHIVE_EXTENSION))
        .unwrap_or(false)
}

/// Assign each file to the first target whose pattern matches its name.
pub fn assign_targets(files: &mut [ExtractedFile], matcher: &TargetMatcher) {
    for file in files {
        file.target = matcher.target_for(&file.name).map(str::to_string);
    }
}

pub struct ArchiveExtractor {
    config: ArchiveConfig,
}

impl ArchiveExtractor {
    pub fn new(config: ArchiveConfig) -> Self {
        Self { config }
    }

    /// Extract `archive_path` below `dest_root`.
    ///
    /// The password is chosen per archive name (first matching pattern, then
    /// the default). Wrong passwords, corrupt data, unsafe entry paths and
    /// timeouts all fail with [`SyncError::Extraction`].
    pub async fn extract(
        &self,
        archive_path: &Path,
        dest_root: &Path,
    ) -> Result<Vec<ExtractedFile>, SyncError> {
        let archive_name = archive_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                SyncError::Extraction(format!("Invalid archive path {}", archive_path.display()))
            })?
            .to_string();

        if !is_archive(archive_path) {
            return passthrough(archive_path, &archive_name).await;
        }

        let stem = archive_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(archive_name.as_str())
            .to_string();
        let final_dir = dest_root.join(&stem);
        let scratch = dest_root.join(format!("{SCRATCH_PREFIX}{}", uuid::Uuid::new_v4()));
        let password = self.config.password_for(&archive_name).map(str::to_string);
        let timeout = self.config.extract_timeout;
        let cancelled = Arc::new(AtomicBool::new(false));

        tokio::fs::create_dir_all(dest_root).await.map_err(|e| {
            SyncError::Extraction(format!("Cannot create {}: {e}", dest_root.display()))
        })?;

        let task = {
            let archive_path = archive_path.to_path_buf();
            let archive_name = archive_name.clone();
            let scratch = scratch.clone();
            let cancelled = Arc::clone(&cancelled);
            tokio::task::spawn_blocking(move || {
                let result = unpack(
                    &archive_path,
                    &archive_name,
                    &scratch,
                    password.as_deref(),
                    &cancelled,
                );
                if result.is_err() {
                    let _ = std::fs::remove_dir_all(&scratch);
                }
                result
            })
        };

        let entries = match tokio::time::timeout(timeout, task).await {
            Ok(Ok(result)) => result?,
            Ok(Err(join_err)) => {
                let _ = tokio::fs::remove_dir_all(&scratch).await;
                return Err(SyncError::Internal(format!(
                    "Extraction task for {archive_name} failed: {join_err}"
                )));
            }
            Err(_elapsed) => {
                cancelled.store(true, Ordering::Relaxed);
                let _ = tokio::fs::remove_dir_all(&scratch).await;
                return Err(SyncError::Extraction(format!(
                    "Extraction of {archive_name} timed out after {}",
                    format_duration(timeout)
                )));
            }
        };

        if let Err(e) = promote(&scratch, &final_dir).await {
            let _ = tokio::fs::remove_dir_all(&scratch).await;
            return Err(e);
        }

        let files = entries
            .into_iter()
            .map(|(relative, size)| ExtractedFile {
                archive: archive_name.clone(),
                name: relative
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                path: final_dir.join(&relative),
                size,
                target: None,
            })
            .collect();
        Ok(files)
    }
}

async fn passthrough(path: &Path, name: &str) -> Result<Vec<ExtractedFile>, SyncError> {
    let meta = tokio::fs::metadata(path)
        .await
        .map_err(|e| SyncError::Extraction(format!("Cannot read {}: {e}", path.display())))?;
    Ok(vec![ExtractedFile {
        archive: name.to_string(),
        name: name.to_string(),
        path: path.to_path_buf(),
        size: meta.len(),
        target: None,
    }])
}

/// Replace `final_dir` with the completed scratch directory.
async fn promote(scratch: &Path, final_dir: &Path) -> Result<(), SyncError> {
    match tokio::fs::remove_dir_all(final_dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(SyncError::Extraction(format!(
                "Cannot replace {}: {e}",
                final_dir.display()
            )))
        }
    }
    tokio::fs::rename(scratch, final_dir).await.map_err(|e| {
        SyncError::Extraction(format!("Cannot move extracted files into place: {e}"))
    })
}

// ---------------------------------------------------------------------------
// Blocking unpack
// ---------------------------------------------------------------------------

fn unpack(
    archive_path: &Path,
    archive_name: &str,
    scratch: &Path,
    password: Option<&str>,
    cancelled: &AtomicBool,
) -> Result<Vec<(PathBuf, u64)>, SyncError> {
    let io_err = |e: std::io::Error| {
        SyncError::Extraction(format!("I/O error extracting {archive_name}: {e}"))
    };

    let file = std::fs::File::open(archive_path).map_err(io_err)?;
    let mut archive = ZipArchive::new(file).map_err(|e| entry_error(archive_name, e))?;
    std::fs::create_dir_all(scratch).map_err(io_err)?;

    let mut written = Vec::new();
    for index in 0..archive.len() {
        if cancelled.load(Ordering::Relaxed) {
            return Err(SyncError::Extraction(format!(
                "Extraction of {archive_name} cancelled"
            )));
        }

        let mut entry = match password {
            Some(pw) => archive.by_index_decrypt(index, pw.as_bytes()),
            None => archive.by_index(index),
        }
        .map_err(|e| entry_error(archive_name, e))?;

        let relative = entry.enclosed_name().ok_or_else(|| {
            SyncError::Extraction(format!(
                "Archive {archive_name} contains unsafe path '{}'",
                entry.name()
            ))
        })?;
        let dest = scratch.join(&relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&dest).map_err(io_err)?;
            continue;
        }
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }

        let mut out = std::fs::File::create(&dest).map_err(io_err)?;
        let size = std::io::copy(&mut entry, &mut out).map_err(|e| {
            SyncError::Extraction(format!(
                "Corrupt entry '{}' in {archive_name} (wrong password or damaged data): {e}",
                entry.name()
            ))
        })?;
        out.flush().map_err(io_err)?;
        written.push((relative, size));
    }

    written.sort();
    Ok(written)
}

fn entry_error(archive_name: &str, err: ZipError) -> SyncError {
    match err {
        ZipError::InvalidPassword => {
            SyncError::Extraction(format!("Wrong password for archive {archive_name}"))
        }
        ZipError::UnsupportedArchive(reason) => SyncError::Extraction(format!(
            "Cannot extract {archive_name}: {reason}"
        )),
        other => SyncError::Extraction(format!("Corrupt archive {archive_name}: {other}")),
    }
}
