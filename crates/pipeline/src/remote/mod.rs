//! Remote dump listing and retrieval.
//!
//! [`RemoteSource`] is the seam between the orchestrator and wherever the
//! exports live. Listing returns only files whose names match one of the
//! configured patterns; everything else is silently ignored. Downloads are
//! streamed into the staging directory via a uniquely named `.part` file
//! that is renamed once complete. A failed, cancelled or timed-out transfer
//! removes its partial file.

pub mod local;
pub mod sftp;

use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dumpsync_core::config::{RemoteConfig, RemoteProtocol};
use dumpsync_core::error::SyncError;
use dumpsync_core::files::FileMetadata;
use dumpsync_core::patterns::{first_match, GlobPattern};
use dumpsync_core::status::format_duration;
use dumpsync_core::types::Timestamp;

pub use local::LocalDirSource;
pub use sftp::SftpSource;

/// Suffix for in-flight downloads.
pub const PARTIAL_SUFFIX: &str = ".part";

const COPY_CHUNK: usize = 64 * 1024;

#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Human-readable location, for log messages.
    fn describe(&self) -> String;

    /// List files matching the configured patterns, sorted by name.
    ///
    /// Fails with [`SyncError::Connection`] when the source is unreachable or
    /// rejects the credentials.
    async fn list_files(&self) -> Result<Vec<FileMetadata>, SyncError>;

    /// Fetch `file` into `dest_dir`, returning the local path.
    ///
    /// Fails with [`SyncError::Transfer`] on a partial write or timeout; the
    /// partial file is removed.
    async fn download(&self, file: &FileMetadata, dest_dir: &Path) -> Result<PathBuf, SyncError>;
}

/// Build the source selected by `config.protocol`.
pub fn build_source(config: &RemoteConfig) -> Result<Arc<dyn RemoteSource>, SyncError> {
    let source: Arc<dyn RemoteSource> = match config.protocol {
        RemoteProtocol::Sftp => Arc::new(SftpSource::new(config.clone())?),
        RemoteProtocol::Local => Arc::new(LocalDirSource::new(
            &config.path,
            &config.patterns,
            config.timeout,
        )?),
    };
    Ok(source)
}

/// A raw directory entry before pattern filtering.
#[derive(Debug, Clone)]
pub struct RawEntry {
    pub name: String,
    pub size: u64,
    pub modified_at: Timestamp,
    pub checksum: Option<String>,
}

/// Keep entries matching any pattern, record the matched pattern, and sort
/// by file name for a stable order.
pub fn select_matching(entries: Vec<RawEntry>, patterns: &[GlobPattern]) -> Vec<FileMetadata> {
    let mut files: Vec<FileMetadata> = entries
        .into_iter()
        .filter_map(|entry| {
            let pattern = first_match(patterns, &entry.name)?;
            let mut meta = FileMetadata::new(entry.name, entry.size, entry.modified_at)
                .with_pattern(pattern.as_str());
            meta.checksum = entry.checksum;
            Some(meta)
        })
        .collect();
    files.sort_by(|a, b| a.filename.cmp(&b.filename));
    files
}

/// Local destination and in-flight path for a download.
///
/// Each call yields a fresh partial name, so an abandoned transfer can never
/// share its partial file with a later attempt.
pub fn download_paths(dest_dir: &Path, filename: &str) -> (PathBuf, PathBuf) {
    let final_path = dest_dir.join(filename);
    let partial = dest_dir.join(format!(
        "{filename}.{}{PARTIAL_SUFFIX}",
        uuid::Uuid::new_v4().simple()
    ));
    (final_path, partial)
}

/// Run a blocking `transfer` into a partial file under `dest_dir`, then
/// rename it to `filename`.
///
/// `transfer` must poll the cancel flag it is handed; on timeout the flag is
/// raised and the partial file is removed by whichever side gets there last.
pub async fn fetch_into<F>(
    dest_dir: &Path,
    filename: &str,
    timeout: Duration,
    transfer: F,
) -> Result<PathBuf, SyncError>
where
    F: FnOnce(&mut std::fs::File, &AtomicBool) -> Result<u64, SyncError> + Send + 'static,
{
    ensure_plain_filename(filename)?;
    tokio::fs::create_dir_all(dest_dir)
        .await
        .map_err(|e| SyncError::Transfer(format!("Cannot create {}: {e}", dest_dir.display())))?;

    let (final_path, partial) = download_paths(dest_dir, filename);
    let cancelled = Arc::new(AtomicBool::new(false));

    let task = {
        let partial = partial.clone();
        let cancelled = Arc::clone(&cancelled);
        tokio::task::spawn_blocking(move || write_partial(&partial, &cancelled, transfer))
    };

    let bytes = match tokio::time::timeout(timeout, task).await {
        Ok(Ok(result)) => result?,
        Ok(Err(join_err)) => {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(SyncError::Internal(format!(
                "Transfer task for {filename} failed: {join_err}"
            )));
        }
        Err(_elapsed) => {
            cancelled.store(true, Ordering::SeqCst);
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(SyncError::Transfer(format!(
                "Transfer of {filename} timed out after {}",
                format_duration(timeout)
            )));
        }
    };

    if let Err(e) = tokio::fs::rename(&partial, &final_path).await {
        let _ = tokio::fs::remove_file(&partial).await;
        return Err(SyncError::Transfer(format!(
            "Failed to finalize {}: {e}",
            final_path.display()
        )));
    }
    tracing::debug!(file = %filename, bytes, "Download complete");
    Ok(final_path)
}

fn write_partial<F>(partial: &Path, cancelled: &AtomicBool, transfer: F) -> Result<u64, SyncError>
where
    F: FnOnce(&mut std::fs::File, &AtomicBool) -> Result<u64, SyncError>,
{
    let result = fill_partial(partial, cancelled, transfer).and_then(|bytes| {
        if cancelled.load(Ordering::SeqCst) {
            Err(SyncError::Transfer(format!(
                "Transfer into {} cancelled",
                partial.display()
            )))
        } else {
            Ok(bytes)
        }
    });
    if result.is_err() {
        let _ = std::fs::remove_file(partial);
    }
    result
}

fn fill_partial<F>(partial: &Path, cancelled: &AtomicBool, transfer: F) -> Result<u64, SyncError>
where
    F: FnOnce(&mut std::fs::File, &AtomicBool) -> Result<u64, SyncError>,
{
    let write_err = |e: std::io::Error| {
        SyncError::Transfer(format!("Cannot write {}: {e}", partial.display()))
    };
    let mut file = std::fs::File::create(partial).map_err(write_err)?;
    // The timeout may have fired before the file existed.
    if cancelled.load(Ordering::SeqCst) {
        return Ok(0);
    }
    let bytes = transfer(&mut file, cancelled)?;
    file.sync_all().map_err(write_err)?;
    Ok(bytes)
}

/// `std::io::copy` that stops between chunks once `cancelled` is raised.
pub fn copy_cancellable<R: Read, W: Write>(
    reader: &mut R,
    writer: &mut W,
    cancelled: &AtomicBool,
) -> std::io::Result<u64> {
    let mut buf = vec![0u8; COPY_CHUNK];
    let mut total = 0u64;
    loop {
        if cancelled.load(Ordering::SeqCst) {
            return Err(std::io::Error::other("transfer cancelled"));
        }
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        writer.write_all(&buf[..n])?;
        total += n as u64;
    }
    writer.flush()?;
    Ok(total)
}

/// Reject names that would escape the staging directory.
pub fn ensure_plain_filename(filename: &str) -> Result<(), SyncError> {
    let path = Path::new(filename);
    let plain = path.components().count() == 1
        && path.file_name().map(|n| n == filename).unwrap_or(false);
    if plain {
        Ok(())
    } else {
        Err(SyncError::Transfer(format!(
            "Refusing to download file with unsafe name '{filename}'"
        )))
    }
}

/// Apply `timeout` to a transfer future, mapping expiry to `on_timeout`.
pub async fn with_timeout<T, F>(
    timeout: Duration,
    fut: F,
    on_timeout: impl FnOnce() -> SyncError,
) -> Result<T, SyncError>
where
    F: std::future::Future<Output = Result<T, SyncError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_elapsed) => Err(on_timeout()),
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use dumpsync_core::patterns::compile_all;

    use super::*;

    fn raw(name: &str) -> RawEntry {
        RawEntry {
            name: name.to_string(),
            size: 1,
            modified_at: Utc::now(),
            checksum: None,
        }
    }

    #[test]
    fn non_matching_entries_are_dropped() {
        let patterns = compile_all(&["*.zip".to_string()]).unwrap();
        let files = select_matching(
            vec![raw("b.zip"), raw("notes.txt"), raw("a.zip")],
            &patterns,
        );
        let names: Vec<_> = files.iter().map(|f| f.filename.as_str()).collect();
        assert_eq!(names, vec!["a.zip", "b.zip"]);
        assert!(files.iter().all(|f| f.pattern == "*.zip"));
    }

    #[test]
    fn unsafe_names_rejected() {
        assert!(ensure_plain_filename("users.zip").is_ok());
        assert!(ensure_plain_filename("../etc/passwd").is_err());
        assert!(ensure_plain_filename("a/b.zip").is_err());
        assert!(ensure_plain_filename("..").is_err());
    }

    #[test]
    fn build_source_follows_protocol() {
        let local = RemoteConfig {
            protocol: RemoteProtocol::Local,
            path: "/srv/exports".into(),
            ..Default::default()
        };
        assert_eq!(build_source(&local).unwrap().describe(), "local:/srv/exports");

        let sftp = RemoteConfig {
            username: "export".into(),
            ..Default::default()
        };
        assert!(build_source(&sftp).unwrap().describe().starts_with("sftp://export@"));
    }

    #[test]
    fn partial_paths_are_unique_per_attempt() {
        let (final_path, first) = download_paths(Path::new("/tmp/stage"), "a.zip");
        let (_, second) = download_paths(Path::new("/tmp/stage"), "a.zip");
        assert_eq!(final_path, Path::new("/tmp/stage/a.zip"));
        assert_ne!(first, second);
        for partial in [&first, &second] {
            let name = partial.file_name().unwrap().to_str().unwrap();
            assert!(name.starts_with("a.zip."));
            assert!(name.ends_with(PARTIAL_SUFFIX));
            assert_eq!(partial.parent(), Some(Path::new("/tmp/stage")));
        }
    }

    #[test]
    fn copy_stops_once_cancelled() {
        let data = vec![7u8; COPY_CHUNK * 3];
        let mut out = Vec::new();
        let cancelled = AtomicBool::new(false);
        let copied = copy_cancellable(&mut data.as_slice(), &mut out, &cancelled).unwrap();
        assert_eq!(copied, data.len() as u64);
        assert_eq!(out, data);

        cancelled.store(true, Ordering::Relaxed);
        let mut out = Vec::new();
        assert!(copy_cancellable(&mut data.as_slice(), &mut out, &cancelled).is_err());
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn failed_transfer_leaves_no_partial() {
        let staging = tempfile::tempdir().unwrap();
        let result = fetch_into(staging.path(), "a.zip", Duration::from_secs(5), |out, _| {
            out.write_all(b"half").unwrap();
            Err(SyncError::Transfer("connection reset".into()))
        })
        .await;

        assert_matches::assert_matches!(result, Err(SyncError::Transfer(_)));
        assert_eq!(std::fs::read_dir(staging.path()).unwrap().count(), 0);
    }
}
