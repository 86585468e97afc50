//! SFTP source backed by libssh2.
//!
//! `ssh2` is a blocking API, so every session runs inside
//! [`tokio::task::spawn_blocking`]. The session timeout bounds each blocking
//! call; the outer tokio timeout bounds the whole operation.

use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use dumpsync_core::config::RemoteConfig;
use dumpsync_core::error::SyncError;
use dumpsync_core::files::FileMetadata;
use dumpsync_core::patterns::{compile_all, GlobPattern};
use dumpsync_core::status::format_duration;
use ssh2::{Session, Sftp};

use super::{copy_cancellable, fetch_into, select_matching, with_timeout, RawEntry, RemoteSource};

pub struct SftpSource {
    config: RemoteConfig,
    patterns: Vec<GlobPattern>,
}

impl SftpSource {
    pub fn new(config: RemoteConfig) -> Result<Self, SyncError> {
        let patterns = compile_all(&config.patterns)?;
        Ok(Self { config, patterns })
    }
}

#[async_trait]
impl RemoteSource for SftpSource {
    fn describe(&self) -> String {
        format!(
            "sftp://{}@{}:{}{}",
            self.config.username, self.config.host, self.config.port, self.config.path
        )
    }

    async fn list_files(&self) -> Result<Vec<FileMetadata>, SyncError> {
        let config = self.config.clone();
        let timeout = config.timeout;

        let task = async move {
            tokio::task::spawn_blocking(move || list_blocking(&config))
                .await
                .map_err(|e| SyncError::Internal(format!("SFTP listing task failed: {e}")))?
        };
        let entries = with_timeout(timeout, task, || {
            SyncError::Connection(format!(
                "SFTP listing timed out after {}",
                format_duration(timeout)
            ))
        })
        .await?;

        Ok(select_matching(entries, &self.patterns))
    }

    async fn download(&self, file: &FileMetadata, dest_dir: &Path) -> Result<PathBuf, SyncError> {
        let config = self.config.clone();
        let filename = file.filename.clone();
        fetch_into(dest_dir, &file.filename, self.config.timeout, move |out, cancelled| {
            download_blocking(&config, &filename, out, cancelled)
        })
        .await
    }
}

// ---------------------------------------------------------------------------
// Blocking session helpers
// ---------------------------------------------------------------------------

fn connect(config: &RemoteConfig) -> Result<Sftp, SyncError> {
    let addr = format!("{}:{}", config.host, config.port);
    let conn_err = |what: &str, e: &dyn std::fmt::Display| {
        SyncError::Connection(format!("{what} {addr}: {e}"))
    };

    let tcp = TcpStream::connect(&addr).map_err(|e| conn_err("Cannot connect to", &e))?;
    let _ = tcp.set_read_timeout(Some(config.timeout));
    let _ = tcp.set_write_timeout(Some(config.timeout));

    let mut session = Session::new().map_err(|e| conn_err("Cannot create session for", &e))?;
    session.set_tcp_stream(tcp);
    session.set_timeout(timeout_millis(config.timeout));
    session
        .handshake()
        .map_err(|e| conn_err("SSH handshake failed with", &e))?;

    match (&config.private_key_path, &config.password) {
        (Some(key), passphrase) => session
            .userauth_pubkey_file(&config.username, None, key, passphrase.as_deref())
            .map_err(|e| conn_err("Key authentication rejected by", &e))?,
        (None, Some(password)) => session
            .userauth_password(&config.username, password)
            .map_err(|e| conn_err("Password authentication rejected by", &e))?,
        (None, None) => {
            return Err(SyncError::Connection(format!(
                "No credentials configured for {addr}"
            )))
        }
    }
    if !session.authenticated() {
        return Err(SyncError::Connection(format!(
            "Authentication failed for {}@{addr}",
            config.username
        )));
    }

    session
        .sftp()
        .map_err(|e| conn_err("Cannot open SFTP channel on", &e))
}

fn list_blocking(config: &RemoteConfig) -> Result<Vec<RawEntry>, SyncError> {
    let sftp = connect(config)?;
    let listing = sftp.readdir(Path::new(&config.path)).map_err(|e| {
        SyncError::Connection(format!("Cannot list remote directory {}: {e}", config.path))
    })?;

    let entries = listing
        .into_iter()
        .filter(|(_, stat)| stat.is_file())
        .filter_map(|(path, stat)| {
            let name = path.file_name()?.to_str()?.to_string();
            let modified_at = Utc
                .timestamp_opt(stat.mtime.unwrap_or(0) as i64, 0)
                .single()?;
            Some(RawEntry {
                name,
                size: stat.size.unwrap_or(0),
                modified_at,
                checksum: None,
            })
        })
        .collect();
    Ok(entries)
}

fn download_blocking(
    config: &RemoteConfig,
    filename: &str,
    out: &mut std::fs::File,
    cancelled: &AtomicBool,
) -> Result<u64, SyncError> {
    let sftp = connect(config)?;
    let remote_path = Path::new(&config.path).join(filename);
    let transfer_err = |e: &dyn std::fmt::Display| {
        SyncError::Transfer(format!("Transfer of {} failed: {e}", remote_path.display()))
    };

    let mut remote = sftp.open(&remote_path).map_err(|e| transfer_err(&e))?;
    copy_cancellable(&mut remote, out, cancelled).map_err(|e| transfer_err(&e))
}

fn timeout_millis(timeout: Duration) -> u32 {
    u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX)
}
