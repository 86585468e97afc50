//! Shared helpers for API integration tests.
//!
//! Each test app wraps a real [`ImportOrchestrator`] whose staging area and
//! checkpoint live in a temporary directory. The remote source is an
//! in-memory fake whose listing can be held open to keep a run in flight.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use dumpsync_core::config::{
    RemoteConfig, RemoteProtocol, StagingConfig, SyncConfig, TargetConfig,
};
use dumpsync_core::error::SyncError;
use dumpsync_core::files::FileMetadata;
use dumpsync_pipeline::cache::NoopCacheInvalidator;
use dumpsync_pipeline::loader::{ApplyError, DatabaseApplier};
use dumpsync_pipeline::remote::RemoteSource;
use dumpsync_pipeline::ImportOrchestrator;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tokio::sync::Notify;
use tower::ServiceExt;

use dumpsync_api::config::ServerConfig;
use dumpsync_api::router::build_app_router;
use dumpsync_api::state::AppState;

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        request_timeout_secs: 30,
        shutdown_timeout_secs: 5,
    }
}

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

/// A remote with no files whose listing blocks until [`GatedSource::release`]
/// is called (when gated). Once released the gate stays open, so later runs
/// list immediately.
pub struct GatedSource {
    gate: Option<Notify>,
    released: AtomicBool,
}

impl GatedSource {
    pub fn open() -> Self {
        Self {
            gate: None,
            released: AtomicBool::new(true),
        }
    }

    pub fn gated() -> Self {
        Self {
            gate: Some(Notify::new()),
            released: AtomicBool::new(false),
        }
    }

    pub fn release(&self) {
        self.released.store(true, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notify_waiters();
        }
    }
}

#[async_trait]
impl RemoteSource for GatedSource {
    fn describe(&self) -> String {
        "gated".to_string()
    }

    async fn list_files(&self) -> Result<Vec<FileMetadata>, SyncError> {
        if let Some(gate) = &self.gate {
            loop {
                // Register before checking the flag so a release in between
                // is not missed.
                let notified = gate.notified();
                if self.released.load(Ordering::SeqCst) {
                    break;
                }
                notified.await;
            }
        }
        Ok(Vec::new())
    }

    async fn download(&self, file: &FileMetadata, _dest_dir: &Path) -> Result<PathBuf, SyncError> {
        Err(SyncError::Transfer(format!("{} is not available", file.filename)))
    }
}

/// Accepts every file without doing anything.
pub struct NullApplier;

#[async_trait]
impl DatabaseApplier for NullApplier {
    async fn apply(&self, _target: &TargetConfig, _file: &Path) -> Result<(), ApplyError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// App
// ---------------------------------------------------------------------------

/// A test app plus the pieces tests poke at directly.
pub struct TestApp {
    pub app: Router,
    pub orchestrator: ImportOrchestrator,
    pub source: Arc<GatedSource>,
    _dir: TempDir,
}

fn sync_config(dir: &Path, enabled: bool) -> SyncConfig {
    SyncConfig {
        enabled,
        remote: RemoteConfig {
            protocol: RemoteProtocol::Local,
            path: dir.join("remote").to_string_lossy().into_owned(),
            ..Default::default()
        },
        targets: vec![TargetConfig {
            name: "users".to_string(),
            pattern: "users*.sql".to_string(),
            database_url: "postgres://localhost/users".to_string(),
        }],
        staging: StagingConfig {
            dir: dir.join("staging"),
            checkpoint_path: dir.join("state").join("last_import.json"),
            ..Default::default()
        },
        log_buffer_size: 50,
        ..Default::default()
    }
}

/// Build the full application router over a fresh orchestrator.
///
/// Uses the same [`build_app_router`] as `main.rs` so tests exercise the
/// production middleware stack.
pub fn build_test_app_with(source: GatedSource, enabled: bool) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(source);
    let orchestrator = ImportOrchestrator::new(
        sync_config(dir.path(), enabled),
        source.clone(),
        Arc::new(NullApplier),
        Arc::new(NoopCacheInvalidator),
    );

    let config = test_config();
    let state = AppState {
        orchestrator: orchestrator.clone(),
        config: Arc::new(config.clone()),
    };

    TestApp {
        app: build_app_router(state, &config),
        orchestrator,
        source,
        _dir: dir,
    }
}

pub fn build_test_app() -> TestApp {
    build_test_app_with(GatedSource::open(), true)
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

pub async fn send(app: Router, method: Method, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    send(app, Method::GET, uri).await
}

pub async fn post(app: Router, uri: &str) -> Response<Body> {
    send(app, Method::POST, uri).await
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
