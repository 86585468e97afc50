use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dumpsync_core::error::SyncError;
use dumpsync_pipeline::cache::build_invalidator;
use dumpsync_pipeline::remote::build_source;
use dumpsync_pipeline::ImportOrchestrator;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dumpsync_api::config::{sync_config_from_env, LoaderConfig, ServerConfig};
use dumpsync_api::router::build_app_router;
use dumpsync_api::state::AppState;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "dumpsync_api=debug,dumpsync_pipeline=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    let sync_config = sync_config_from_env().expect("Invalid import configuration");
    let loader = LoaderConfig::from_env().expect("Invalid loader configuration");
    tracing::info!(
        enabled = sync_config.enabled,
        schedule = %sync_config.schedule,
        targets = sync_config.targets.len(),
        loader = ?loader,
        "Loaded import configuration"
    );

    // --- Import pipeline ---
    let source = build_source(&sync_config.remote).expect("Failed to build remote source");
    let cache = build_invalidator(sync_config.cache_invalidate_url.as_deref())
        .expect("Failed to build cache invalidator");
    let applier = loader
        .build_applier()
        .expect("Failed to build database applier");
    tracing::info!(source = %source.describe(), "Remote source configured");

    let orchestrator = ImportOrchestrator::new(sync_config, source, applier, cache);

    match orchestrator.start().await {
        Ok(()) => tracing::info!("Import scheduler started"),
        Err(SyncError::ServiceDisabled) => {
            tracing::info!("Import service disabled, scheduler not started");
        }
        Err(e) => panic!("Failed to start import scheduler: {e}"),
    }

    // --- App state ---
    let state = AppState {
        orchestrator: orchestrator.clone(),
        config: Arc::new(config.clone()),
    };

    // --- Router ---
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    if let Err(e) = orchestrator.stop() {
        tracing::warn!(error = %e, "Failed to stop import scheduler");
    }

    // Let an in-flight run reach its terminal state.
    let deadline = Duration::from_secs(config.shutdown_timeout_secs);
    if tokio::time::timeout(deadline, orchestrator.wait_idle())
        .await
        .is_err()
    {
        tracing::warn!(
            timeout_secs = config.shutdown_timeout_secs,
            "Import still running at shutdown deadline"
        );
    } else {
        tracing::info!("Import scheduler stopped");
    }

    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix) so the server
/// shuts down cleanly whether stopped interactively or by a process
/// manager (e.g. systemd, Docker, Kubernetes).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
