use std::sync::Arc;

use dumpsync_pipeline::ImportOrchestrator;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (the orchestrator shares its state internally).
#[derive(Clone)]
pub struct AppState {
    /// The import orchestrator driving scheduled and manual runs.
    pub orchestrator: ImportOrchestrator,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
}
