pub mod health;
pub mod import;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /import/status          current run status (GET)
/// /import/logs            recent log entries (GET)
/// /import/trigger         start a manual run (POST)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new().nest("/import", import::router())
}
