//! Route definitions for the `/import` resource.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::import;
use crate::state::AppState;

/// Routes mounted at `/import`.
///
/// ```text
/// GET    /status          -> get_status
/// GET    /logs            -> get_logs
/// POST   /trigger         -> trigger_import
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/status", get(import::get_status))
        .route("/logs", get(import::get_logs))
        .route("/trigger", post(import::trigger_import))
}
