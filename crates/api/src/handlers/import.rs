//! Handlers for the import operational surface.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use dumpsync_core::status::{ImportLogEntry, ImportStatus};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

/// Number of log entries returned when `limit` is omitted.
pub const DEFAULT_LOG_LIMIT: usize = 100;

/// Query parameters for the log endpoint.
#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    /// Maximum number of entries (default: 100, capped at the buffer size).
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct TriggerResponse {
    pub triggered: bool,
}

/// GET /api/v1/import/status
pub async fn get_status(State(state): State<AppState>) -> Json<DataResponse<ImportStatus>> {
    let status = state.orchestrator.status().await;
    Json(DataResponse { data: status })
}

/// GET /api/v1/import/logs?limit=N
///
/// Most recent entries, oldest first.
pub async fn get_logs(
    State(state): State<AppState>,
    Query(params): Query<LogsQuery>,
) -> AppResult<Json<DataResponse<Vec<ImportLogEntry>>>> {
    let limit = params.limit.unwrap_or(DEFAULT_LOG_LIMIT);
    if limit == 0 {
        return Err(AppError::BadRequest("limit must be greater than 0".into()));
    }
    let capacity = state.orchestrator.tracker().capacity();
    let logs = state.orchestrator.logs(limit.min(capacity)).await;
    Ok(Json(DataResponse { data: logs }))
}

/// POST /api/v1/import/trigger
///
/// Start a manual run in the background. Responds 409 while a run is in
/// progress and 503 when imports are disabled.
pub async fn trigger_import(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    state.orchestrator.trigger_manual_import().await?;

    tracing::info!("Manual import triggered via API");

    Ok((
        StatusCode::ACCEPTED,
        Json(DataResponse {
            data: TriggerResponse { triggered: true },
        }),
    ))
}
