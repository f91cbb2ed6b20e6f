//! Scraper control and run query endpoints.

use axum::extract::{Extension, Path, Query};
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::ApiError;
use crate::domains::audit;
use crate::kernel::scraper::{Run, RunStatus, ScrapeParams, TriggerError};
use crate::server::app::AppState;
use crate::server::middleware::AuthUser;

#[derive(Deserialize)]
pub struct TriggerRequest {
    pub limit: Option<u32>,
    pub story_types: Option<Vec<String>>,
}

/// Run record as exposed over the API. Logs are large and have their own
/// endpoint, so they are not repeated here.
#[derive(Serialize)]
pub struct RunResponse {
    pub id: i64,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub trigger_type: String,
    pub triggered_by: Option<String>,
    pub stories_processed: i32,
    pub errors_count: i32,
    pub config: Option<serde_json::Value>,
    pub error_message: Option<String>,
}

impl From<Run> for RunResponse {
    fn from(run: Run) -> Self {
        Self {
            id: run.id,
            started_at: run.started_at,
            completed_at: run.completed_at,
            status: run.status,
            trigger_type: run.trigger_type,
            triggered_by: run.triggered_by,
            stories_processed: run.stories_processed,
            errors_count: run.errors_count,
            config: run.config,
            error_message: run.error_message,
        }
    }
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub is_running: bool,
    pub current_run: Option<RunResponse>,
    pub last_completed: Option<RunResponse>,
}

#[derive(Deserialize)]
pub struct PageQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// POST /api/scraper/trigger
pub async fn trigger_handler(
    Extension(state): Extension<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(request): Json<TriggerRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let limit = request.limit.unwrap_or(100);
    if limit == 0 {
        return Err(ApiError::BadRequest("limit must be positive".into()));
    }

    let params = ScrapeParams::new(limit, request.story_types);
    let config = params.to_config();

    let run_id = match state.manager.trigger(params, &user.username).await {
        Ok(run_id) => run_id,
        Err(TriggerError::AlreadyRunning) => {
            return Err(ApiError::Conflict("Scraper is already running".into()))
        }
        Err(TriggerError::Store(e)) => return Err(ApiError::Internal(e)),
    };

    audit::record(
        &state.db_pool,
        &user.username,
        "scraper_start",
        Some("scraper_run"),
        Some(run_id),
        Some(config),
    )
    .await;

    Ok(Json(json!({ "run_id": run_id, "status": "started" })))
}

/// GET /api/scraper/status
pub async fn status_handler(
    Extension(state): Extension<AppState>,
) -> Result<Json<StatusResponse>, ApiError> {
    let is_running = state.manager.is_running();

    // When the manager is idle, a stale `running` record (e.g. after a crash
    // restart) still surfaces here rather than being silently hidden.
    let current_run = match state.manager.current_run_id() {
        Some(run_id) => state.run_store.get(run_id).await?.map(RunResponse::from),
        None => state.run_store.get_running().await?.map(RunResponse::from),
    };

    let (recent, _) = state.run_store.list(10, 0).await?;
    let last_completed = recent
        .into_iter()
        .find(|run| run.status == RunStatus::Completed)
        .map(RunResponse::from);

    Ok(Json(StatusResponse {
        is_running,
        current_run,
        last_completed,
    }))
}

/// POST /api/scraper/cancel
pub async fn cancel_handler(
    Extension(state): Extension<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let run_id = state.manager.current_run_id();

    if !state.manager.request_cancel() {
        return Err(ApiError::Conflict("No scraper running".into()));
    }

    audit::record(
        &state.db_pool,
        &user.username,
        "scraper_cancel",
        Some("scraper_run"),
        run_id,
        None,
    )
    .await;

    Ok(Json(
        json!({ "success": true, "message": "Cancellation requested" }),
    ))
}

/// GET /api/scraper/runs
pub async fn runs_list_handler(
    Extension(state): Extension<AppState>,
    Query(page): Query<PageQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let limit = page.limit.unwrap_or(20).clamp(1, 100);
    let offset = page.offset.unwrap_or(0).max(0);

    let (runs, total) = state.run_store.list(limit, offset).await?;
    let runs: Vec<RunResponse> = runs.into_iter().map(RunResponse::from).collect();

    Ok(Json(json!({
        "runs": runs,
        "total": total,
        "limit": limit,
        "offset": offset,
    })))
}

/// GET /api/scraper/runs/:id
pub async fn run_detail_handler(
    Extension(state): Extension<AppState>,
    Path(run_id): Path<i64>,
) -> Result<Json<RunResponse>, ApiError> {
    let run = state
        .run_store
        .get(run_id)
        .await?
        .ok_or(ApiError::NotFound("run"))?;

    Ok(Json(run.into()))
}

/// GET /api/scraper/runs/:id/logs
///
/// Serves the live buffer for the active run, the persisted text otherwise.
pub async fn run_logs_handler(
    Extension(state): Extension<AppState>,
    Path(run_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let logs = if state.manager.current_run_id() == Some(run_id) {
        state.manager.current_logs().unwrap_or_default()
    } else {
        let run = state
            .run_store
            .get(run_id)
            .await?
            .ok_or(ApiError::NotFound("run"))?;
        run.logs.unwrap_or_default()
    };

    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        logs,
    ))
}
