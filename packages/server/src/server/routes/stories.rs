//! Story browsing endpoints.

use axum::extract::{Extension, Path, Query};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use super::ApiError;
use crate::domains::audit;
use crate::domains::stories::Story;
use crate::server::app::AppState;
use crate::server::middleware::AuthUser;

#[derive(Deserialize)]
pub struct StoriesQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub story_type: Option<String>,
}

/// GET /api/stories
pub async fn stories_list_handler(
    Extension(state): Extension<AppState>,
    Query(query): Query<StoriesQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let limit = query.limit.unwrap_or(50).clamp(1, 100);
    let offset = query.offset.unwrap_or(0).max(0);

    let (stories, total) = Story::list(
        &state.db_pool,
        limit,
        offset,
        query.story_type.as_deref(),
    )
    .await?;

    Ok(Json(json!({
        "stories": stories,
        "total": total,
        "limit": limit,
        "offset": offset,
    })))
}

/// GET /api/stories/:id
pub async fn story_detail_handler(
    Extension(state): Extension<AppState>,
    Path(story_id): Path<i64>,
) -> Result<Json<Story>, ApiError> {
    let story = Story::get(&state.db_pool, story_id)
        .await?
        .ok_or(ApiError::NotFound("story"))?;

    Ok(Json(story))
}

/// DELETE /api/stories/:id
pub async fn story_delete_handler(
    Extension(state): Extension<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(story_id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !Story::delete(&state.db_pool, story_id).await? {
        return Err(ApiError::NotFound("story"));
    }

    audit::record(
        &state.db_pool,
        &user.username,
        "story_delete",
        Some("story"),
        Some(story_id),
        None,
    )
    .await;

    Ok(Json(json!({ "success": true })))
}
