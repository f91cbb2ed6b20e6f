//! Login, logout, and current-user endpoints.

use axum::extract::Extension;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ApiError;
use crate::domains::audit;
use crate::server::app::AppState;
use crate::server::auth::{self, AdminUser};
use crate::server::middleware::{bearer_token, AuthUser};

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct UserResponse {
    pub id: i64,
    pub username: String,
    pub email: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

impl From<AdminUser> for UserResponse {
    fn from(user: AdminUser) -> Self {
        Self {
            id: user.id,
            username: user.username,
            email: user.email,
            created_at: user.created_at,
            last_login: user.last_login,
        }
    }
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: UserResponse,
}

/// POST /api/auth/login
pub async fn login_handler(
    Extension(state): Extension<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let user = auth::authenticate(&state.db_pool, &request.username, &request.password)
        .await?
        .ok_or(ApiError::Unauthorized)?;

    let token = state.sessions.create_session(user.id, &user.username).await;
    audit::record(&state.db_pool, &user.username, "login", None, None, None).await;

    Ok(Json(LoginResponse {
        token,
        user: user.into(),
    }))
}

/// POST /api/auth/logout
pub async fn logout_handler(
    Extension(state): Extension<AppState>,
    headers: axum::http::HeaderMap,
) -> Json<serde_json::Value> {
    if let Some(token) = bearer_token(&headers) {
        state.sessions.delete_session(&token).await;
    }
    Json(serde_json::json!({ "success": true }))
}

/// GET /api/auth/me
pub async fn me_handler(
    Extension(state): Extension<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<UserResponse>, ApiError> {
    let user = AdminUser::find_by_id(&state.db_pool, user.user_id)
        .await?
        .ok_or(ApiError::NotFound("user"))?;

    Ok(Json(user.into()))
}
