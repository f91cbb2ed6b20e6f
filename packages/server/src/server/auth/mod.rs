//! Admin authentication: password verification and session management.

mod password;
mod session;

pub use password::{hash_password, verify_password};
pub use session::{Session, SessionStore, SessionToken};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use tracing::{info, warn};

/// An admin account row, including the stored password hash.
#[derive(Debug, Clone, FromRow)]
pub struct AdminUser {
    pub id: i64,
    pub username: String,
    pub password_hash: String,
    pub email: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

impl AdminUser {
    pub async fn find_by_username(pool: &PgPool, username: &str) -> Result<Option<AdminUser>> {
        let user = sqlx::query_as::<_, AdminUser>(
            "SELECT id, username, password_hash, email, created_at, last_login \
             FROM admin_users WHERE username = $1",
        )
        .bind(username)
        .fetch_optional(pool)
        .await
        .context("failed to read admin user")?;

        Ok(user)
    }

    pub async fn find_by_id(pool: &PgPool, id: i64) -> Result<Option<AdminUser>> {
        let user = sqlx::query_as::<_, AdminUser>(
            "SELECT id, username, password_hash, email, created_at, last_login \
             FROM admin_users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to read admin user")?;

        Ok(user)
    }

    pub async fn create(
        pool: &PgPool,
        username: &str,
        password_hash: &str,
        email: Option<&str>,
    ) -> Result<i64> {
        let (id,): (i64,) = sqlx::query_as(
            "INSERT INTO admin_users (username, password_hash, email) \
             VALUES ($1, $2, $3) RETURNING id",
        )
        .bind(username)
        .bind(password_hash)
        .bind(email)
        .fetch_one(pool)
        .await
        .context("failed to create admin user")?;

        Ok(id)
    }

    pub async fn touch_last_login(pool: &PgPool, id: i64) -> Result<()> {
        sqlx::query("UPDATE admin_users SET last_login = now() WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await
            .context("failed to update last login")?;
        Ok(())
    }
}

/// Verify credentials and return the account on success.
///
/// Failed attempts are logged; the caller cannot distinguish an unknown user
/// from a bad password.
pub async fn authenticate(
    pool: &PgPool,
    username: &str,
    password: &str,
) -> Result<Option<AdminUser>> {
    let Some(user) = AdminUser::find_by_username(pool, username).await? else {
        warn!(username = %username, "login attempt for unknown user");
        return Ok(None);
    };

    if !verify_password(password, &user.password_hash) {
        warn!(username = %username, "failed password for user");
        return Ok(None);
    }

    if let Err(e) = AdminUser::touch_last_login(pool, user.id).await {
        warn!(username = %username, error = %e, "failed to update last login");
    }

    info!(username = %username, "user authenticated");
    Ok(Some(user))
}

/// Create the bootstrap admin account if it does not exist yet.
pub async fn ensure_admin(pool: &PgPool, username: &str, password: &str) -> Result<()> {
    if AdminUser::find_by_username(pool, username).await?.is_some() {
        return Ok(());
    }

    let hash = hash_password(password)?;
    let id = AdminUser::create(pool, username, &hash, None).await?;
    info!(username = %username, id, "created bootstrap admin user");
    Ok(())
}
