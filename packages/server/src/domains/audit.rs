//! Insert-only audit trail for admin actions.

use serde_json::Value;
use sqlx::PgPool;
use tracing::warn;

/// Record an admin action. Best effort: a failed write is logged and never
/// fails the request that caused it.
pub async fn record(
    pool: &PgPool,
    username: &str,
    action: &str,
    entity_type: Option<&str>,
    entity_id: Option<i64>,
    details: Option<Value>,
) {
    let result = sqlx::query(
        r#"
        INSERT INTO audit_log (timestamp, username, action, entity_type, entity_id, details)
        VALUES (now(), $1, $2, $3, $4, $5)
        "#,
    )
    .bind(username)
    .bind(action)
    .bind(entity_type)
    .bind(entity_id)
    .bind(details)
    .execute(pool)
    .await;

    if let Err(e) = result {
        warn!(action = %action, error = %e, "failed to write audit entry");
    }
}
