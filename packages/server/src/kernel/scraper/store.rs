//! Run record persistence.
//!
//! The manager is the only writer: it creates a record when a trigger is
//! accepted and updates that same record exactly once at termination. The
//! read side backs the admin API's run queries.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::PgPool;

use super::run::{Run, RunStatus, TriggerType};

/// Durable storage for run records.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Insert a new record with status `running` and return its id.
    async fn create(
        &self,
        trigger_type: TriggerType,
        actor: &str,
        config: serde_json::Value,
    ) -> Result<i64>;

    /// Write the terminal state of a run.
    async fn update(
        &self,
        id: i64,
        status: RunStatus,
        stories_processed: i32,
        errors_count: i32,
        logs: &str,
        error_message: Option<&str>,
    ) -> Result<()>;

    async fn get(&self, id: i64) -> Result<Option<Run>>;

    /// Page of runs ordered most-recent-first, with the total count.
    async fn list(&self, limit: i64, offset: i64) -> Result<(Vec<Run>, i64)>;

    /// The run currently marked `running`, if any. At most one exists by the
    /// single-flight invariant.
    async fn get_running(&self) -> Result<Option<Run>>;
}

const RUN_COLUMNS: &str = "id, started_at, completed_at, status, trigger_type, triggered_by, \
     stories_processed, errors_count, config, logs, error_message";

/// Postgres-backed run store (`scraper_runs` table).
pub struct PostgresRunStore {
    pool: PgPool,
}

impl PostgresRunStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RunStore for PostgresRunStore {
    async fn create(
        &self,
        trigger_type: TriggerType,
        actor: &str,
        config: serde_json::Value,
    ) -> Result<i64> {
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO scraper_runs (started_at, status, trigger_type, triggered_by, config)
            VALUES (now(), 'running', $1, $2, $3)
            RETURNING id
            "#,
        )
        .bind(trigger_type.as_str())
        .bind(actor)
        .bind(config)
        .fetch_one(&self.pool)
        .await
        .context("failed to insert run record")?;

        Ok(id)
    }

    async fn update(
        &self,
        id: i64,
        status: RunStatus,
        stories_processed: i32,
        errors_count: i32,
        logs: &str,
        error_message: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE scraper_runs
            SET status = $1,
                completed_at = now(),
                stories_processed = $2,
                errors_count = $3,
                logs = $4,
                error_message = $5
            WHERE id = $6
            "#,
        )
        .bind(status)
        .bind(stories_processed)
        .bind(errors_count)
        .bind(logs)
        .bind(error_message)
        .bind(id)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to update run {id}"))?;

        Ok(())
    }

    async fn get(&self, id: i64) -> Result<Option<Run>> {
        let run = sqlx::query_as::<_, Run>(&format!(
            "SELECT {RUN_COLUMNS} FROM scraper_runs WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("failed to read run {id}"))?;

        Ok(run)
    }

    async fn list(&self, limit: i64, offset: i64) -> Result<(Vec<Run>, i64)> {
        let runs = sqlx::query_as::<_, Run>(&format!(
            "SELECT {RUN_COLUMNS} FROM scraper_runs ORDER BY started_at DESC LIMIT $1 OFFSET $2"
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .context("failed to list runs")?;

        let (total,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM scraper_runs")
            .fetch_one(&self.pool)
            .await
            .context("failed to count runs")?;

        Ok((runs, total))
    }

    async fn get_running(&self) -> Result<Option<Run>> {
        let run = sqlx::query_as::<_, Run>(&format!(
            "SELECT {RUN_COLUMNS} FROM scraper_runs WHERE status = 'running' LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await
        .context("failed to read running run")?;

        Ok(run)
    }
}
