//! Story records scraped from Hacker News.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgPool};

use crate::kernel::scraper::HnItem;

/// A scraped story, keyed by its Hacker News id.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Story {
    pub id: i64,
    pub hn_id: i64,
    pub title: String,
    pub url: Option<String>,
    pub score: i32,
    pub author: Option<String>,
    pub story_type: String,
    pub comment_count: i32,
    pub created_at: DateTime<Utc>,
    pub processed_at: DateTime<Utc>,
}

const STORY_COLUMNS: &str = "id, hn_id, title, url, score, author, story_type, comment_count, \
     created_at, processed_at";

impl Story {
    /// Insert or refresh a story from an API item. Re-scraped stories keep
    /// their row and pick up the latest score, comment count, and title.
    pub async fn upsert_from_hn(pool: &PgPool, item: &HnItem, story_type: &str) -> Result<()> {
        let created_at = item
            .time
            .and_then(|t| DateTime::<Utc>::from_timestamp(t, 0))
            .unwrap_or_else(Utc::now);

        sqlx::query(
            r#"
            INSERT INTO stories
                (hn_id, title, url, score, author, story_type, comment_count, created_at, processed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, now())
            ON CONFLICT (hn_id) DO UPDATE
            SET title = EXCLUDED.title,
                url = EXCLUDED.url,
                score = EXCLUDED.score,
                comment_count = EXCLUDED.comment_count,
                processed_at = now()
            "#,
        )
        .bind(item.id)
        .bind(item.title.as_deref().unwrap_or_default())
        .bind(item.url.as_deref())
        .bind(item.score.unwrap_or(0) as i32)
        .bind(item.by.as_deref())
        .bind(story_type)
        .bind(item.descendants.unwrap_or(0) as i32)
        .bind(created_at)
        .execute(pool)
        .await
        .with_context(|| format!("failed to upsert story {}", item.id))?;

        Ok(())
    }

    pub async fn get(pool: &PgPool, id: i64) -> Result<Option<Story>> {
        let story =
            sqlx::query_as::<_, Story>(&format!("SELECT {STORY_COLUMNS} FROM stories WHERE id = $1"))
                .bind(id)
                .fetch_optional(pool)
                .await
                .with_context(|| format!("failed to read story {id}"))?;

        Ok(story)
    }

    /// Page of stories ordered by processing time descending, optionally
    /// filtered by story type, with the matching total.
    pub async fn list(
        pool: &PgPool,
        limit: i64,
        offset: i64,
        story_type: Option<&str>,
    ) -> Result<(Vec<Story>, i64)> {
        let (stories, total) = match story_type {
            Some(story_type) => {
                let stories = sqlx::query_as::<_, Story>(&format!(
                    "SELECT {STORY_COLUMNS} FROM stories WHERE story_type = $1 \
                     ORDER BY processed_at DESC LIMIT $2 OFFSET $3"
                ))
                .bind(story_type)
                .bind(limit)
                .bind(offset)
                .fetch_all(pool)
                .await
                .context("failed to list stories")?;

                let (total,): (i64,) =
                    sqlx::query_as("SELECT COUNT(*) FROM stories WHERE story_type = $1")
                        .bind(story_type)
                        .fetch_one(pool)
                        .await
                        .context("failed to count stories")?;

                (stories, total)
            }
            None => {
                let stories = sqlx::query_as::<_, Story>(&format!(
                    "SELECT {STORY_COLUMNS} FROM stories ORDER BY processed_at DESC \
                     LIMIT $1 OFFSET $2"
                ))
                .bind(limit)
                .bind(offset)
                .fetch_all(pool)
                .await
                .context("failed to list stories")?;

                let (total,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM stories")
                    .fetch_one(pool)
                    .await
                    .context("failed to count stories")?;

                (stories, total)
            }
        };

        Ok((stories, total))
    }

    /// Returns true when a row was deleted.
    pub async fn delete(pool: &PgPool, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM stories WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await
            .with_context(|| format!("failed to delete story {id}"))?;

        Ok(result.rows_affected() > 0)
    }
}
