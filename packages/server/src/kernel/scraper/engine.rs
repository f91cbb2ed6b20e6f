//! Scrape engine seam and the Hacker News API implementation.
//!
//! The manager treats the engine as an opaque long-running operation: it
//! writes human-readable progress lines into the log buffer, polls the
//! cancellation token at its own checkpoints, and reports per-item failure
//! counts. Honoring cancellation is the engine's responsibility alone.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::log_buffer::LogBuffer;
use super::run::ScrapeParams;
use crate::domains::stories::Story;

/// What the engine observed by the time it returned.
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineOutcome {
    /// True when the engine stopped at a cancellation checkpoint.
    pub cancelled: bool,
    /// Items the engine tried and failed to process.
    pub errors: i32,
}

/// A long-running scrape operation driven by the manager's worker.
#[async_trait]
pub trait ScrapeEngine: Send + Sync {
    async fn run(
        &self,
        params: &ScrapeParams,
        log: &LogBuffer,
        cancel: &CancellationToken,
    ) -> Result<EngineOutcome>;
}

/// An item from the Hacker News Firebase API (`/v0/item/{id}.json`).
///
/// The API returns null for deleted ids and omits fields freely, so
/// everything beyond the id is optional.
#[derive(Debug, Clone, Deserialize)]
pub struct HnItem {
    pub id: i64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub score: Option<i64>,
    #[serde(default)]
    pub by: Option<String>,
    #[serde(default)]
    pub time: Option<i64>,
    #[serde(default)]
    pub descendants: Option<i64>,
}

/// Engine that scrapes the Hacker News Firebase API and upserts stories.
pub struct HnApiEngine {
    client: reqwest::Client,
    pool: PgPool,
    base_url: String,
}

impl HnApiEngine {
    pub fn new(pool: PgPool, base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("hn-aggregator-admin/0.1")
            .build()
            .context("failed to create HTTP client")?;

        Ok(Self {
            client,
            pool,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn list_url(&self, story_type: &str) -> String {
        format!("{}/{}.json", self.base_url, story_type)
    }

    fn item_url(&self, id: i64) -> String {
        format!("{}/item/{}.json", self.base_url, id)
    }

    async fn fetch_story_ids(&self, story_type: &str) -> Result<Vec<i64>> {
        let url = self.list_url(story_type);
        debug!(url = %url, "fetching story list");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("request for {story_type} list failed"))?
            .error_for_status()
            .with_context(|| format!("{story_type} list returned an error status"))?;

        response
            .json::<Vec<i64>>()
            .await
            .with_context(|| format!("failed to decode {story_type} list"))
    }

    async fn fetch_item(&self, id: i64) -> Result<Option<HnItem>> {
        let response = self
            .client
            .get(self.item_url(id))
            .send()
            .await
            .with_context(|| format!("request for item {id} failed"))?
            .error_for_status()
            .with_context(|| format!("item {id} returned an error status"))?;

        response
            .json::<Option<HnItem>>()
            .await
            .with_context(|| format!("failed to decode item {id}"))
    }
}

#[async_trait]
impl ScrapeEngine for HnApiEngine {
    async fn run(
        &self,
        params: &ScrapeParams,
        log: &LogBuffer,
        cancel: &CancellationToken,
    ) -> Result<EngineOutcome> {
        let mut errors = 0;
        let mut fetched = 0usize;

        for story_type in &params.story_types {
            if cancel.is_cancelled() {
                log.write("Cancellation requested, stopping scrape");
                return Ok(EngineOutcome {
                    cancelled: true,
                    errors,
                });
            }

            log.write(&format!("Fetching {story_type} (limit={})", params.limit));

            let ids = match self.fetch_story_ids(story_type).await {
                Ok(ids) => ids,
                Err(e) => {
                    warn!(story_type = %story_type, error = %e, "story list fetch failed");
                    log.write(&format!("ERROR: failed to fetch {story_type} list: {e:#}"));
                    errors += 1;
                    continue;
                }
            };

            for id in ids.into_iter().take(params.limit as usize) {
                if cancel.is_cancelled() {
                    log.write("Cancellation requested, stopping scrape");
                    return Ok(EngineOutcome {
                        cancelled: true,
                        errors,
                    });
                }

                match self.fetch_item(id).await {
                    Ok(Some(item)) if item.title.is_some() => {
                        if let Err(e) = Story::upsert_from_hn(&self.pool, &item, story_type).await {
                            warn!(hn_id = id, error = %e, "story upsert failed");
                            log.write(&format!("ERROR: failed to store story {id}: {e:#}"));
                            errors += 1;
                            continue;
                        }
                        let title = item.title.as_deref().unwrap_or_default();
                        log.write(&format!("Processing story {id}: {title}"));
                        fetched += 1;
                    }
                    Ok(_) => {
                        log.write(&format!("Skipping item {id}: no longer available"));
                    }
                    Err(e) => {
                        warn!(hn_id = id, error = %e, "item fetch failed");
                        log.write(&format!("ERROR: failed to fetch item {id}: {e:#}"));
                        errors += 1;
                    }
                }
            }
        }

        log.write(&format!(
            "Scrape finished: {fetched} stories across {} lists, {errors} errors",
            params.story_types.len()
        ));

        Ok(EngineOutcome {
            cancelled: false,
            errors,
        })
    }
}
