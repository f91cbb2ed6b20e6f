//! Run model and trigger parameters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Story lists scraped when a trigger does not name its own.
pub const DEFAULT_STORY_TYPES: [&str; 5] = [
    "topstories",
    "newstories",
    "showstories",
    "askstories",
    "jobstories",
];

/// Lifecycle status of a scraper run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "run_status", rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }

    /// Terminal statuses never change again.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a run came to be triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerType {
    Manual,
    Scheduled,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerType::Manual => "manual",
            TriggerType::Scheduled => "scheduled",
        }
    }
}

impl std::fmt::Display for TriggerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One execution instance of the scraping task.
///
/// Created with status `running` when a trigger is accepted, mutated exactly
/// once by the worker at termination, never deleted by this process.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Run {
    pub id: i64,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub trigger_type: String,
    pub triggered_by: Option<String>,
    pub stories_processed: i32,
    pub errors_count: i32,
    pub config: Option<serde_json::Value>,
    pub logs: Option<String>,
    pub error_message: Option<String>,
}

/// Parameters for one scrape, recorded verbatim into the run's `config`.
///
/// The core does not validate these beyond shape; the HTTP layer rejects a
/// zero limit before they reach the manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeParams {
    pub limit: u32,
    pub story_types: Vec<String>,
}

impl ScrapeParams {
    /// Build params, filling in the default story lists when none are given.
    pub fn new(limit: u32, story_types: Option<Vec<String>>) -> Self {
        let story_types = match story_types {
            Some(types) if !types.is_empty() => types,
            _ => DEFAULT_STORY_TYPES.iter().map(|s| s.to_string()).collect(),
        };
        Self { limit, story_types }
    }

    /// The audit form persisted into the run record.
    pub fn to_config(&self) -> serde_json::Value {
        serde_json::json!({
            "limit": self.limit,
            "story_types": self.story_types,
        })
    }
}

impl Default for ScrapeParams {
    fn default() -> Self {
        Self::new(100, None)
    }
}
