//! Test doubles for the scraper kernel.
//!
//! Used by unit and integration tests to exercise the manager without a
//! database or network access.

use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use super::engine::{EngineOutcome, ScrapeEngine};
use super::log_buffer::LogBuffer;
use super::run::{Run, RunStatus, ScrapeParams, TriggerType};
use super::store::RunStore;

/// Run store backed by a vector, with sequential ids starting at 1.
pub struct InMemoryRunStore {
    runs: Mutex<Vec<Run>>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self {
            runs: Mutex::new(Vec::new()),
        }
    }

    /// All records, insertion order.
    pub fn all(&self) -> Vec<Run> {
        self.runs.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn len(&self) -> usize {
        self.runs.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryRunStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn create(
        &self,
        trigger_type: TriggerType,
        actor: &str,
        config: serde_json::Value,
    ) -> Result<i64> {
        let mut runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
        let id = runs.len() as i64 + 1;
        runs.push(Run {
            id,
            started_at: Utc::now(),
            completed_at: None,
            status: RunStatus::Running,
            trigger_type: trigger_type.as_str().to_string(),
            triggered_by: Some(actor.to_string()),
            stories_processed: 0,
            errors_count: 0,
            config: Some(config),
            logs: None,
            error_message: None,
        });
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
        let mut runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
        let run = runs
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| anyhow::anyhow!("run {id} not found"))?;
        run.status = status;
        run.completed_at = Some(Utc::now());
        run.stories_processed = stories_processed;
        run.errors_count = errors_count;
        run.logs = Some(logs.to_string());
        run.error_message = error_message.map(|s| s.to_string());
        Ok(())
    }

    async fn get(&self, id: i64) -> Result<Option<Run>> {
        let runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
        Ok(runs.iter().find(|r| r.id == id).cloned())
    }

    async fn list(&self, limit: i64, offset: i64) -> Result<(Vec<Run>, i64)> {
        let runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
        let total = runs.len() as i64;
        let page = runs
            .iter()
            .rev()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect();
        Ok((page, total))
    }

    async fn get_running(&self) -> Result<Option<Run>> {
        let runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
        Ok(runs.iter().find(|r| r.status == RunStatus::Running).cloned())
    }
}

/// Engine that plays back a fixed script of log lines and then terminates
/// the way the test asked it to.
pub struct ScriptedEngine {
    lines: Vec<String>,
    errors: i32,
    fail_with: Option<String>,
    panic_with: Option<String>,
    honor_cancel: bool,
    gate: Option<std::sync::Arc<tokio::sync::Notify>>,
}

impl ScriptedEngine {
    pub fn emitting<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
            errors: 0,
            fail_with: None,
            panic_with: None,
            honor_cancel: false,
            gate: None,
        }
    }

    pub fn silent() -> Self {
        Self::emitting(Vec::<String>::new())
    }

    /// Report this many per-item failures in the outcome.
    pub fn with_errors(mut self, errors: i32) -> Self {
        self.errors = errors;
        self
    }

    /// Return an error with this message after emitting the script.
    pub fn failing_with(mut self, message: impl Into<String>) -> Self {
        self.fail_with = Some(message.into());
        self
    }

    /// Panic with this message after emitting the script.
    pub fn panicking_with(mut self, message: impl Into<String>) -> Self {
        self.panic_with = Some(message.into());
        self
    }

    /// Block after emitting the script until the returned handle is notified.
    pub fn gated(mut self, gate: std::sync::Arc<tokio::sync::Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Stop with a cancelled outcome when the token fires while gated.
    pub fn honoring_cancel(mut self) -> Self {
        self.honor_cancel = true;
        self
    }
}

#[async_trait]
impl ScrapeEngine for ScriptedEngine {
    async fn run(
        &self,
        _params: &ScrapeParams,
        log: &LogBuffer,
        cancel: &CancellationToken,
    ) -> Result<EngineOutcome> {
        for line in &self.lines {
            log.write(line);
        }

        if let Some(gate) = &self.gate {
            if self.honor_cancel {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        log.write("Cancellation requested, stopping scrape");
                        return Ok(EngineOutcome {
                            cancelled: true,
                            errors: self.errors,
                        });
                    }
                    _ = gate.notified() => {}
                }
            } else {
                gate.notified().await;
            }
        } else if self.honor_cancel && cancel.is_cancelled() {
            log.write("Cancellation requested, stopping scrape");
            return Ok(EngineOutcome {
                cancelled: true,
                errors: self.errors,
            });
        }

        if let Some(message) = &self.panic_with {
            panic!("{}", message);
        }
        if let Some(message) = &self.fail_with {
            anyhow::bail!("{}", message);
        }

        Ok(EngineOutcome {
            cancelled: false,
            errors: self.errors,
        })
    }
}
