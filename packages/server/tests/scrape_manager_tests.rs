//! Integration tests for the single-flight scrape manager.
//!
//! Exercises the full trigger → worker → terminal-record lifecycle against
//! the in-memory store and scripted engines: single-flight rejection, slot
//! recovery after every termination mode, notification ordering, and
//! cooperative cancellation.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use admin_core::kernel::scraper::testing::{InMemoryRunStore, ScriptedEngine};
use admin_core::kernel::scraper::{
    Run, RunEvent, RunListener, RunStatus, RunStore, ScrapeManager, ScrapeParams, SubscriptionId,
    TriggerError, TriggerType,
};
use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Notify;

const WAIT: Duration = Duration::from_secs(5);

fn build_manager(engine: ScriptedEngine) -> (ScrapeManager, Arc<InMemoryRunStore>) {
    let store = Arc::new(InMemoryRunStore::new());
    let manager = ScrapeManager::new(store.clone(), Arc::new(engine));
    (manager, store)
}

fn params(limit: u32, story_types: &[&str]) -> ScrapeParams {
    let types = if story_types.is_empty() {
        None
    } else {
        Some(story_types.iter().map(|s| s.to_string()).collect())
    };
    ScrapeParams::new(limit, types)
}

/// Listener that records every event it receives.
struct Recorder {
    events: Mutex<Vec<RunEvent>>,
}

impl Recorder {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
        })
    }

    fn seen(&self) -> Vec<RunEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl RunListener for Recorder {
    fn on_event(&self, event: &RunEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

/// Listener that unsubscribes itself while a delivery is in flight.
struct SelfRemover {
    handle: Mutex<Option<(ScrapeManager, SubscriptionId)>>,
    events: Mutex<Vec<RunEvent>>,
}

impl SelfRemover {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            handle: Mutex::new(None),
            events: Mutex::new(Vec::new()),
        })
    }

    fn arm(&self, manager: ScrapeManager, id: SubscriptionId) {
        *self.handle.lock().unwrap() = Some((manager, id));
    }

    fn seen(&self) -> usize {
        self.events.lock().unwrap().len()
    }
}

impl RunListener for SelfRemover {
    fn on_event(&self, event: &RunEvent) {
        self.events.lock().unwrap().push(event.clone());
        if let Some((manager, id)) = self.handle.lock().unwrap().take() {
            assert!(manager.unsubscribe(id));
        }
    }
}

#[tokio::test]
async fn trigger_starts_a_run_and_reports_running() {
    let gate = Arc::new(Notify::new());
    let (manager, store) = build_manager(ScriptedEngine::silent().gated(gate.clone()));

    let run_id = manager
        .trigger(params(50, &["topstories"]), "admin")
        .await
        .unwrap();

    assert_eq!(run_id, 1);
    assert!(manager.is_running());
    assert_eq!(manager.current_run_id(), Some(1));

    let record = store.get(1).await.unwrap().unwrap();
    assert_eq!(record.status, RunStatus::Running);
    assert_eq!(record.triggered_by.as_deref(), Some("admin"));
    assert_eq!(record.trigger_type, "manual");
    let config = record.config.unwrap();
    assert_eq!(config["limit"], 50);
    assert_eq!(config["story_types"][0], "topstories");

    gate.notify_one();
    assert!(manager.wait_for_completion(WAIT).await);
}

#[tokio::test]
async fn second_trigger_while_running_is_rejected() {
    let gate = Arc::new(Notify::new());
    let (manager, store) = build_manager(ScriptedEngine::silent().gated(gate.clone()));

    let first = manager.trigger(params(10, &[]), "admin").await.unwrap();
    let second = manager.trigger(params(10, &[]), "admin").await;

    assert!(matches!(second, Err(TriggerError::AlreadyRunning)));
    assert_eq!(manager.current_run_id(), Some(first));
    // the rejected trigger must not have created a record
    assert_eq!(store.len(), 1);

    gate.notify_one();
    assert!(manager.wait_for_completion(WAIT).await);
}

#[tokio::test]
async fn completed_run_counts_processed_markers() {
    let (manager, store) = build_manager(ScriptedEngine::emitting([
        "Fetching topstories (limit=3)",
        "Processing story 101: First",
        "Processing story 102: Second",
        "Processing story 103: Third",
    ]));

    manager.trigger(params(3, &["topstories"]), "admin").await.unwrap();
    assert!(manager.wait_for_completion(WAIT).await);

    let run = store.get(1).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.stories_processed, 3);
    assert_eq!(run.errors_count, 0);
    assert!(run.completed_at.is_some());
    assert!(run.logs.unwrap().contains("Processing story 102"));

    assert!(!manager.is_running());
    assert_eq!(manager.current_run_id(), None);
}

#[tokio::test]
async fn failed_run_records_error_message() {
    let (manager, store) =
        build_manager(ScriptedEngine::silent().failing_with("network timeout"));

    manager.trigger(params(10, &[]), "admin").await.unwrap();
    assert!(manager.wait_for_completion(WAIT).await);

    let run = store.get(1).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.error_message.as_deref(), Some("network timeout"));
    assert!(run.errors_count >= 1);
    assert!(run.logs.unwrap().contains("network timeout"));

    assert!(!manager.is_running());
}

#[tokio::test]
async fn panicking_engine_leaves_manager_usable() {
    let (manager, store) = build_manager(ScriptedEngine::silent().panicking_with("boom"));

    manager.trigger(params(10, &[]), "admin").await.unwrap();
    assert!(manager.wait_for_completion(WAIT).await);

    let run = store.get(1).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.error_message.as_deref(), Some("boom"));
    assert!(!manager.is_running());
}

#[tokio::test]
async fn cancel_when_idle_returns_false() {
    let (manager, _) = build_manager(ScriptedEngine::silent());
    assert!(!manager.request_cancel());
}

#[tokio::test]
async fn cooperative_cancellation_yields_cancelled_status() {
    let gate = Arc::new(Notify::new());
    let (manager, store) = build_manager(
        ScriptedEngine::emitting(["Processing story 1: Early"])
            .gated(gate)
            .honoring_cancel(),
    );

    manager.trigger(params(10, &[]), "admin").await.unwrap();
    assert!(manager.request_cancel());
    assert!(manager.wait_for_completion(WAIT).await);

    let run = store.get(1).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Cancelled);
    assert_eq!(run.stories_processed, 1);
    assert!(!manager.is_running());
    assert_eq!(manager.current_run_id(), None);
}

#[tokio::test]
async fn each_run_emits_running_then_exactly_one_terminal() {
    let (manager, _) = build_manager(ScriptedEngine::emitting(["Processing story 1: Only"]));
    let recorder = Recorder::new();
    manager.subscribe(recorder.clone());

    manager.trigger(params(1, &[]), "admin").await.unwrap();
    assert!(manager.wait_for_completion(WAIT).await);

    let events = recorder.seen();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].run_id(), 1);
    assert_eq!(events[0].status(), RunStatus::Running);
    assert_eq!(events[1].run_id(), 1);
    assert_eq!(events[1].status(), RunStatus::Completed);
}

#[tokio::test]
async fn terminal_event_carries_counts_and_error() {
    let (manager, _) =
        build_manager(ScriptedEngine::silent().failing_with("network timeout"));
    let recorder = Recorder::new();
    manager.subscribe(recorder.clone());

    manager.trigger(params(1, &[]), "admin").await.unwrap();
    assert!(manager.wait_for_completion(WAIT).await);

    let events = recorder.seen();
    let json = serde_json::to_value(&events[1]).unwrap();
    assert_eq!(json["type"], "status");
    assert_eq!(json["status"], "failed");
    assert_eq!(json["error_message"], "network timeout");
}

#[tokio::test]
async fn unsubscribing_during_delivery_is_safe() {
    let (manager, _) = build_manager(ScriptedEngine::silent());

    let remover = SelfRemover::new();
    let id = manager.subscribe(remover.clone());
    remover.arm(manager.clone(), id);

    let bystander = Recorder::new();
    manager.subscribe(bystander.clone());

    manager.trigger(params(1, &[]), "admin").await.unwrap();
    assert!(manager.wait_for_completion(WAIT).await);

    // the self-removing listener saw only the running event
    assert_eq!(remover.seen(), 1);
    assert_eq!(bystander.seen().len(), 2);
}

#[tokio::test]
async fn late_subscriber_misses_earlier_events() {
    let (manager, _) = build_manager(ScriptedEngine::silent());

    manager.trigger(params(1, &[]), "admin").await.unwrap();
    assert!(manager.wait_for_completion(WAIT).await);

    let late = Recorder::new();
    manager.subscribe(late.clone());
    assert!(late.seen().is_empty());
}

#[tokio::test]
async fn wait_for_completion_times_out_while_gated() {
    let gate = Arc::new(Notify::new());
    let (manager, _) = build_manager(ScriptedEngine::silent().gated(gate.clone()));

    manager.trigger(params(1, &[]), "admin").await.unwrap();
    assert!(!manager.wait_for_completion(Duration::from_millis(50)).await);

    gate.notify_one();
    assert!(manager.wait_for_completion(WAIT).await);
}

#[tokio::test]
async fn wait_for_completion_is_immediate_when_idle() {
    let (manager, _) = build_manager(ScriptedEngine::silent());
    assert!(manager.wait_for_completion(Duration::from_millis(10)).await);
}

#[tokio::test]
async fn manager_recovers_after_failure_and_accepts_new_trigger() {
    let store = Arc::new(InMemoryRunStore::new());
    let manager = ScrapeManager::new(
        store.clone(),
        Arc::new(ScriptedEngine::silent().failing_with("first run dies")),
    );

    manager.trigger(params(1, &[]), "admin").await.unwrap();
    assert!(manager.wait_for_completion(WAIT).await);

    let second = manager.trigger(params(1, &[]), "admin").await.unwrap();
    assert_eq!(second, 2);
    assert!(manager.wait_for_completion(WAIT).await);
    assert_eq!(store.len(), 2);
}

/// Store whose terminal update always fails.
struct FailingUpdateStore {
    inner: InMemoryRunStore,
}

#[async_trait]
impl RunStore for FailingUpdateStore {
    async fn create(
        &self,
        trigger_type: TriggerType,
        actor: &str,
        config: serde_json::Value,
    ) -> Result<i64> {
        self.inner.create(trigger_type, actor, config).await
    }

    async fn update(
        &self,
        _id: i64,
        _status: RunStatus,
        _stories_processed: i32,
        _errors_count: i32,
        _logs: &str,
        _error_message: Option<&str>,
    ) -> Result<()> {
        anyhow::bail!("database unavailable")
    }

    async fn get(&self, id: i64) -> Result<Option<Run>> {
        self.inner.get(id).await
    }

    async fn list(&self, limit: i64, offset: i64) -> Result<(Vec<Run>, i64)> {
        self.inner.list(limit, offset).await
    }

    async fn get_running(&self) -> Result<Option<Run>> {
        self.inner.get_running().await
    }
}

/// Store that cannot create records at all.
struct FailingCreateStore;

#[async_trait]
impl RunStore for FailingCreateStore {
    async fn create(
        &self,
        _trigger_type: TriggerType,
        _actor: &str,
        _config: serde_json::Value,
    ) -> Result<i64> {
        anyhow::bail!("database unavailable")
    }

    async fn update(
        &self,
        _id: i64,
        _status: RunStatus,
        _stories_processed: i32,
        _errors_count: i32,
        _logs: &str,
        _error_message: Option<&str>,
    ) -> Result<()> {
        Ok(())
    }

    async fn get(&self, _id: i64) -> Result<Option<Run>> {
        Ok(None)
    }

    async fn list(&self, _limit: i64, _offset: i64) -> Result<(Vec<Run>, i64)> {
        Ok((Vec::new(), 0))
    }

    async fn get_running(&self) -> Result<Option<Run>> {
        Ok(None)
    }
}

#[tokio::test]
async fn update_failure_still_clears_the_slot() {
    let store = Arc::new(FailingUpdateStore {
        inner: InMemoryRunStore::new(),
    });
    let manager = ScrapeManager::new(store, Arc::new(ScriptedEngine::silent()));
    let recorder = Recorder::new();
    manager.subscribe(recorder.clone());

    manager.trigger(params(1, &[]), "admin").await.unwrap();
    assert!(manager.wait_for_completion(WAIT).await);

    assert!(!manager.is_running());
    assert_eq!(manager.current_run_id(), None);
    // the terminal event is still published
    assert_eq!(recorder.seen().len(), 2);
}

#[tokio::test]
async fn create_failure_surfaces_to_caller_and_releases_slot() {
    let manager = ScrapeManager::new(
        Arc::new(FailingCreateStore),
        Arc::new(ScriptedEngine::silent()),
    );

    let result = manager.trigger(params(1, &[]), "admin").await;
    assert!(matches!(result, Err(TriggerError::Store(_))));
    assert!(!manager.is_running());
    assert!(manager.wait_for_completion(Duration::from_millis(10)).await);
}

#[tokio::test]
async fn live_logs_are_visible_while_running() {
    let gate = Arc::new(Notify::new());
    let (manager, _) = build_manager(
        ScriptedEngine::emitting(["Fetching topstories (limit=1)"]).gated(gate.clone()),
    );

    manager.trigger(params(1, &[]), "admin").await.unwrap();

    // give the spawned worker a chance to emit its first line
    let mut logs = manager.current_logs().expect("run is active");
    for _ in 0..100 {
        if !logs.is_empty() {
            break;
        }
        tokio::task::yield_now().await;
        logs = manager.current_logs().expect("run is active");
    }
    assert!(logs.contains("Fetching topstories"));

    gate.notify_one();
    assert!(manager.wait_for_completion(WAIT).await);
    assert_eq!(manager.current_logs(), None);
}
