//! Single-flight scrape manager.
//!
//! Owns the one active-run slot, the cooperative cancellation token, and the
//! subscriber fan-out, and orchestrates store/log/engine around each run:
//!
//! ```text
//! trigger ──► reserve slot ──► create run record ──► publish running
//!                 │                                       │
//!                 │                              spawn worker task
//!                 │                                       │
//!                 │            engine.run(params, log, cancel)  [catch_unwind]
//!                 │                                       │
//!                 │            persist terminal record ──► publish terminal
//!                 └──────────────────── clear slot (always) ◄┘
//! ```
//!
//! The slot mutex guards pointer-sized state only and is never held across an
//! await of the engine.

use std::any::Any;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::FutureExt;
use lazy_static::lazy_static;
use regex::Regex;
use std::panic::AssertUnwindSafe;
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::engine::ScrapeEngine;
use super::events::{Notifier, RunEvent, RunListener, SubscriptionId};
use super::log_buffer::LogBuffer;
use super::run::{RunStatus, ScrapeParams, TriggerType};
use super::store::RunStore;

lazy_static! {
    /// Marker lines the engine emits once per stored story. Progress is
    /// derived by counting them in the captured text, so the count is only as
    /// reliable as the engine's wording.
    static ref PROCESSED_MARKER: Regex = Regex::new(r"Processing story (\d+)").unwrap();
}

/// Why a trigger was rejected.
#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("scraper is already running")]
    AlreadyRunning,
    #[error("failed to create run record: {0}")]
    Store(#[source] anyhow::Error),
}

enum Slot {
    Idle,
    /// Claimed by a trigger that is still creating the run record.
    Reserved,
    Active {
        run_id: i64,
        cancel: CancellationToken,
        log: Arc<LogBuffer>,
    },
}

struct Inner {
    store: Arc<dyn RunStore>,
    engine: Arc<dyn ScrapeEngine>,
    notifier: Notifier,
    slot: Mutex<Slot>,
    busy: watch::Sender<bool>,
}

/// Controller for the background scraping task.
///
/// Guarantees at most one concurrent run and that the slot is cleared after
/// every worker termination, whatever the cause, so a failed run never blocks
/// the next trigger. Construct one instance at startup and share it by clone.
#[derive(Clone)]
pub struct ScrapeManager {
    inner: Arc<Inner>,
}

impl ScrapeManager {
    pub fn new(store: Arc<dyn RunStore>, engine: Arc<dyn ScrapeEngine>) -> Self {
        let (busy, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                store,
                engine,
                notifier: Notifier::new(),
                slot: Mutex::new(Slot::Idle),
                busy,
            }),
        }
    }

    /// Start a new run and return its id without waiting for progress.
    ///
    /// Fails with [`TriggerError::AlreadyRunning`] when the slot is occupied;
    /// in that case no run record is created. The slot is reserved before the
    /// record insert so two concurrent triggers cannot both observe idle.
    pub async fn trigger(&self, params: ScrapeParams, actor: &str) -> Result<i64, TriggerError> {
        {
            let mut slot = self.inner.slot.lock().unwrap_or_else(|e| e.into_inner());
            if !matches!(*slot, Slot::Idle) {
                return Err(TriggerError::AlreadyRunning);
            }
            *slot = Slot::Reserved;
            let _ = self.inner.busy.send(true);
        }

        let run_id = match self
            .inner
            .store
            .create(TriggerType::Manual, actor, params.to_config())
            .await
        {
            Ok(id) => id,
            Err(e) => {
                self.inner.clear_slot();
                return Err(TriggerError::Store(e));
            }
        };

        let cancel = CancellationToken::new();
        let log = Arc::new(LogBuffer::new());
        {
            let mut slot = self.inner.slot.lock().unwrap_or_else(|e| e.into_inner());
            *slot = Slot::Active {
                run_id,
                cancel: cancel.clone(),
                log: log.clone(),
            };
        }

        info!(run_id, limit = params.limit, actor = %actor, "scrape run started");
        self.inner.notifier.publish(&RunEvent::running(run_id));

        let inner = self.inner.clone();
        tokio::spawn(async move {
            inner.run_worker(run_id, params, log, cancel).await;
        });

        Ok(run_id)
    }

    /// True while the active-run slot is occupied.
    pub fn is_running(&self) -> bool {
        let slot = self.inner.slot.lock().unwrap_or_else(|e| e.into_inner());
        !matches!(*slot, Slot::Idle)
    }

    pub fn current_run_id(&self) -> Option<i64> {
        let slot = self.inner.slot.lock().unwrap_or_else(|e| e.into_inner());
        match &*slot {
            Slot::Active { run_id, .. } => Some(*run_id),
            _ => None,
        }
    }

    /// Live snapshot of the active run's captured output, if one is running.
    pub fn current_logs(&self) -> Option<String> {
        let slot = self.inner.slot.lock().unwrap_or_else(|e| e.into_inner());
        match &*slot {
            Slot::Active { log, .. } => Some(log.snapshot()),
            _ => None,
        }
    }

    /// Request cooperative cancellation of the active run.
    ///
    /// Returns false when idle. The signal is advisory: the engine polls the
    /// token at its own checkpoints, and an unhonored request leaves the run
    /// to terminate normally.
    pub fn request_cancel(&self) -> bool {
        let slot = self.inner.slot.lock().unwrap_or_else(|e| e.into_inner());
        match &*slot {
            Slot::Active { run_id, cancel, .. } => {
                cancel.cancel();
                info!(run_id, "cancellation requested");
                true
            }
            _ => false,
        }
    }

    pub fn subscribe(&self, listener: Arc<dyn RunListener>) -> SubscriptionId {
        self.inner.notifier.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.notifier.unsubscribe(id)
    }

    /// Wait until the current worker finishes or the timeout elapses.
    /// Returns true when the manager is idle, immediately so if no run is
    /// active.
    pub async fn wait_for_completion(&self, timeout: Duration) -> bool {
        let mut rx = self.inner.busy.subscribe();
        let result = matches!(
            tokio::time::timeout(timeout, rx.wait_for(|busy| !*busy)).await,
            Ok(Ok(_))
        );
        result
    }
}

impl Inner {
    async fn run_worker(
        self: Arc<Self>,
        run_id: i64,
        params: ScrapeParams,
        log: Arc<LogBuffer>,
        cancel: CancellationToken,
    ) {
        let started = std::time::Instant::now();

        // catch_unwind converts a panicking engine into a failed terminal
        // record instead of a permanently occupied slot
        let outcome = AssertUnwindSafe(self.engine.run(&params, &log, &cancel))
            .catch_unwind()
            .await;

        let (status, errors_count, error_message) = match outcome {
            Ok(Ok(report)) if report.cancelled => {
                (RunStatus::Cancelled, report.errors, None)
            }
            Ok(Ok(report)) => (RunStatus::Completed, report.errors, None),
            Ok(Err(e)) => {
                let message = e.to_string();
                log.write(&format!("ERROR: scrape failed: {e:#}"));
                (RunStatus::Failed, 1, Some(message))
            }
            Err(panic) => {
                let message = panic_message(panic);
                log.write(&format!("ERROR: scrape worker panicked: {message}"));
                (RunStatus::Failed, 1, Some(message))
            }
        };

        let logs = log.snapshot();
        let stories_processed = count_processed(&logs);

        if let Err(e) = self
            .store
            .update(
                run_id,
                status,
                stories_processed,
                errors_count,
                &logs,
                error_message.as_deref(),
            )
            .await
        {
            error!(run_id, error = %e, "failed to persist terminal run record");
        }

        match status {
            RunStatus::Failed => {
                warn!(run_id, error = error_message.as_deref().unwrap_or(""), "scrape run failed")
            }
            _ => info!(
                run_id,
                status = %status,
                stories = stories_processed,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "scrape run finished"
            ),
        }

        self.notifier.publish(&RunEvent::terminal(
            run_id,
            status,
            stories_processed,
            errors_count,
            error_message,
        ));

        self.clear_slot();
    }

    fn clear_slot(&self) {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Slot::Idle;
        let _ = self.busy.send(false);
    }
}

fn count_processed(logs: &str) -> i32 {
    PROCESSED_MARKER.find_iter(logs).count() as i32
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}
