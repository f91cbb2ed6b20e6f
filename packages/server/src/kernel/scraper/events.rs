//! Run status events and synchronous subscriber fan-out.
//!
//! Events are facts about the run lifecycle, not commands. Every run emits a
//! `running` event at trigger time and exactly one terminal event when the
//! worker finishes; there is no queuing or replay, so a listener registered
//! after an event has fired never sees it.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::error;

use super::run::RunStatus;

/// A status transition published to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    Status {
        run_id: i64,
        status: RunStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stories_processed: Option<i32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        errors_count: Option<i32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_message: Option<String>,
    },
}

impl RunEvent {
    /// Event published when a run is accepted and its worker is launched.
    pub fn running(run_id: i64) -> Self {
        RunEvent::Status {
            run_id,
            status: RunStatus::Running,
            stories_processed: None,
            errors_count: None,
            error_message: None,
        }
    }

    /// Event published once the worker has persisted the terminal record.
    pub fn terminal(
        run_id: i64,
        status: RunStatus,
        stories_processed: i32,
        errors_count: i32,
        error_message: Option<String>,
    ) -> Self {
        RunEvent::Status {
            run_id,
            status,
            stories_processed: Some(stories_processed),
            errors_count: Some(errors_count),
            error_message,
        }
    }

    pub fn run_id(&self) -> i64 {
        match self {
            RunEvent::Status { run_id, .. } => *run_id,
        }
    }

    pub fn status(&self) -> RunStatus {
        match self {
            RunEvent::Status { status, .. } => *status,
        }
    }
}

/// A subscriber to run status transitions.
pub trait RunListener: Send + Sync {
    fn on_event(&self, event: &RunEvent);
}

/// Handle returned by [`Notifier::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Synchronous fan-out of run events to registered listeners.
///
/// `publish` iterates a snapshot of the current listeners, so unsubscribing
/// while a delivery is in flight is safe; a listener that panics is isolated
/// and cannot block or drop delivery to the others.
pub struct Notifier {
    listeners: RwLock<Vec<(SubscriptionId, Arc<dyn RunListener>)>>,
    next_id: AtomicU64,
}

impl Notifier {
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn subscribe(&self, listener: Arc<dyn RunListener>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, listener));
        id
    }

    /// Remove a listener. Returns false when the id was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        let before = listeners.len();
        listeners.retain(|(sid, _)| *sid != id);
        listeners.len() != before
    }

    pub fn publish(&self, event: &RunEvent) {
        let snapshot: Vec<_> = self
            .listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();

        for (id, listener) in snapshot {
            if catch_unwind(AssertUnwindSafe(|| listener.on_event(event))).is_err() {
                error!(subscription = id.0, "run listener panicked during delivery");
            }
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Listener that forwards events into a tokio broadcast channel, bridging the
/// synchronous fan-out to async consumers such as the SSE endpoint.
pub struct BroadcastForwarder {
    tx: broadcast::Sender<RunEvent>,
}

impl BroadcastForwarder {
    pub fn new(tx: broadcast::Sender<RunEvent>) -> Self {
        Self { tx }
    }
}

impl RunListener for BroadcastForwarder {
    fn on_event(&self, event: &RunEvent) {
        // Send errors just mean no active receivers
        let _ = self.tx.send(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

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

    struct Panicker;

    impl RunListener for Panicker {
        fn on_event(&self, _event: &RunEvent) {
            panic!("listener blew up");
        }
    }

    #[test]
    fn running_event_wire_shape() {
        let json = serde_json::to_string(&RunEvent::running(7)).unwrap();
        assert_eq!(json, r#"{"type":"status","run_id":7,"status":"running"}"#);
    }

    #[test]
    fn terminal_event_wire_shape() {
        let event = RunEvent::terminal(3, RunStatus::Failed, 2, 1, Some("network timeout".into()));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "status");
        assert_eq!(json["run_id"], 3);
        assert_eq!(json["status"], "failed");
        assert_eq!(json["stories_processed"], 2);
        assert_eq!(json["errors_count"], 1);
        assert_eq!(json["error_message"], "network timeout");
    }

    #[test]
    fn events_roundtrip() {
        let event = RunEvent::terminal(1, RunStatus::Completed, 3, 0, None);
        let json = serde_json::to_string(&event).unwrap();
        let back: RunEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.run_id(), 1);
        assert_eq!(back.status(), RunStatus::Completed);
    }

    #[test]
    fn publishes_to_all_listeners() {
        let notifier = Notifier::new();
        let a = Recorder::new();
        let b = Recorder::new();
        notifier.subscribe(a.clone());
        notifier.subscribe(b.clone());

        notifier.publish(&RunEvent::running(1));

        assert_eq!(a.seen().len(), 1);
        assert_eq!(b.seen().len(), 1);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let notifier = Notifier::new();
        let recorder = Recorder::new();
        let id = notifier.subscribe(recorder.clone());

        notifier.publish(&RunEvent::running(1));
        assert!(notifier.unsubscribe(id));
        assert!(!notifier.unsubscribe(id));
        notifier.publish(&RunEvent::running(2));

        assert_eq!(recorder.seen().len(), 1);
    }

    #[test]
    fn panicking_listener_does_not_block_others() {
        let notifier = Notifier::new();
        let recorder = Recorder::new();
        notifier.subscribe(Arc::new(Panicker));
        notifier.subscribe(recorder.clone());

        notifier.publish(&RunEvent::running(1));

        assert_eq!(recorder.seen().len(), 1);
    }

    #[tokio::test]
    async fn broadcast_forwarder_bridges_events() {
        let (tx, mut rx) = broadcast::channel(8);
        let notifier = Notifier::new();
        notifier.subscribe(Arc::new(BroadcastForwarder::new(tx)));

        notifier.publish(&RunEvent::running(42));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.run_id(), 42);
    }

    #[test]
    fn forwarder_without_receivers_is_noop() {
        let (tx, _) = broadcast::channel(8);
        drop(tx.subscribe());
        let forwarder = BroadcastForwarder::new(tx);
        forwarder.on_event(&RunEvent::running(1));
    }
}
