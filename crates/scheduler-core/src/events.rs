//! Event system for the scheduling engine.
//!
//! Every component emits [`SchedulerEvent`]s through a shared
//! [`EventListeners`] collection so callers can observe admission, dispatch,
//! execution, and retry/terminal decisions without coupling to a specific
//! logging backend.

use std::fmt;
use std::panic;
use std::sync::Arc;

use crate::task::Priority;

/// An observable occurrence inside the scheduling engine.
#[derive(Debug, Clone)]
pub enum SchedulerEvent {
    /// A task was admitted and appended to the waiting set.
    Submitted { task_id: String, priority: Priority },
    /// The dispatcher moved a task from the waiting set into a priority channel.
    Dispatched { task_id: String, priority: Priority },
    /// A dispatch pass found a full channel and skipped this task for the pass.
    DispatchSkipped { task_id: String, priority: Priority },
    /// A worker picked up a task and began executing it.
    Started { task_id: String, priority: Priority },
    /// A task reached terminal `Success`.
    Succeeded { task_id: String, attempts: u32 },
    /// A task failed but is eligible for retry and was re-admitted.
    Retried {
        task_id: String,
        attempt: u32,
        backoff_until: Option<chrono::DateTime<chrono::Utc>>,
    },
    /// A task exhausted its retry budget and reached terminal `Failed`.
    TerminallyFailed {
        task_id: String,
        attempts: u32,
        error: String,
    },
    /// A best-effort persistence write failed; the in-memory state is authoritative.
    PersistenceFailed { task_id: String, detail: String },
}

impl SchedulerEvent {
    /// A short machine-readable tag, handy for metrics labels and log filters.
    pub fn kind(&self) -> &'static str {
        match self {
            SchedulerEvent::Submitted { .. } => "submitted",
            SchedulerEvent::Dispatched { .. } => "dispatched",
            SchedulerEvent::DispatchSkipped { .. } => "dispatch_skipped",
            SchedulerEvent::Started { .. } => "started",
            SchedulerEvent::Succeeded { .. } => "succeeded",
            SchedulerEvent::Retried { .. } => "retried",
            SchedulerEvent::TerminallyFailed { .. } => "terminally_failed",
            SchedulerEvent::PersistenceFailed { .. } => "persistence_failed",
        }
    }
}

/// Trait for listening to scheduler events.
pub trait EventListener: Send + Sync {
    /// Called synchronously, on the emitting component's own task, when an event occurs.
    fn on_event(&self, event: &SchedulerEvent);
}

/// A function-based event listener, for ad-hoc subscriptions.
pub struct FnListener<F: Fn(&SchedulerEvent) + Send + Sync>(F);

impl<F: Fn(&SchedulerEvent) + Send + Sync> FnListener<F> {
    /// Wraps a closure as an [`EventListener`].
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F: Fn(&SchedulerEvent) + Send + Sync> EventListener for FnListener<F> {
    fn on_event(&self, event: &SchedulerEvent) {
        (self.0)(event)
    }
}

/// A collection of event listeners, shared across every scheduler component.
#[derive(Clone, Default)]
pub struct EventListeners {
    listeners: Vec<Arc<dyn EventListener>>,
}

impl EventListeners {
    /// Creates an empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener.
    pub fn add<L: EventListener + 'static>(&mut self, listener: L) {
        self.listeners.push(Arc::new(listener));
    }

    /// Emits an event to every registered listener.
    ///
    /// A panicking listener is caught and logged so one misbehaving
    /// subscriber can't take down the dispatcher, worker, or reactor loop
    /// that's emitting the event.
    pub fn emit(&self, event: &SchedulerEvent) {
        for listener in &self.listeners {
            let result =
                panic::catch_unwind(panic::AssertUnwindSafe(|| listener.on_event(event)));
            if let Err(payload) = result {
                let message = payload
                    .downcast_ref::<&'static str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "non-string panic payload".to_string());
                tracing::warn!(
                    event_kind = event.kind(),
                    panic_message = %message,
                    "scheduler event listener panicked"
                );
            }
        }
    }

    /// True if nothing is subscribed.
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

impl fmt::Debug for EventListeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventListeners")
            .field("count", &self.listeners.len())
            .finish()
    }
}
