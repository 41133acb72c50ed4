//! The task model and its state machine.
//!
//! ```text
//!         Submit              Dispatcher              Worker picks up
//!    ∅ ─────────▶ Awaiting ──────────▶ Enqueued ───────────▶ Processing
//!                    ▲                                           │
//!                    │ Reactor (retry)                           │ outcome
//!                    │                                           ▼
//!                  (retry pending)  ◀──── AwaitingRetry ◀── error path
//!                                                                │
//!                                                                ▼ success / exhausted retries
//!                                                          Success | Failed (terminal)
//! ```
//!
//! `AwaitingRetry` is a transient label the reactor reasons about internally;
//! a task never sits in that status in the waiting set or the store — it is
//! re-admitted as `Awaiting` (§4.1).

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::processable::Processable;

/// The closed set of recognized work-body tags. An unrecognized tag is
/// rejected at admission by the `ProcessableRegistry`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskType {
    SendEmail,
    GenerateReport,
    CPUProcess,
}

impl TaskType {
    /// Stable wire/string form, used in admission error messages and storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::SendEmail => "SendEmail",
            TaskType::GenerateReport => "GenerateReport",
            TaskType::CPUProcess => "CPUProcess",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SendEmail" => Ok(TaskType::SendEmail),
            "GenerateReport" => Ok(TaskType::GenerateReport),
            "CPUProcess" => Ok(TaskType::CPUProcess),
            other => Err(other.to_string()),
        }
    }
}

/// Dispatch priority. Ordered `Low < High`; derive order matches declaration
/// order, which is load-bearing for the dispatcher's "highest priority first" scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Priority {
    Low,
    High,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Low
    }
}

/// The task's position in the state machine (§4.1). `AwaitingRetry` is
/// deliberately not a variant here: it is never an observable status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Awaiting,
    Enqueued,
    Processing,
    Success,
    Failed,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Awaiting => "Awaiting",
            TaskStatus::Enqueued => "Enqueued",
            TaskStatus::Processing => "Processing",
            TaskStatus::Success => "Success",
            TaskStatus::Failed => "Failed",
        };
        f.write_str(s)
    }
}

/// What a caller hands to `Scheduler::submit`. Admission assigns `id` if the
/// caller didn't supply one and parses `payload` into a `Processable`.
#[derive(Debug, Clone)]
pub struct AdmittedTask {
    pub id: Option<String>,
    pub task_type: TaskType,
    pub priority: Priority,
    pub payload: Vec<u8>,
    pub created_by: String,
    pub backoff_duration: Option<Duration>,
}

/// The persisted row. Distinct from [`Task`] on purpose (§9 design note):
/// the store never sees a `Processable`, and the runtime `Task` never
/// serializes its payload for storage beyond these fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    pub task_type: TaskType,
    pub priority: Priority,
    pub status: TaskStatus,
    pub payload: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub retries: u32,
    pub backoff_duration: Option<Duration>,
    pub backoff_until: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub error_details: Option<String>,
}

/// The live, in-memory task. Holds a constructed `Processable`, so it is not
/// `Clone` — at any instant it lives in exactly one place: the waiting set, a
/// priority channel, a worker's in-flight slot, or (once terminal) nowhere,
/// only the store (§3 invariants).
pub struct Task {
    pub id: String,
    pub task_type: TaskType,
    pub priority: Priority,
    pub status: TaskStatus,
    pub payload: Vec<u8>,
    pub processable: Box<dyn Processable>,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub retries: u32,
    pub backoff_duration: Option<Duration>,
    pub backoff_until: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub error_details: Option<String>,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("task_type", &self.task_type)
            .field("priority", &self.priority)
            .field("status", &self.status)
            .field("retries", &self.retries)
            .finish_non_exhaustive()
    }
}

impl Task {
    /// Builds a new, `Awaiting` task from an admitted request plus its
    /// already-constructed `Processable`. Assigns a fresh id if the caller
    /// didn't supply one.
    pub fn new(admitted: AdmittedTask, processable: Box<dyn Processable>) -> Self {
        Self {
            id: admitted.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            task_type: admitted.task_type,
            priority: admitted.priority,
            status: TaskStatus::Awaiting,
            payload: admitted.payload,
            processable,
            created_at: Utc::now(),
            created_by: admitted.created_by,
            started_at: None,
            finished_at: None,
            retries: 0,
            backoff_duration: admitted.backoff_duration,
            backoff_until: None,
            error: None,
            error_details: None,
        }
    }

    /// `true` when `backoff_until` is absent or has already passed — the
    /// spec's resolved semantics for the source's ambiguous
    /// `backoffUntil.Before/After(now)` check (§9).
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        match self.backoff_until {
            Some(deadline) => deadline <= now,
            None => true,
        }
    }

    /// Snapshot of the mutable-at-persistence fields, for `StoragePort` calls.
    pub fn to_record(&self) -> TaskRecord {
        TaskRecord {
            id: self.id.clone(),
            task_type: self.task_type,
            priority: self.priority,
            status: self.status,
            payload: self.payload.clone(),
            created_at: self.created_at,
            created_by: self.created_by.clone(),
            started_at: self.started_at,
            finished_at: self.finished_at,
            retries: self.retries,
            backoff_duration: self.backoff_duration,
            backoff_until: self.backoff_until,
            error: self.error.clone(),
            error_details: self.error_details.clone(),
        }
    }
}
