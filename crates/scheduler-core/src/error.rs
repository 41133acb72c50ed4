//! Error taxonomy for admission and task execution.
//!
//! Storage errors live in `scheduler-storage` and the top-level
//! `SchedulerError` that composes everything lives in the `scheduler`
//! aggregator crate, to avoid this crate depending on either.

use thiserror::Error;

/// Raised by [`crate::Scheduler::submit`][submit] equivalents when a task fails
/// admission-time validation. Never persisted — the caller is told directly.
///
/// [submit]: https://docs.rs/scheduler
#[derive(Debug, Error, Clone)]
pub enum AdmissionError {
    /// The task carried a `taskType` tag outside the closed set the registry knows.
    #[error("unknown task type: {0}")]
    UnknownTaskType(String),

    /// The payload failed `Processable::validate`.
    #[error("payload validation failed: {0}")]
    PayloadValidation(String),

    /// `createdBy` (or another required attribution field) was empty.
    #[error("missing required attribution")]
    MissingAttribution,
}

/// Raised by a [`crate::Processable::process`] implementation. Carried back on
/// the result channel; never surfaced directly to a submitter.
#[derive(Debug, Error, Clone)]
#[error("{0}")]
pub struct ProcessError(pub String);

impl ProcessError {
    /// Wraps any displayable error as a `ProcessError`.
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}
