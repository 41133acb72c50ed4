//! The `Processable` capability and the registry that constructs one from a
//! `(TaskType, payload)` pair at admission time.
//!
//! Rust has no reflection-based dispatch on a string tag, so the "tagged
//! variants or a small trait with a registry" option named in the design
//! notes is realized literally: [`ProcessableRegistry`] holds one factory per
//! [`TaskType`], and admission looks the factory up and hands it the payload.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{AdmissionError, ProcessError};
use crate::task::TaskType;

/// The capability of validating and executing a particular task type's work body.
///
/// `validate` runs once at admission; `process` runs once per worker attempt.
/// Neither is called concurrently for the same task instance (worker contract,
/// §4.4).
#[async_trait]
pub trait Processable: Send + Sync + fmt::Debug {
    /// Checks the parsed payload is well-formed before the task is admitted.
    async fn validate(&self) -> Result<(), AdmissionError>;

    /// Executes the work body. No timeout is imposed by the caller; long-running
    /// work blocks the worker that picked up this task and no other.
    async fn process(&self) -> Result<(), ProcessError>;
}

/// Constructs a boxed [`Processable`] from a task type's raw payload bytes.
///
/// Implemented once per task type and registered with a [`ProcessableRegistry`].
pub trait ProcessableFactory: Send + Sync {
    /// Parses `payload` into a concrete work body, or rejects it at admission.
    fn build(&self, payload: &[u8]) -> Result<Box<dyn Processable>, AdmissionError>;
}

impl<F> ProcessableFactory for F
where
    F: Fn(&[u8]) -> Result<Box<dyn Processable>, AdmissionError> + Send + Sync,
{
    fn build(&self, payload: &[u8]) -> Result<Box<dyn Processable>, AdmissionError> {
        self(payload)
    }
}

/// Maps a [`TaskType`] to the factory that can parse its payload.
///
/// Cloning is cheap: factories are held behind `Arc`.
#[derive(Clone, Default)]
pub struct ProcessableRegistry {
    factories: HashMap<TaskType, Arc<dyn ProcessableFactory>>,
}

impl ProcessableRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory for `task_type`, replacing any prior registration.
    pub fn register<F>(&mut self, task_type: TaskType, factory: F) -> &mut Self
    where
        F: ProcessableFactory + 'static,
    {
        self.factories.insert(task_type, Arc::new(factory));
        self
    }

    /// Parses `payload` into a `Processable` for `task_type`.
    ///
    /// Returns [`AdmissionError::UnknownTaskType`] if nothing is registered,
    /// matching the distilled spec's "an unknown tag is rejected at admission".
    pub fn build(
        &self,
        task_type: TaskType,
        payload: &[u8],
    ) -> Result<Box<dyn Processable>, AdmissionError> {
        let factory = self
            .factories
            .get(&task_type)
            .ok_or_else(|| AdmissionError::UnknownTaskType(task_type.as_str().to_string()))?;
        factory.build(payload)
    }
}

impl fmt::Debug for ProcessableRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessableRegistry")
            .field("registered_types", &self.factories.len())
            .finish()
    }
}
