//! Core types for the asynchronous task scheduling engine.
//!
//! This crate provides shared functionality used across all scheduler
//! components: the task model and its state machine, the `Processable`
//! capability and its registry, the event system for observability, shared
//! admission/processing errors, and the builder-based configuration surface.

pub mod config;
pub mod error;
pub mod events;
pub mod processable;
pub mod task;

pub use config::{SchedulerConfig, SchedulerConfigBuilder};
pub use error::{AdmissionError, ProcessError};
pub use events::{EventListener, EventListeners, FnListener, SchedulerEvent};
pub use processable::{Processable, ProcessableFactory, ProcessableRegistry};
pub use task::{AdmittedTask, Priority, Task, TaskRecord, TaskStatus, TaskType};
