//! The storage port (§6.2): a small key-addressed CRUD interface the
//! scheduler depends on, plus an in-memory implementation used by tests and
//! as a runnable default. A real deployment substitutes a relational or
//! otherwise durable implementation of [`StoragePort`]; the scheduling engine
//! never knows the difference.

mod memory;

use async_trait::async_trait;
use scheduler_core::TaskRecord;
use thiserror::Error;

pub use memory::InMemoryStore;

/// Errors surfaced by a [`StoragePort`] implementation.
///
/// Per §7, a `PersistenceFailure` in status-update paths is logged and
/// treated as non-fatal by callers — the error type itself doesn't encode
/// that policy, the caller does.
#[derive(Debug, Error, Clone)]
pub enum StorageError {
    /// `get_task_by_id` found nothing for the given id.
    #[error("no task found with id {0}")]
    NotFound(String),

    /// The backend rejected the write or read for some opaque reason.
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Create / update / get-by-id — the scheduler depends only on this
/// interface (§6.2). Implementations are assumed internally synchronized;
/// the scheduling engine does not serialize around it (§5).
#[async_trait]
pub trait StoragePort: Send + Sync {
    /// Persists a newly admitted task. Idempotency on `id` is recommended but
    /// not required by the core.
    async fn create_task(&self, record: &TaskRecord) -> Result<(), StorageError>;

    /// Overwrites the mutable fields: `status`, `started_at`, `finished_at`,
    /// `retries`, `backoff_until`, `error_details`.
    async fn update_task(&self, record: &TaskRecord) -> Result<(), StorageError>;

    /// Looks a task up by id.
    async fn get_task_by_id(&self, id: &str) -> Result<Option<TaskRecord>, StorageError>;
}
