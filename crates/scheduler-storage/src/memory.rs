//! An in-memory `StoragePort`, the runnable default and the backend every
//! integration test in this workspace uses.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use scheduler_core::TaskRecord;

use crate::{StorageError, StoragePort};

/// A `Mutex`-guarded `HashMap` keyed on task id. Good enough for a single
/// process; durability across restarts is explicitly out of scope (§1).
#[derive(Default)]
pub struct InMemoryStore {
    rows: Mutex<HashMap<String, TaskRecord>>,
}

impl InMemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows currently held, mostly useful in tests.
    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    /// `true` if no rows are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl StoragePort for InMemoryStore {
    async fn create_task(&self, record: &TaskRecord) -> Result<(), StorageError> {
        self.rows
            .lock()
            .unwrap()
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn update_task(&self, record: &TaskRecord) -> Result<(), StorageError> {
        let mut rows = self.rows.lock().unwrap();
        let existing = rows
            .get_mut(&record.id)
            .ok_or_else(|| StorageError::NotFound(record.id.clone()))?;
        existing.status = record.status;
        existing.started_at = record.started_at;
        existing.finished_at = record.finished_at;
        existing.retries = record.retries;
        existing.backoff_until = record.backoff_until;
        existing.error = record.error.clone();
        existing.error_details = record.error_details.clone();
        Ok(())
    }

    async fn get_task_by_id(&self, id: &str) -> Result<Option<TaskRecord>, StorageError> {
        Ok(self.rows.lock().unwrap().get(id).cloned())
    }
}
