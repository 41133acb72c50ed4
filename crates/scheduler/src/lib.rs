//! `Scheduler` (§4.6): the façade that wires the waiting set, dispatcher,
//! worker pool, and reactor together and exposes the engine's public
//! surface — `submit`, `start`, `stop`, plus the inspection/retry operations
//! a complete engine needs since nothing else owns the store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use scheduler_core::error::AdmissionError;
use scheduler_core::{
    AdmittedTask, EventListeners, Priority, ProcessableRegistry, SchedulerConfig, SchedulerEvent,
    Task, TaskRecord, TaskStatus,
};
use scheduler_dispatcher::PriorityDispatcher;
use scheduler_reactor::ResultReactor;
use scheduler_storage::{StorageError, StoragePort};
use scheduler_waiting::WaitingSet;
use scheduler_worker::{Outcome, SharedReceiver, WorkerPool};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Errors surfaced by the façade, composing the per-component taxonomies
/// (§7) plus the stopped-scheduler case that belongs to the façade alone.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Admission(#[from] AdmissionError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("scheduler has been stopped")]
    Stopped,

    #[error("task {0} is not in a retryable state")]
    NotRetryable(String),
}

/// The scheduling engine's public entry point.
pub struct Scheduler {
    waiting: Arc<WaitingSet>,
    storage: Arc<dyn StoragePort>,
    registry: Arc<ProcessableRegistry>,
    config: Arc<SchedulerConfig>,
    events: EventListeners,
    dispatcher: Arc<PriorityDispatcher>,
    workers: Arc<WorkerPool>,
    reactor: Arc<ResultReactor>,
    cancel: CancellationToken,
    handles: std::sync::Mutex<Vec<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl Scheduler {
    /// Builds a scheduler over the given storage backend and task-type
    /// registry. Does not start any background loop — call [`Scheduler::start`].
    pub fn new(
        config: SchedulerConfig,
        storage: Arc<dyn StoragePort>,
        registry: ProcessableRegistry,
        events: EventListeners,
    ) -> Self {
        let config = Arc::new(config);
        let waiting = Arc::new(WaitingSet::new());

        let mut senders = HashMap::new();
        let mut receivers: HashMap<Priority, SharedReceiver> = HashMap::new();
        for priority in &config.priority_classes {
            let (tx, rx) = mpsc::channel::<Task>(config.max_buffer_size);
            senders.insert(*priority, tx);
            receivers.insert(*priority, Arc::new(AsyncMutex::new(rx)));
        }

        let dispatcher = Arc::new(PriorityDispatcher::new(
            waiting.clone(),
            senders,
            storage.clone(),
            config.clone(),
            events.clone(),
        ));

        let (result_tx, result_rx) = mpsc::unbounded_channel::<Outcome>();
        let workers = Arc::new(WorkerPool::new(
            receivers,
            config.priority_classes_descending(),
            result_tx,
            config.clone(),
            events.clone(),
        ));

        let reactor = Arc::new(ResultReactor::new(
            result_rx,
            waiting.clone(),
            storage.clone(),
            config.clone(),
            events.clone(),
        ));

        Self {
            waiting,
            storage,
            registry: Arc::new(registry),
            config,
            events,
            dispatcher,
            workers,
            reactor,
            cancel: CancellationToken::new(),
            handles: std::sync::Mutex::new(Vec::new()),
            stopped: AtomicBool::new(false),
        }
    }

    /// Admits tasks: parses and validates each payload, persists it, and
    /// appends it to the waiting set. Rejects the whole batch-item on the
    /// first admission failure it hits; tasks already admitted earlier in
    /// the same call stay admitted (§6.1 treats `Submit` as per-task).
    pub async fn submit(&self, tasks: Vec<AdmittedTask>) -> Result<(), SchedulerError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(SchedulerError::Stopped);
        }

        for admitted in tasks {
            if admitted.created_by.trim().is_empty() {
                return Err(AdmissionError::MissingAttribution.into());
            }

            let processable = self
                .registry
                .build(admitted.task_type, &admitted.payload)?;
            processable.validate().await?;

            let task = Task::new(admitted, processable);
            let record = task.to_record();
            if let Err(err) = self.storage.create_task(&record).await {
                warn!(task_id = %record.id, error = %err, "best-effort admission persist failed");
                self.events.emit(&SchedulerEvent::PersistenceFailed {
                    task_id: record.id.clone(),
                    detail: err.to_string(),
                });
            }

            self.events.emit(&SchedulerEvent::Submitted {
                task_id: record.id,
                priority: record.priority,
            });
            self.waiting.append(task);
        }
        Ok(())
    }

    /// Starts the dispatcher loop, the worker pool, and the reactor loop as
    /// background tokio tasks sharing one cancellation token.
    pub fn start(&self) {
        info!(
            worker_pool_size = self.config.worker_pool_size,
            max_buffer_size = self.config.max_buffer_size,
            "scheduler starting"
        );
        let mut handles = self.handles.lock().unwrap();

        let dispatcher = self.dispatcher.clone();
        let cancel = self.cancel.clone();
        handles.push(tokio::spawn(async move { dispatcher.run(cancel).await }));

        let workers = self.workers.clone();
        let cancel = self.cancel.clone();
        handles.push(tokio::spawn(async move { workers.run(cancel).await }));

        let reactor = self.reactor.clone();
        let cancel = self.cancel.clone();
        handles.push(tokio::spawn(async move { reactor.run(cancel).await }));
    }

    /// Signals cancellation to every loop and waits for them to wind down.
    /// Once stopped, `submit` fails with [`SchedulerError::Stopped`].
    pub async fn stop(&self) {
        info!("scheduler stopping");
        self.stopped.store(true, Ordering::SeqCst);
        self.cancel.cancel();

        let handles = {
            let mut guard = self.handles.lock().unwrap();
            std::mem::take(&mut *guard)
        };
        for handle in handles {
            let _ = handle.await;
        }
    }

    /// Reads a task's persisted row back out of the store (§4.6 supplement,
    /// the engine-side half of the HTTP inspection endpoint).
    pub async fn get_task(&self, id: &str) -> Result<Option<TaskRecord>, SchedulerError> {
        Ok(self.storage.get_task_by_id(id).await?)
    }

    /// Manually retries a terminally failed task: resets its retry count and
    /// clears its error, then re-admits it as `Awaiting` (§4.6, §9).
    pub async fn retry(&self, id: &str) -> Result<(), SchedulerError> {
        let mut record = self
            .storage
            .get_task_by_id(id)
            .await?
            .ok_or_else(|| SchedulerError::NotRetryable(id.to_string()))?;

        if record.status != TaskStatus::Failed {
            return Err(SchedulerError::NotRetryable(id.to_string()));
        }

        let processable = self.registry.build(record.task_type, &record.payload)?;

        record.retries = 0;
        record.error = None;
        record.error_details = None;
        record.backoff_until = None;
        record.status = TaskStatus::Awaiting;
        record.finished_at = None;
        self.storage.update_task(&record).await?;

        let task = Task::new(
            AdmittedTask {
                id: Some(record.id.clone()),
                task_type: record.task_type,
                priority: record.priority,
                payload: record.payload.clone(),
                created_by: record.created_by.clone(),
                backoff_duration: record.backoff_duration,
            },
            processable,
        );
        self.events.emit(&SchedulerEvent::Submitted {
            task_id: record.id,
            priority: record.priority,
        });
        self.waiting.append(task);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use scheduler_core::error::ProcessError;
    use scheduler_core::{Processable, TaskType};
    use scheduler_storage::InMemoryStore;

    #[derive(Debug)]
    struct Noop;

    #[async_trait]
    impl Processable for Noop {
        async fn validate(&self) -> Result<(), AdmissionError> {
            Ok(())
        }
        async fn process(&self) -> Result<(), ProcessError> {
            Ok(())
        }
    }

    fn registry() -> ProcessableRegistry {
        let mut registry = ProcessableRegistry::new();
        registry.register(TaskType::SendEmail, |_payload: &[u8]| {
            Ok(Box::new(Noop) as Box<dyn Processable>)
        });
        registry
    }

    fn admitted(id: &str) -> AdmittedTask {
        AdmittedTask {
            id: Some(id.to_string()),
            task_type: TaskType::SendEmail,
            priority: Priority::Low,
            payload: vec![],
            created_by: "alice".into(),
            backoff_duration: None,
        }
    }

    fn scheduler() -> Scheduler {
        let storage: Arc<dyn StoragePort> = Arc::new(InMemoryStore::new());
        Scheduler::new(
            SchedulerConfig::conservative(),
            storage,
            registry(),
            EventListeners::new(),
        )
    }

    #[tokio::test]
    async fn submit_persists_and_enqueues_the_task() {
        let scheduler = scheduler();
        scheduler.submit(vec![admitted("t1")]).await.unwrap();

        let record = scheduler.get_task("t1").await.unwrap().unwrap();
        assert_eq!(record.status, TaskStatus::Awaiting);
    }

    #[tokio::test]
    async fn submit_rejects_unknown_task_type() {
        let scheduler = scheduler();
        let mut bad = admitted("t1");
        bad.task_type = TaskType::CPUProcess;

        let err = scheduler.submit(vec![bad]).await.unwrap_err();
        assert!(matches!(err, SchedulerError::Admission(AdmissionError::UnknownTaskType(_))));
    }

    #[tokio::test]
    async fn submit_rejects_missing_attribution() {
        let scheduler = scheduler();
        let mut bad = admitted("t1");
        bad.created_by = "  ".into();

        let err = scheduler.submit(vec![bad]).await.unwrap_err();
        assert!(matches!(
            err,
            SchedulerError::Admission(AdmissionError::MissingAttribution)
        ));
    }

    #[tokio::test]
    async fn submit_after_stop_is_rejected() {
        let scheduler = scheduler();
        scheduler.start();
        scheduler.stop().await;

        let err = scheduler.submit(vec![admitted("t1")]).await.unwrap_err();
        assert!(matches!(err, SchedulerError::Stopped));
    }

    #[tokio::test]
    async fn retry_requires_failed_status() {
        let scheduler = scheduler();
        scheduler.submit(vec![admitted("t1")]).await.unwrap();

        let err = scheduler.retry("t1").await.unwrap_err();
        assert!(matches!(err, SchedulerError::NotRetryable(_)));
    }

    #[tokio::test]
    async fn happy_path_single_task_reaches_success() {
        let scheduler = scheduler();
        scheduler.submit(vec![admitted("t1")]).await.unwrap();
        scheduler.start();

        let mut record = None;
        for _ in 0..200 {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            let fetched = scheduler.get_task("t1").await.unwrap();
            if matches!(fetched.as_ref().map(|r| r.status), Some(TaskStatus::Success)) {
                record = fetched;
                break;
            }
        }
        scheduler.stop().await;

        let record = record.expect("task should have reached Success");
        assert_eq!(record.status, TaskStatus::Success);
        assert!(record.finished_at.is_some());
    }
}
