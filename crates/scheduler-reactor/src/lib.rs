//! `ResultReactor` (§4.5): the single consumer of worker outcomes. Decides,
//! for each finished task, whether it reached terminal `Success`, terminal
//! `Failed`, or gets re-admitted to the waiting set for another attempt.

use std::sync::Arc;

use chrono::Utc;
use scheduler_core::{EventListeners, SchedulerConfig, SchedulerEvent, TaskStatus};
use scheduler_storage::StoragePort;
use scheduler_waiting::WaitingSet;
use scheduler_worker::Outcome;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Drives the retry/backoff/terminal state machine (§4.1, §4.5).
pub struct ResultReactor {
    results: tokio::sync::Mutex<UnboundedReceiver<Outcome>>,
    waiting: Arc<WaitingSet>,
    storage: Arc<dyn StoragePort>,
    config: Arc<SchedulerConfig>,
    events: EventListeners,
}

impl ResultReactor {
    /// Builds a reactor that consumes from `results` until the channel closes
    /// or `run`'s cancellation token trips.
    pub fn new(
        results: UnboundedReceiver<Outcome>,
        waiting: Arc<WaitingSet>,
        storage: Arc<dyn StoragePort>,
        config: Arc<SchedulerConfig>,
        events: EventListeners,
    ) -> Self {
        Self {
            results: tokio::sync::Mutex::new(results),
            waiting,
            storage,
            config,
            events,
        }
    }

    /// Consumes outcomes until `cancel` trips or the result channel closes.
    pub async fn run(&self, cancel: CancellationToken) {
        debug!("reactor loop started");
        loop {
            let outcome = {
                let mut results = self.results.lock().await;
                tokio::select! {
                    outcome = results.recv() => outcome,
                    _ = cancel.cancelled() => None,
                }
            };
            let Some(outcome) = outcome else {
                break;
            };
            self.handle(outcome).await;
        }
        debug!("reactor loop stopped");
    }

    async fn handle(&self, outcome: Outcome) {
        let Outcome { mut task, error } = outcome;
        let attempts = task.retries + 1;

        match error {
            None => {
                task.status = TaskStatus::Success;
                task.finished_at = Some(Utc::now());
                let record = task.to_record();
                self.events.emit(&SchedulerEvent::Succeeded {
                    task_id: record.id.clone(),
                    attempts,
                });
                self.persist(&record).await;
            }
            Some(err) => {
                task.error = Some(err.0.clone());
                task.error_details = Some(err.0.clone());

                if task.retries >= self.config.max_task_retry {
                    task.status = TaskStatus::Failed;
                    task.finished_at = Some(Utc::now());
                    let record = task.to_record();
                    self.events.emit(&SchedulerEvent::TerminallyFailed {
                        task_id: record.id.clone(),
                        attempts,
                        error: err.0.clone(),
                    });
                    self.persist(&record).await;
                } else {
                    task.retries += 1;
                    task.backoff_until = task
                        .backoff_duration
                        .map(|d| Utc::now() + chrono::Duration::from_std(d).unwrap_or_default());
                    task.error = None;
                    task.error_details = None;
                    task.status = TaskStatus::Awaiting;

                    let record = task.to_record();
                    self.events.emit(&SchedulerEvent::Retried {
                        task_id: record.id.clone(),
                        attempt: task.retries,
                        backoff_until: record.backoff_until,
                    });
                    self.persist(&record).await;

                    self.waiting.append(task);
                }
            }
        }
    }

    async fn persist(&self, record: &scheduler_core::TaskRecord) {
        if let Err(err) = self.storage.update_task(record).await {
            warn!(task_id = %record.id, error = %err, "best-effort outcome persist failed");
            self.events.emit(&SchedulerEvent::PersistenceFailed {
                task_id: record.id.clone(),
                detail: err.to_string(),
            });
        }

        #[cfg(feature = "metrics")]
        metrics::counter!("scheduler_tasks_settled_total", "status" => record.status.to_string())
            .increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use scheduler_core::error::{AdmissionError, ProcessError};
    use scheduler_core::{AdmittedTask, Priority, Processable, Task, TaskType};
    use scheduler_storage::InMemoryStore;
    use std::time::Duration;
    use tokio::sync::mpsc;

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

    fn admitted(id: &str, backoff: Option<Duration>) -> AdmittedTask {
        AdmittedTask {
            id: Some(id.to_string()),
            task_type: TaskType::SendEmail,
            priority: Priority::Low,
            payload: vec![],
            created_by: "alice".into(),
            backoff_duration: backoff,
        }
    }

    fn build(max_task_retry: u32) -> (Arc<ResultReactor>, mpsc::UnboundedSender<Outcome>, Arc<WaitingSet>, Arc<InMemoryStore>) {
        let waiting = Arc::new(WaitingSet::new());
        let storage = Arc::new(InMemoryStore::new());
        let config = Arc::new(SchedulerConfig::builder().max_task_retry(max_task_retry).build());
        let (tx, rx) = mpsc::unbounded_channel();
        let reactor = Arc::new(ResultReactor::new(
            rx,
            waiting.clone(),
            storage.clone() as Arc<dyn StoragePort>,
            config,
            EventListeners::new(),
        ));
        (reactor, tx, waiting, storage)
    }

    #[tokio::test]
    async fn successful_outcome_marks_task_succeeded_and_persists() {
        let (reactor, _tx, waiting, storage) = build(0);
        let task = Task::new(admitted("a", None), Box::new(Noop));
        storage.create_task(&task.to_record()).await.unwrap();

        reactor.handle(Outcome { task, error: None }).await;

        assert_eq!(waiting.len(), 0);
        let record = storage.get_task_by_id("a").await.unwrap().unwrap();
        assert_eq!(record.status, TaskStatus::Success);
        assert!(record.finished_at.is_some());
    }

    #[tokio::test]
    async fn failure_under_retry_budget_is_reenqueued_as_awaiting() {
        let (reactor, _tx, waiting, storage) = build(3);
        let task = Task::new(admitted("a", Some(Duration::from_secs(30))), Box::new(Noop));
        storage.create_task(&task.to_record()).await.unwrap();

        reactor
            .handle(Outcome {
                task,
                error: Some(ProcessError::new("transient")),
            })
            .await;

        assert_eq!(waiting.len(), 1);
        let record = storage.get_task_by_id("a").await.unwrap().unwrap();
        assert_eq!(record.status, TaskStatus::Awaiting);
        assert_eq!(record.retries, 1);
        assert!(record.backoff_until.is_some());
        assert!(record.error.is_none());
    }

    #[tokio::test]
    async fn failure_without_backoff_duration_is_immediately_eligible() {
        let (reactor, _tx, waiting, _storage) = build(3);
        let task = Task::new(admitted("a", None), Box::new(Noop));

        reactor
            .handle(Outcome {
                task,
                error: Some(ProcessError::new("transient")),
            })
            .await;

        let node = waiting.cursor().next().unwrap();
        let peek = waiting.peek(node).unwrap();
        assert!(peek.backoff_until.is_none());
    }

    #[tokio::test]
    async fn failure_at_retry_budget_is_terminal() {
        let (reactor, _tx, waiting, storage) = build(0);
        let mut task = Task::new(admitted("a", None), Box::new(Noop));
        task.retries = 0;
        storage.create_task(&task.to_record()).await.unwrap();

        reactor
            .handle(Outcome {
                task,
                error: Some(ProcessError::new("fatal")),
            })
            .await;

        assert_eq!(waiting.len(), 0);
        let record = storage.get_task_by_id("a").await.unwrap().unwrap();
        assert_eq!(record.status, TaskStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("fatal"));
    }
}
