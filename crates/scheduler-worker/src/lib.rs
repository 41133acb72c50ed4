//! `WorkerPool` (§4.4): a fixed number of worker tasks that pull dispatched
//! tasks off the priority channels, run them, and hand the outcome to the
//! reactor. A worker never mutates a task's terminal state itself and never
//! retries locally — that decision belongs to the `ResultReactor` (§4.5).

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use scheduler_core::error::ProcessError;
use scheduler_core::{EventListeners, Priority, SchedulerConfig, SchedulerEvent, Task, TaskStatus};
use tokio::sync::mpsc::{Receiver, UnboundedSender};
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// What a worker reports back after running a task: the task (carrying the
/// status it ended in) and the failure detail, if any.
#[derive(Debug)]
pub struct Outcome {
    pub task: Task,
    pub error: Option<ProcessError>,
}

/// Shared receive half for one priority class. Wrapped so multiple worker
/// tasks can pull from the same `mpsc::Receiver` — tokio's channel is
/// single-consumer, so every `try_recv` happens while holding this lock,
/// which is held only for the duration of the non-blocking call.
pub type SharedReceiver = Arc<AsyncMutex<Receiver<Task>>>;

/// A fixed pool of worker tasks (§4.4).
pub struct WorkerPool {
    receivers: HashMap<Priority, SharedReceiver>,
    priority_order: Vec<Priority>,
    results: UnboundedSender<Outcome>,
    config: Arc<SchedulerConfig>,
    events: EventListeners,
}

impl WorkerPool {
    /// Builds a pool over the given per-priority receive halves.
    /// `priority_order` controls the scan order workers use when more than
    /// one channel has work (highest priority first).
    pub fn new(
        receivers: HashMap<Priority, SharedReceiver>,
        priority_order: Vec<Priority>,
        results: UnboundedSender<Outcome>,
        config: Arc<SchedulerConfig>,
        events: EventListeners,
    ) -> Self {
        Self {
            receivers,
            priority_order,
            results,
            config,
            events,
        }
    }

    /// Spawns `config.worker_pool_size` worker loops and waits for all of
    /// them to return, which happens only once `cancel` trips.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut handles = Vec::with_capacity(self.config.worker_pool_size);
        for index in 0..self.config.worker_pool_size {
            let pool = Arc::clone(&self);
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move { pool.worker_loop(index, cancel).await }));
        }
        for handle in handles {
            let _ = handle.await;
        }
    }

    async fn worker_loop(&self, index: usize, cancel: CancellationToken) {
        debug!(worker = index, "worker loop started");
        loop {
            if cancel.is_cancelled() {
                break;
            }

            match self.try_claim_one().await {
                Some(task) => self.execute(task).await,
                None => {
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.worker_idle_interval) => {}
                        _ = cancel.cancelled() => break,
                    }
                }
            }
        }
        debug!(worker = index, "worker loop stopped");
    }

    /// Tries every priority channel, highest first, for a ready task.
    async fn try_claim_one(&self) -> Option<Task> {
        for priority in &self.priority_order {
            let Some(receiver) = self.receivers.get(priority) else {
                continue;
            };
            let mut guard = receiver.lock().await;
            if let Ok(task) = guard.try_recv() {
                return Some(task);
            }
        }
        None
    }

    async fn execute(&self, mut task: Task) {
        task.status = TaskStatus::Processing;
        task.started_at = Some(Utc::now());
        self.events.emit(&SchedulerEvent::Started {
            task_id: task.id.clone(),
            priority: task.priority,
        });

        trace!(task_id = %task.id, "worker executing task");
        let outcome = task.processable.process().await;

        let error = outcome.err();
        if let Err(send_err) = self.results.send(Outcome { task, error }) {
            // The reactor has shut down; nothing left to do with the outcome.
            tracing::warn!(error = %send_err, "result channel closed, dropping outcome");
        }

        #[cfg(feature = "metrics")]
        metrics::counter!("scheduler_tasks_processed_total").increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use scheduler_core::error::AdmissionError;
    use scheduler_core::{AdmittedTask, Processable, TaskType};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    #[derive(Debug)]
    struct Succeeds;

    #[async_trait]
    impl Processable for Succeeds {
        async fn validate(&self) -> Result<(), AdmissionError> {
            Ok(())
        }
        async fn process(&self) -> Result<(), ProcessError> {
            Ok(())
        }
    }

    #[derive(Debug)]
    struct Fails;

    #[async_trait]
    impl Processable for Fails {
        async fn validate(&self) -> Result<(), AdmissionError> {
            Ok(())
        }
        async fn process(&self) -> Result<(), ProcessError> {
            Err(ProcessError::new("boom"))
        }
    }

    fn admitted(id: &str, priority: Priority) -> AdmittedTask {
        AdmittedTask {
            id: Some(id.to_string()),
            task_type: TaskType::SendEmail,
            priority,
            payload: vec![],
            created_by: "alice".into(),
            backoff_duration: None,
        }
    }

    fn build(capacity: usize) -> (Arc<WorkerPool>, mpsc::Sender<Task>, mpsc::UnboundedReceiver<Outcome>) {
        let (low_tx, low_rx) = mpsc::channel(capacity);
        let mut receivers = HashMap::new();
        receivers.insert(Priority::Low, Arc::new(AsyncMutex::new(low_rx)));
        let (result_tx, result_rx) = mpsc::unbounded_channel();
        let config = Arc::new(SchedulerConfig::conservative());
        let pool = Arc::new(WorkerPool::new(
            receivers,
            vec![Priority::High, Priority::Low],
            result_tx,
            config,
            EventListeners::new(),
        ));
        (pool, low_tx, result_rx)
    }

    #[tokio::test]
    async fn successful_task_reports_no_error() {
        let (pool, tx, mut result_rx) = build(4);
        tx.send(Task::new(admitted("a", Priority::Low), Box::new(Succeeds)))
            .await
            .unwrap();

        let task = pool.try_claim_one().await.unwrap();
        assert_eq!(task.status, TaskStatus::Awaiting);
        pool.execute(task).await;

        let outcome = result_rx.recv().await.unwrap();
        assert!(outcome.error.is_none());
        assert_eq!(outcome.task.status, TaskStatus::Processing);
        assert!(outcome.task.started_at.is_some());
    }

    #[tokio::test]
    async fn failing_task_reports_the_error() {
        let (pool, tx, mut result_rx) = build(4);
        tx.send(Task::new(admitted("a", Priority::Low), Box::new(Fails)))
            .await
            .unwrap();

        let task = pool.try_claim_one().await.unwrap();
        pool.execute(task).await;

        let outcome = result_rx.recv().await.unwrap();
        assert_eq!(outcome.error.unwrap().0, "boom");
    }

    #[tokio::test]
    async fn empty_channels_yield_no_claim() {
        let (pool, _tx, _result_rx) = build(4);
        assert!(pool.try_claim_one().await.is_none());
    }

    #[tokio::test]
    async fn concurrent_workers_each_claim_a_distinct_task() {
        let (low_tx, low_rx) = mpsc::channel(8);
        let mut receivers = HashMap::new();
        receivers.insert(Priority::Low, Arc::new(AsyncMutex::new(low_rx)));
        let (result_tx, _result_rx) = mpsc::unbounded_channel();
        let config = Arc::new(SchedulerConfig::conservative());
        let pool = Arc::new(WorkerPool::new(
            receivers,
            vec![Priority::Low],
            result_tx,
            config,
            EventListeners::new(),
        ));

        for i in 0..4 {
            low_tx
                .send(Task::new(admitted(&format!("t{i}"), Priority::Low), Box::new(Succeeds)))
                .await
                .unwrap();
        }

        let claimed = Arc::new(AtomicUsize::new(0));
        let mut handles = vec![];
        for _ in 0..4 {
            let pool = Arc::clone(&pool);
            let claimed = Arc::clone(&claimed);
            handles.push(tokio::spawn(async move {
                if pool.try_claim_one().await.is_some() {
                    claimed.fetch_add(1, Ordering::SeqCst);
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(claimed.load(Ordering::SeqCst), 4);
    }
}
