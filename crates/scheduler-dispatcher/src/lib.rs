//! `PriorityDispatcher` (§4.3): moves eligible waiting tasks into per-priority
//! bounded channels, preferring higher priority, never overfilling a
//! channel, and never dispatching a task whose `backoff_until` is still in
//! the future.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use scheduler_core::{EventListeners, Priority, SchedulerConfig, SchedulerEvent, TaskStatus};
use scheduler_storage::StoragePort;
use scheduler_waiting::WaitingSet;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::Sender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Scans the waiting set and hands eligible tasks to the matching priority
/// channel. One instance runs as a single background loop (§4.6 `Start`).
pub struct PriorityDispatcher {
    waiting: Arc<WaitingSet>,
    senders: HashMap<Priority, Sender<scheduler_core::Task>>,
    storage: Arc<dyn StoragePort>,
    config: Arc<SchedulerConfig>,
    events: EventListeners,
}

impl PriorityDispatcher {
    /// Builds a dispatcher over the given waiting set and per-priority send
    /// halves. `senders` must cover every priority in `config.priority_classes`.
    pub fn new(
        waiting: Arc<WaitingSet>,
        senders: HashMap<Priority, Sender<scheduler_core::Task>>,
        storage: Arc<dyn StoragePort>,
        config: Arc<SchedulerConfig>,
        events: EventListeners,
    ) -> Self {
        Self {
            waiting,
            senders,
            storage,
            config,
            events,
        }
    }

    /// Runs the scan loop until `cancel` trips. Each pass favors higher
    /// priority classes; when a pass dispatches nothing, the loop sleeps for
    /// `config.dispatch_interval` before trying again (§4.3).
    pub async fn run(&self, cancel: CancellationToken) {
        debug!("dispatcher loop started");
        loop {
            if cancel.is_cancelled() {
                break;
            }

            let dispatched_any = self.scan_once().await;

            if !dispatched_any {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.dispatch_interval) => {}
                    _ = cancel.cancelled() => break,
                }
            }
        }
        debug!("dispatcher loop stopped");
    }

    /// Performs a single scan over every priority class, highest first.
    /// Returns `true` if at least one task was moved into a channel.
    async fn scan_once(&self) -> bool {
        let mut dispatched_any = false;
        for priority in self.config.priority_classes_descending() {
            let Some(sender) = self.senders.get(&priority) else {
                continue;
            };
            let mut space = sender.capacity();
            if space == 0 {
                continue;
            }

            let now = Utc::now();
            let mut cursor = self.waiting.cursor();
            while space > 0 {
                let Some(node) = cursor.next() else {
                    break;
                };
                let Some(peek) = self.waiting.peek(node) else {
                    // Already removed by a prior iteration of this same pass.
                    continue;
                };
                if peek.priority != priority {
                    continue;
                }
                let eligible = peek.backoff_until.map_or(true, |deadline| deadline <= now);
                if !eligible {
                    continue;
                }

                let Some(mut task) = self.waiting.remove(node) else {
                    continue;
                };
                task.status = TaskStatus::Enqueued;
                let record = task.to_record();

                match sender.try_send(task) {
                    Ok(()) => {
                        space -= 1;
                        dispatched_any = true;
                        self.events.emit(&SchedulerEvent::Dispatched {
                            task_id: record.id.clone(),
                            priority,
                        });

                        if let Err(err) = self.storage.update_task(&record).await {
                            warn!(task_id = %record.id, error = %err, "best-effort enqueue persist failed");
                            self.events.emit(&SchedulerEvent::PersistenceFailed {
                                task_id: record.id,
                                detail: err.to_string(),
                            });
                        }

                        #[cfg(feature = "metrics")]
                        metrics::counter!("scheduler_tasks_dispatched_total", "priority" => format!("{priority:?}"))
                            .increment(1);
                    }
                    Err(TrySendError::Full(task)) => {
                        // The capacity check raced with another sender; put the
                        // task back rather than block with the list mutex held.
                        self.events.emit(&SchedulerEvent::DispatchSkipped {
                            task_id: task.id.clone(),
                            priority,
                        });
                        self.waiting.append(task);
                        break;
                    }
                    Err(TrySendError::Closed(_)) => {
                        debug!(?priority, "priority channel closed, dispatcher stopping for this priority");
                        return dispatched_any;
                    }
                }
            }
        }
        dispatched_any
    }
}
