//! `WaitingSet` (§4.2): the ordered holding area for tasks that are admitted
//! but not yet dispatchable.
//!
//! Realized as a doubly-linked list over a `Vec` of slots guarded by a single
//! `Mutex`, per the design notes' recommended implementation: a `NodeRef` is
//! a stable index, `remove` is idempotent on an already-removed index, and a
//! [`Cursor`] captures the *next* index to visit at the moment it yields the
//! *current* one — so removing the node a caller just visited never corrupts
//! the walk (the design note's "precomputed `next`").
//!
//! No holder of the mutex ever performs I/O or a channel send while holding
//! it (§5) — every public method here takes the lock, does pointer-chasing
//! arithmetic only, and releases it before returning.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use scheduler_core::{Priority, Task};

/// A stable handle to a node in the waiting set. Valid for the lifetime of
/// the `WaitingSet` it was produced by; `remove` on a stale or
/// already-removed ref is a harmless no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeRef(usize);

struct Slot {
    task: Task,
    prev: Option<usize>,
    next: Option<usize>,
}

#[derive(Default)]
struct Inner {
    slots: Vec<Option<Slot>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
}

/// A lightweight, `Copy` view of the fields the dispatcher needs to decide
/// eligibility without taking ownership of the task.
#[derive(Debug, Clone)]
pub struct TaskPeek {
    pub id: String,
    pub priority: Priority,
    pub backoff_until: Option<DateTime<Utc>>,
}

impl From<&Task> for TaskPeek {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id.clone(),
            priority: task.priority,
            backoff_until: task.backoff_until,
        }
    }
}

/// The waiting set itself.
pub struct WaitingSet {
    inner: Mutex<Inner>,
}

impl Default for WaitingSet {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitingSet {
    /// Creates an empty waiting set.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Appends a task at the tail, preserving insertion order. Thread-safe.
    pub fn append(&self, task: Task) -> NodeRef {
        let mut inner = self.inner.lock().unwrap();
        let idx = match inner.free.pop() {
            Some(idx) => idx,
            None => {
                inner.slots.push(None);
                inner.slots.len() - 1
            }
        };

        let tail = inner.tail;
        inner.slots[idx] = Some(Slot {
            task,
            prev: tail,
            next: None,
        });

        if let Some(tail_idx) = tail {
            if let Some(slot) = inner.slots[tail_idx].as_mut() {
                slot.next = Some(idx);
            }
        } else {
            inner.head = Some(idx);
        }
        inner.tail = Some(idx);
        inner.len += 1;

        NodeRef(idx)
    }

    /// Removes and returns the task at `node`, or `None` if it was already
    /// removed. Idempotent and thread-safe.
    pub fn remove(&self, node: NodeRef) -> Option<Task> {
        let mut inner = self.inner.lock().unwrap();
        self.remove_locked(&mut inner, node.0)
    }

    fn remove_locked(&self, inner: &mut Inner, idx: usize) -> Option<Task> {
        let slot = inner.slots.get_mut(idx)?.take()?;
        match slot.prev {
            Some(prev_idx) => {
                if let Some(prev_slot) = inner.slots[prev_idx].as_mut() {
                    prev_slot.next = slot.next;
                }
            }
            None => inner.head = slot.next,
        }
        match slot.next {
            Some(next_idx) => {
                if let Some(next_slot) = inner.slots[next_idx].as_mut() {
                    next_slot.prev = slot.prev;
                }
            }
            None => inner.tail = slot.prev,
        }
        inner.free.push(idx);
        inner.len -= 1;
        Some(slot.task)
    }

    /// A cheap, `Copy`-friendly look at the node without removing it.
    /// Returns `None` if the node has already been removed.
    pub fn peek(&self, node: NodeRef) -> Option<TaskPeek> {
        let inner = self.inner.lock().unwrap();
        inner.slots.get(node.0)?.as_ref().map(|slot| TaskPeek::from(&slot.task))
    }

    /// Number of tasks currently held.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len
    }

    /// `true` if nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A cursor over the current contents, oldest to newest. Safe against
    /// concurrent `append` (new elements may or may not be observed — either
    /// is acceptable per the contract) and against `remove` of the node just
    /// yielded by this same cursor.
    pub fn cursor(&self) -> Cursor<'_> {
        let next = self.inner.lock().unwrap().head;
        Cursor { set: self, next }
    }
}

/// Traverses a [`WaitingSet`] from oldest to newest.
pub struct Cursor<'a> {
    set: &'a WaitingSet,
    next: Option<usize>,
}

impl<'a> Cursor<'a> {
    /// Yields the next node, or `None` when the scan is exhausted.
    pub fn next(&mut self) -> Option<NodeRef> {
        let inner = self.set.inner.lock().unwrap();
        let idx = self.next?;
        let slot = inner.slots[idx].as_ref()?;
        self.next = slot.next;
        Some(NodeRef(idx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scheduler_core::error::{AdmissionError, ProcessError};
    use scheduler_core::{AdmittedTask, Processable, TaskType};
    use async_trait::async_trait;

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

    fn task(id: &str) -> Task {
        Task::new(
            AdmittedTask {
                id: Some(id.to_string()),
                task_type: TaskType::SendEmail,
                priority: Priority::Low,
                payload: vec![],
                created_by: "alice".into(),
                backoff_duration: None,
            },
            Box::new(Noop),
        )
    }

    #[test]
    fn cursor_visits_in_insertion_order() {
        let set = WaitingSet::new();
        set.append(task("a"));
        set.append(task("b"));
        set.append(task("c"));

        let mut cursor = set.cursor();
        let mut ids = vec![];
        while let Some(node) = cursor.next() {
            ids.push(set.peek(node).unwrap().id);
        }
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn removing_current_node_mid_scan_does_not_break_traversal() {
        let set = WaitingSet::new();
        let a = set.append(task("a"));
        set.append(task("b"));
        set.append(task("c"));

        let mut cursor = set.cursor();
        let first = cursor.next().unwrap();
        assert_eq!(first, a);
        set.remove(first);

        let mut rest = vec![];
        while let Some(node) = cursor.next() {
            rest.push(set.peek(node).unwrap().id);
        }
        assert_eq!(rest, vec!["b", "c"]);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn remove_is_idempotent() {
        let set = WaitingSet::new();
        let a = set.append(task("a"));
        assert!(set.remove(a).is_some());
        assert!(set.remove(a).is_none());
    }

    #[test]
    fn append_during_scan_is_observed_or_not_either_is_fine() {
        let set = WaitingSet::new();
        set.append(task("a"));
        let mut cursor = set.cursor();
        cursor.next();
        set.append(task("b"));
        // Either outcome is contract-legal; we only assert it doesn't panic
        // or double-count, i.e. the set still reports 2 tasks.
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn node_indices_are_reused_after_removal() {
        let set = WaitingSet::new();
        let a = set.append(task("a"));
        set.remove(a);
        let b = set.append(task("b"));
        assert_eq!(set.len(), 1);
        assert_eq!(set.peek(b).unwrap().id, "b");
    }
}
