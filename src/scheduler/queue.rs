//! Priority queue of waiting tasks
//!
//! Higher priority pops first; within equal priority the earlier submission
//! pops first. Tasks that are not yet eligible are skipped over and pushed back.

use crate::state::TaskId;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use tokio::time::Instant;

/// A waiting task as seen by the queue
#[derive(Debug, Clone, Copy)]
pub(crate) struct QueuedTask {
    pub id: TaskId,
    pub priority: i32,
    pub eligible_at: Instant,
}

impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> Ordering {
        // Task ids grow with submission order, so the lower id is older
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for QueuedTask {}

#[derive(Debug, Default)]
pub(crate) struct TaskQueue {
    heap: BinaryHeap<QueuedTask>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, id: TaskId, priority: i32, eligible_at: Instant) {
        self.heap.push(QueuedTask {
            id,
            priority,
            eligible_at,
        });
    }

    /// Pops the best task that is eligible at `now`
    ///
    /// Ineligible tasks popped along the way go back on the heap.
    pub fn pop_eligible(&mut self, now: Instant) -> Option<QueuedTask> {
        let mut not_ready = Vec::new();
        let mut found = None;

        while let Some(queued) = self.heap.pop() {
            if queued.eligible_at <= now {
                found = Some(queued);
                break;
            }
            not_ready.push(queued);
        }

        self.heap.extend(not_ready);
        found
    }

    /// Earliest instant at which any queued task becomes eligible
    pub fn next_eligible_at(&self) -> Option<Instant> {
        self.heap.iter().map(|queued| queued.eligible_at).min()
    }

    /// Empties the queue, returning ids in dispatch order
    pub fn drain(&mut self) -> Vec<TaskId> {
        let mut ids = Vec::with_capacity(self.heap.len());
        while let Some(queued) = self.heap.pop() {
            ids.push(queued.id);
        }
        ids
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
