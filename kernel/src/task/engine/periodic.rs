//! Periodic task delta queue (spec.md §3 "Periodic task queue",
//! recovered from `periodic_queue.c`). Each queued task stores its period
//! as the delta from the preceding task's period rather than an absolute
//! value, so a single per-tick decrement of the head is enough to track
//! every queued deadline at once.

use crate::task::engine::TaskId;
use alloc::collections::VecDeque;

struct Entry {
    task: TaskId,
    delta: u32,
}

/// Ordered by firing time; `entries[0].delta` ticks remain until the head
/// fires, `entries[1].delta` more after that, and so on.
#[derive(Default)]
pub struct PeriodicQueue {
    entries: VecDeque<Entry>,
}

impl PeriodicQueue {
    pub const fn new() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }

    /// Inserts `task` with absolute period `period`, walking the queue to
    /// find its place and re-expressing `period` as a delta from whatever
    /// it lands after (`periodic_task_order`).
    pub fn insert(&mut self, task: TaskId, mut period: u32) {
        let mut idx = 0;
        while idx < self.entries.len() && period >= self.entries[idx].delta {
            period -= self.entries[idx].delta;
            idx += 1;
        }
        if let Some(next) = self.entries.get_mut(idx) {
            next.delta -= period;
        }
        self.entries.insert(idx, Entry { task, delta: period });
    }

    /// Removes `task` wherever it is queued, folding its delta back into
    /// its successor so every remaining delta still sums correctly.
    pub fn remove(&mut self, task: TaskId) -> bool {
        let Some(idx) = self.entries.iter().position(|e| e.task == task) else {
            return false;
        };
        let removed = self.entries.remove(idx).unwrap();
        if let Some(next) = self.entries.get_mut(idx) {
            next.delta += removed.delta;
        }
        true
    }

    /// Decrements the head's remaining delta by one tick, if it is still
    /// positive. Called exactly once per timer tick, before draining due
    /// heads with [`Self::pop_due`].
    pub fn advance(&mut self) {
        if let Some(head) = self.entries.front_mut() {
            if head.delta > 0 {
                head.delta -= 1;
            }
        }
    }

    /// Pops and returns the head if its delta has reached zero, folding its
    /// (zero) delta into the new head. Call in a loop after [`Self::advance`]
    /// to drain every task simultaneously due this tick without decrementing
    /// twice.
    pub fn pop_due(&mut self) -> Option<TaskId> {
        if self.entries.front()?.delta != 0 {
            return None;
        }
        let head = self.entries.pop_front().unwrap();
        if let Some(next) = self.entries.front_mut() {
            next.delta += head.delta;
        }
        Some(head.task)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
