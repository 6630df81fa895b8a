//! Ready queue of execution slots.
//!
//! Each entry is a slot token naming a task; a task with `spawn = n` owns up
//! to `n` tokens at once. A per-task count is kept next to the FIFO so that
//! `queued + running == spawn` can be checked without scanning.

use std::collections::{HashMap, VecDeque};

use super::task::TaskId;

/// FIFO of slot tokens with per-task counts.
#[derive(Debug, Default)]
pub struct ReadyQueue {
    slots: VecDeque<TaskId>,
    counts: HashMap<TaskId, usize>,
}

impl ReadyQueue {
    /// Empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one slot for `task`.
    pub fn push_back(&mut self, task: TaskId) {
        self.slots.push_back(task);
        *self.counts.entry(task).or_insert(0) += 1;
    }

    /// Take the front slot.
    pub fn pop_front(&mut self) -> Option<TaskId> {
        let task = self.slots.pop_front()?;
        if let Some(count) = self.counts.get_mut(&task) {
            *count -= 1;
            if *count == 0 {
                self.counts.remove(&task);
            }
        }
        Some(task)
    }

    /// Number of queued slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no slot is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Queued slots belonging to `task`.
    #[must_use]
    pub fn queued_for(&self, task: TaskId) -> usize {
        self.counts.get(&task).copied().unwrap_or(0)
    }

    /// Drop every slot of `task`, keeping the order of the rest. Returns how many were removed.
    pub fn remove_task(&mut self, task: TaskId) -> usize {
        let removed = self.counts.remove(&task).unwrap_or(0);
        if removed > 0 {
            self.slots.retain(|&queued| queued != task);
        }
        removed
    }

    /// Slots in queue order.
    pub fn iter(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.slots.iter().copied()
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.counts.clear();
    }
}
