//! Ready queue
//!
//! One FIFO per core. A task's position is decided by admission order
//! alone; the single "preferred" override lives in the scheduler, which
//! pulls a specific entry out with [`ReadyQueue::take`].

use alloc::collections::VecDeque;
use alloc::sync::Arc;

use crate::kern::task::Task;
use crate::types::TaskId;

/// Time-slice granted to a task on admission, in timer ticks
pub const DEFAULT_QUANTUM: u32 = 10;

// ============================================================================
// Schedule Entry
// ============================================================================

/// Per-task bookkeeping carried while queued, prepared on admission and
/// consumed by the scheduling decision
#[derive(Debug, Clone)]
pub struct SchedEntry {
    pub task: Arc<Task>,
    /// Remaining time-slice when dispatched
    pub quantum: u32,
    /// Admission order, monotone per queue
    pub seq: u64,
}

// ============================================================================
// Ready Queue
// ============================================================================

/// FIFO of tasks eligible to run on one core
pub struct ReadyQueue {
    entries: VecDeque<SchedEntry>,
    next_seq: u64,
}

impl ReadyQueue {
    pub const fn new() -> Self {
        Self {
            entries: VecDeque::new(),
            next_seq: 0,
        }
    }

    /// Queue a task at the tail.
    ///
    /// A task already queued is left where it is; admission never
    /// duplicates membership or reorders.
    pub fn admit(&mut self, task: Arc<Task>) -> bool {
        if self.contains(task.id) {
            return false;
        }
        let entry = SchedEntry {
            task,
            quantum: DEFAULT_QUANTUM,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.entries.push_back(entry);
        true
    }

    /// Dequeue the oldest entry
    pub fn pop(&mut self) -> Option<SchedEntry> {
        self.entries.pop_front()
    }

    /// Remove a specific task regardless of position
    pub fn take(&mut self, id: TaskId) -> Option<SchedEntry> {
        let pos = self.entries.iter().position(|e| e.task.id == id)?;
        self.entries.remove(pos)
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.entries.iter().any(|e| e.task.id == id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ReadyQueue {
    fn default() -> Self {
        Self::new()
    }
}
