//! Task lifecycle and registry
//!
//! A task is the unit of execution this core schedules. The scheduler,
//! the wait coordinator, and the registry all share the same `Arc<Task>`
//! allocation; queue membership is bookkeeping on top of it, never
//! ownership of the task itself.
//!
//! State machine:
//!
//! ```text
//!   Ready ----> Running ----> Dead
//!     ^            |
//!     |            v
//!     +-------- Waiting
//! ```
//!
//! Any transition outside these edges is an internal inconsistency and
//! panics. `Dead` is terminal.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicU32, Ordering};

use crate::kern::lock::SpinLock;
use crate::kern::wait::WaitCoordinator;
use crate::types::{CoreId, TaskId};

// ============================================================================
// Task State
// ============================================================================

/// Scheduling state of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Eligible to run, queued on its home core
    Ready,
    /// Currently occupying a core's running slot
    Running,
    /// Parked in the wait coordinator
    Waiting,
    /// Finished; reaped once no joiner remains
    Dead,
}

impl TaskState {
    /// Whether `self -> next` is a legal edge of the state machine
    pub fn can_become(self, next: TaskState) -> bool {
        matches!(
            (self, next),
            (TaskState::Ready, TaskState::Running)
                | (TaskState::Running, TaskState::Ready)
                | (TaskState::Running, TaskState::Waiting)
                | (TaskState::Running, TaskState::Dead)
                | (TaskState::Waiting, TaskState::Ready)
        )
    }
}

// ============================================================================
// Saved Context
// ============================================================================

/// Saved execution context of a task.
///
/// Opaque to this core: the context-switch path (external, arch-specific)
/// is the only code that interprets these fields. We only store and hand
/// back the block.
#[derive(Debug, Clone, Copy, Default)]
pub struct Context {
    pub regs: [u64; 16],
    pub pc: u64,
    pub sp: u64,
}

// ============================================================================
// Task
// ============================================================================

/// A schedulable task, shared as `Arc<Task>`
pub struct Task {
    pub id: TaskId,
    state: SpinLock<TaskState>,
    /// Saved register file, written/read only across a context switch
    pub context: spin::Mutex<Context>,
    home_core: AtomicU32,
}

impl Task {
    /// Create a task in the Ready state, homed on `home_core`
    pub fn new(home_core: CoreId) -> Arc<Self> {
        let task = Arc::new(Self {
            id: TaskId::new(),
            state: SpinLock::new(TaskState::Ready),
            context: spin::Mutex::new(Context::default()),
            home_core: AtomicU32::new(home_core.0),
        });
        log::debug!("task {:?} created on core {:?}", task.id, home_core);
        task
    }

    pub fn state(&self) -> TaskState {
        *self.state.lock()
    }

    /// Move the task to `next`, panicking on an illegal edge.
    ///
    /// Every caller is inside this crate; an illegal edge means scheduler
    /// or coordinator bookkeeping has diverged from the task's own state.
    pub(crate) fn set_state(&self, next: TaskState) {
        let mut state = self.state.lock();
        if !state.can_become(next) {
            panic!(
                "task {:?}: illegal state transition {:?} -> {:?}",
                self.id, *state, next
            );
        }
        *state = next;
    }

    /// The core this task last ran on; wake-ups are admitted here
    pub fn home_core(&self) -> CoreId {
        CoreId(self.home_core.load(Ordering::Relaxed))
    }

    pub(crate) fn set_home_core(&self, core: CoreId) {
        self.home_core.store(core.0, Ordering::Relaxed);
    }
}

impl core::fmt::Debug for Task {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("home_core", &self.home_core())
            .finish()
    }
}

// ============================================================================
// Task Table
// ============================================================================

/// Registry of all live tasks, keyed by id.
///
/// Join targets are looked up here; Dead tasks stay registered until
/// every joiner has been released, then `reap` frees them.
pub struct TaskTable {
    tasks: SpinLock<BTreeMap<TaskId, Arc<Task>>>,
}

impl TaskTable {
    pub const fn new() -> Self {
        Self {
            tasks: SpinLock::new(BTreeMap::new()),
        }
    }

    /// Create and register a task in one step
    pub fn spawn(&self, home_core: CoreId) -> Arc<Task> {
        let task = Task::new(home_core);
        self.tasks.lock().insert(task.id, Arc::clone(&task));
        task
    }

    pub fn find(&self, id: TaskId) -> Option<Arc<Task>> {
        self.tasks.lock().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }

    /// Drop every Dead task with no remaining joiner.
    ///
    /// Returns the number reaped. A Dead task with joiners still parked
    /// on it stays registered; `WaitCoordinator::task_died` releases the
    /// joiners first.
    pub fn reap(&self, coordinator: &WaitCoordinator) -> usize {
        let mut tasks = self.tasks.lock();
        let dead: alloc::vec::Vec<TaskId> = tasks
            .iter()
            .filter(|(id, task)| {
                task.state() == TaskState::Dead && !coordinator.has_joiners(**id)
            })
            .map(|(id, _)| *id)
            .collect();
        for id in &dead {
            tasks.remove(id);
            log::debug!("task {:?} reaped", id);
        }
        dead.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_task_is_ready() {
        let task = Task::new(CoreId(0));
        assert_eq!(task.state(), TaskState::Ready);
        assert_eq!(task.home_core(), CoreId(0));
    }

    #[test]
    fn test_full_lifecycle_transitions() {
        let task = Task::new(CoreId(0));
        task.set_state(TaskState::Running);
        task.set_state(TaskState::Waiting);
        task.set_state(TaskState::Ready);
        task.set_state(TaskState::Running);
        task.set_state(TaskState::Dead);
        assert_eq!(task.state(), TaskState::Dead);
    }

    #[test]
    #[should_panic(expected = "illegal state transition")]
    fn test_ready_to_waiting_is_illegal() {
        // Only a running task can park
        let task = Task::new(CoreId(0));
        task.set_state(TaskState::Waiting);
    }

    #[test]
    #[should_panic(expected = "illegal state transition")]
    fn test_dead_is_terminal() {
        let task = Task::new(CoreId(0));
        task.set_state(TaskState::Running);
        task.set_state(TaskState::Dead);
        task.set_state(TaskState::Ready);
    }

    #[test]
    fn test_context_round_trip() {
        // The block is opaque; we only store and return it
        let task = Task::new(CoreId(0));
        {
            let mut ctx = task.context.lock();
            ctx.pc = 0xdead_beef;
            ctx.sp = 0x1000;
        }
        let ctx = task.context.lock();
        assert_eq!(ctx.pc, 0xdead_beef);
        assert_eq!(ctx.sp, 0x1000);
    }

    #[test]
    fn test_table_spawn_and_find() {
        let table = TaskTable::new();
        let task = table.spawn(CoreId(0));
        assert_eq!(table.len(), 1);
        assert!(table.find(task.id).is_some());
        assert!(table.find(TaskId(u64::MAX)).is_none());
    }

    #[test]
    fn test_reap_skips_live_tasks() {
        let table = TaskTable::new();
        let coordinator = WaitCoordinator::new();
        let task = table.spawn(CoreId(0));

        assert_eq!(table.reap(&coordinator), 0);
        assert_eq!(table.len(), 1);

        task.set_state(TaskState::Running);
        task.set_state(TaskState::Dead);
        assert_eq!(table.reap(&coordinator), 1);
        assert!(table.is_empty());
    }
}
