//! Per-core scheduler
//!
//! Each physical core owns one [`CoreSched`]: a ready FIFO, a running
//! slot, a single "preferred task" hint, and the resched flag. The
//! handle is created at SMP bring-up and passed explicitly; there is no
//! hidden global. Cross-core wake-ups go through the same per-core
//! spinlock as local decisions.
//!
//! A task is a member of at most one scheduling structure at a time:
//! the ready queue, the running slot, or the wait coordinator. Park and
//! exit clear the running slot before the task's state changes hands, so
//! the exclusivity holds at every observation point.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;

use crate::kern::lock::SpinLock;
use crate::kern::runq::ReadyQueue;
use crate::kern::task::{Task, TaskState};
use crate::types::{CoreId, TaskId};

// ============================================================================
// Core Scheduler
// ============================================================================

struct RunningSlot {
    task: Arc<Task>,
    /// Ticks left in the current time-slice
    quantum: u32,
}

struct CoreInner {
    ready: ReadyQueue,
    running: Option<RunningSlot>,
    preferred: Option<TaskId>,
    need_resched: bool,
}

/// Scheduler state for one physical core
pub struct CoreSched {
    pub id: CoreId,
    inner: SpinLock<CoreInner>,
}

impl CoreSched {
    /// Initialize a core's scheduler. Must run before any admission to
    /// this core; without the handle there is nothing to admit to.
    pub fn new(id: CoreId) -> Arc<Self> {
        Arc::new(Self {
            id,
            inner: SpinLock::new(CoreInner {
                ready: ReadyQueue::new(),
                running: None,
                preferred: None,
                need_resched: false,
            }),
        })
    }

    /// Timer-tick entry: burn one tick of the running task's quantum.
    ///
    /// On exhaustion only the resched flag is raised; the task keeps
    /// running until the next `schedule` call.
    pub fn begin_time_slot(&self) {
        let mut inner = self.inner.lock();
        if let Some(slot) = inner.running.as_mut() {
            if slot.quantum > 0 {
                slot.quantum -= 1;
            }
            if slot.quantum == 0 {
                inner.need_resched = true;
            }
        }
    }

    pub fn need_resched(&self) -> bool {
        self.inner.lock().need_resched
    }

    /// Admit a task to this core's ready FIFO.
    ///
    /// Re-homes the task here; a task already queued is left in place.
    pub fn prepare_entry(&self, task: Arc<Task>) {
        task.set_home_core(self.id);
        let id = task.id;
        let admitted = self.inner.lock().ready.admit(task);
        if admitted {
            log::trace!("core {:?}: admitted task {:?}", self.id, id);
        }
    }

    /// Set the preferred hint. The hint names a candidate for the next
    /// `schedule` call only; it cannot force a non-Ready task onto the
    /// core, and it is consumed whether or not it wins.
    pub fn prefer(&self, id: TaskId) {
        self.inner.lock().preferred = Some(id);
    }

    /// Whether a task is currently queued on this core
    pub fn has_queued(&self, id: TaskId) -> bool {
        self.inner.lock().ready.contains(id)
    }

    /// The task occupying the running slot, if any
    pub fn current(&self) -> Option<Arc<Task>> {
        self.inner
            .lock()
            .running
            .as_ref()
            .map(|slot| Arc::clone(&slot.task))
    }

    /// The scheduling decision.
    ///
    /// Requeues a still-Running previous task at the FIFO tail, consumes
    /// the preferred hint, and dispatches the winner. With nothing Ready
    /// the core idles, re-checking the queue until an admit lands; this
    /// loop is the only place the scheduler suspends.
    pub fn schedule(&self) -> Arc<Task> {
        let mut idling = false;
        loop {
            let mut inner = self.inner.lock();

            if let Some(prev) = inner.running.take() {
                // Park and exit empty the slot themselves, so a slot
                // occupant in any state but Running means the core's
                // bookkeeping has diverged from the task's.
                if prev.task.state() != TaskState::Running {
                    panic!(
                        "core {:?}: running slot holds task {:?} in state {:?}",
                        self.id,
                        prev.task.id,
                        prev.task.state()
                    );
                }
                prev.task.set_state(TaskState::Ready);
                inner.ready.admit(prev.task);
            }

            let hint = inner.preferred.take();
            let next = hint
                .and_then(|id| inner.ready.take(id))
                .or_else(|| inner.ready.pop());

            if let Some(entry) = next {
                entry.task.set_state(TaskState::Running);
                inner.need_resched = false;
                inner.running = Some(RunningSlot {
                    task: Arc::clone(&entry.task),
                    quantum: entry.quantum,
                });
                drop(inner);
                log::trace!("core {:?}: dispatch task {:?}", self.id, entry.task.id);
                return entry.task;
            }

            drop(inner);
            if !idling {
                idling = true;
                log::trace!("core {:?}: idle", self.id);
            }
            core::hint::spin_loop();
        }
    }

    /// Pull the running task out of the slot as Waiting.
    ///
    /// The caller (the wait coordinator) takes over custody. Fatal if
    /// the slot is empty; parking nothing means a lost task.
    pub(crate) fn park_current(&self) -> Arc<Task> {
        let mut inner = self.inner.lock();
        let slot = inner
            .running
            .take()
            .unwrap_or_else(|| panic!("core {:?}: park with no running task", self.id));
        drop(inner);
        slot.task.set_state(TaskState::Waiting);
        log::debug!("core {:?}: task {:?} parked", self.id, slot.task.id);
        slot.task
    }

    /// Pull the running task out of the slot as Dead. Fatal if the slot
    /// is empty.
    pub fn exit_current(&self) -> Arc<Task> {
        let mut inner = self.inner.lock();
        let slot = inner
            .running
            .take()
            .unwrap_or_else(|| panic!("core {:?}: exit with no running task", self.id));
        drop(inner);
        slot.task.set_state(TaskState::Dead);
        log::debug!("core {:?}: task {:?} exited", self.id, slot.task.id);
        slot.task
    }
}

// ============================================================================
// Core Set
// ============================================================================

/// Registry of brought-up cores.
///
/// An explicit handle shared by the wait coordinator and whoever drives
/// SMP bring-up. Routing to a core that was never brought up is fatal.
pub struct CoreSet {
    cores: SpinLock<BTreeMap<CoreId, Arc<CoreSched>>>,
}

impl CoreSet {
    pub const fn new() -> Self {
        Self {
            cores: SpinLock::new(BTreeMap::new()),
        }
    }

    /// Initialize scheduler state for one core and register it
    pub fn bring_up(&self, id: CoreId) -> Arc<CoreSched> {
        let core = CoreSched::new(id);
        self.cores.lock().insert(id, Arc::clone(&core));
        log::debug!("core {:?} brought up", id);
        core
    }

    pub fn core(&self, id: CoreId) -> Option<Arc<CoreSched>> {
        self.cores.lock().get(&id).cloned()
    }

    /// Like [`CoreSet::core`] but fatal for an uninitialized core:
    /// scheduling against a core that never ran bring-up is a kernel bug.
    pub fn expect_core(&self, id: CoreId) -> Arc<CoreSched> {
        self.core(id)
            .unwrap_or_else(|| panic!("core {:?} used before bring-up", id))
    }

    /// Admit a task on its home core
    pub fn admit(&self, task: Arc<Task>) {
        self.expect_core(task.home_core()).prepare_entry(task);
    }

    /// Set the preferred hint for a task on its home core
    pub fn prefer_task(&self, task: &Task) {
        self.expect_core(task.home_core()).prefer(task.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kern::runq::DEFAULT_QUANTUM;
    use std::thread;
    use std::time::Duration;

    fn core_with_tasks(n: usize) -> (Arc<CoreSched>, std::vec::Vec<Arc<Task>>) {
        let core = CoreSched::new(CoreId(0));
        let tasks: std::vec::Vec<_> = (0..n).map(|_| Task::new(CoreId(0))).collect();
        for task in &tasks {
            core.prepare_entry(Arc::clone(task));
        }
        (core, tasks)
    }

    #[test]
    fn test_fifo_dispatch() {
        let (core, tasks) = core_with_tasks(3);

        let first = core.schedule();
        assert_eq!(first.id, tasks[0].id);
        assert_eq!(first.state(), TaskState::Running);

        // Previous task goes Ready at the tail, oldest waiter wins
        let second = core.schedule();
        assert_eq!(second.id, tasks[1].id);
        assert_eq!(tasks[0].state(), TaskState::Ready);
    }

    #[test]
    fn test_preferred_override() {
        let (core, tasks) = core_with_tasks(3);

        core.prefer(tasks[2].id);
        let chosen = core.schedule();
        assert_eq!(chosen.id, tasks[2].id);
    }

    #[test]
    fn test_hint_is_consumed() {
        let (core, tasks) = core_with_tasks(3);

        core.prefer(tasks[2].id);
        assert_eq!(core.schedule().id, tasks[2].id);
        // Hint gone; FIFO resumes with the oldest admission
        assert_eq!(core.schedule().id, tasks[0].id);
    }

    #[test]
    fn test_unqueued_hint_falls_back_to_fifo() {
        let (core, tasks) = core_with_tasks(2);

        // Hint names a task this core never admitted
        core.prefer(TaskId(u64::MAX));
        assert_eq!(core.schedule().id, tasks[0].id);
    }

    #[test]
    fn test_membership_is_exclusive() {
        let (core, tasks) = core_with_tasks(2);

        let running = core.schedule();
        assert!(!core.has_queued(running.id));
        assert!(core.has_queued(tasks[1].id));

        let parked = core.park_current();
        assert_eq!(parked.id, running.id);
        assert!(core.current().is_none());
        assert!(!core.has_queued(parked.id));
    }

    #[test]
    fn test_quantum_exhaustion_sets_resched_only() {
        let (core, _tasks) = core_with_tasks(1);
        let running = core.schedule();

        for _ in 0..DEFAULT_QUANTUM - 1 {
            core.begin_time_slot();
            assert!(!core.need_resched());
        }
        core.begin_time_slot();
        assert!(core.need_resched());
        // Exhaustion raises the flag; the task state is untouched
        assert_eq!(running.state(), TaskState::Running);
    }

    #[test]
    fn test_resched_cleared_on_dispatch() {
        let (core, _tasks) = core_with_tasks(2);
        core.schedule();
        for _ in 0..DEFAULT_QUANTUM {
            core.begin_time_slot();
        }
        assert!(core.need_resched());
        core.schedule();
        assert!(!core.need_resched());
    }

    #[test]
    fn test_idle_until_admit() {
        let core = CoreSched::new(CoreId(0));
        let task = Task::new(CoreId(0));

        let admitter = {
            let core = Arc::clone(&core);
            let task = Arc::clone(&task);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                core.prepare_entry(task);
            })
        };

        // Spins idle until the admit lands, then dispatches it
        let chosen = core.schedule();
        assert_eq!(chosen.id, task.id);
        admitter.join().unwrap();
    }

    #[test]
    fn test_exit_current() {
        let (core, _tasks) = core_with_tasks(1);
        core.schedule();
        let dead = core.exit_current();
        assert_eq!(dead.state(), TaskState::Dead);
        assert!(core.current().is_none());
    }

    #[test]
    #[should_panic(expected = "park with no running task")]
    fn test_park_empty_slot_is_fatal() {
        let core = CoreSched::new(CoreId(0));
        core.park_current();
    }

    #[test]
    fn test_core_set_routing() {
        let set = CoreSet::new();
        let core0 = set.bring_up(CoreId(0));
        set.bring_up(CoreId(1));

        let task = Task::new(CoreId(0));
        set.admit(Arc::clone(&task));
        assert!(core0.has_queued(task.id));
        set.prefer_task(&task);
        assert_eq!(core0.schedule().id, task.id);
    }

    #[test]
    #[should_panic(expected = "used before bring-up")]
    fn test_expect_core_is_fatal_before_bring_up() {
        let set = CoreSet::new();
        set.expect_core(CoreId(7));
    }
}
