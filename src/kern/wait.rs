//! Wait coordinator
//!
//! Parks a running task until an external condition holds and releases
//! it back to its home core. Two wait modes exist:
//!
//! - resource waits, keyed by a [`ResourceHandle`] with a resolver
//!   predicate supplied by the subsystem that owns the resource
//! - join waits, released when the joined task reaches Dead
//!
//! Neither mode has a timeout. A resolver that never fires leaves its
//! task Waiting forever; that is the contract, not an error.
//!
//! Wait records are created on park and destroyed on wake. Lock order
//! is coordinator before core: park paths take a core lock inside the
//! coordinator lock, and wake paths release the coordinator lock before
//! touching any core's scheduler. No path takes the locks the other way
//! around.
//!
//! Parking under the coordinator lock is what makes the records sound:
//! a `resolve` sweep or a death sweep either runs before the record
//! exists (the task is still Running and not a waiter) or after it does
//! (the sweep finds it). There is no window in which a parked task has
//! no record.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::kern::lock::SpinLock;
use crate::kern::sched::{CoreSched, CoreSet};
use crate::kern::task::{Task, TaskState, TaskTable};
use crate::types::TaskId;

/// Identifies a waitable resource kernel-wide. Allocation of handle
/// values belongs to the subsystems that own the resources.
pub type ResourceHandle = u64;

// ============================================================================
// Resource Capability
// ============================================================================

/// Capability to wait on a resource: the handle plus the resolver that
/// answers "is the resource available now".
///
/// The capability is consumed by `wait_for` and lives inside the wait
/// record until the wake. Resolvers run under the coordinator lock
/// during a sweep and must not call back into the coordinator.
pub struct ResourceCap {
    handle: ResourceHandle,
    resolver: Box<dyn Fn() -> bool + Send>,
}

impl ResourceCap {
    pub fn new(handle: ResourceHandle, resolver: impl Fn() -> bool + Send + 'static) -> Self {
        Self {
            handle,
            resolver: Box::new(resolver),
        }
    }

    pub fn handle(&self) -> ResourceHandle {
        self.handle
    }

    fn resolved(&self) -> bool {
        (self.resolver)()
    }
}

impl core::fmt::Debug for ResourceCap {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ResourceCap")
            .field("handle", &self.handle)
            .finish()
    }
}

// ============================================================================
// Wait Coordinator
// ============================================================================

struct ResourceWaiter {
    task: Arc<Task>,
    cap: ResourceCap,
}

struct WaitInner {
    resource: BTreeMap<ResourceHandle, Vec<ResourceWaiter>>,
    joins: BTreeMap<TaskId, Vec<Arc<Task>>>,
}

/// Kernel-wide wait state, guarded by one spinlock
pub struct WaitCoordinator {
    inner: SpinLock<WaitInner>,
}

impl WaitCoordinator {
    pub const fn new() -> Self {
        Self {
            inner: SpinLock::new(WaitInner {
                resource: BTreeMap::new(),
                joins: BTreeMap::new(),
            }),
        }
    }

    /// Park the core's running task on a resource.
    ///
    /// The task goes Running -> Waiting and its wait record holds the
    /// capability until a `resolve` sweep finds the resolver true.
    pub fn wait_for(&self, core: &CoreSched, cap: ResourceCap) {
        let mut inner = self.inner.lock();
        let task = core.park_current();
        log::debug!(
            "task {:?} waiting on resource {:#x}",
            task.id,
            cap.handle
        );
        inner
            .resource
            .entry(cap.handle)
            .or_default()
            .push(ResourceWaiter { task, cap });
    }

    /// Park the core's running task until `target` dies.
    ///
    /// Joining a task the registry does not know, or one already Dead,
    /// is fatal: the wake for it would never come or has already passed.
    pub fn wait_join(&self, core: &CoreSched, table: &TaskTable, target: TaskId) {
        let joined = table
            .find(target)
            .unwrap_or_else(|| panic!("join on unknown task {:?}", target));
        if joined.state() == TaskState::Dead {
            panic!("join on dead task {:?}", target);
        }
        let mut inner = self.inner.lock();
        // Re-check under the lock. A target still not Dead here cannot
        // have had its death sweep yet: `task_died` runs after the state
        // flips and serializes on this lock, so it will find the record.
        if joined.state() == TaskState::Dead {
            // Died since the check above; its sweep finds nothing to
            // release. The joiner keeps running instead of parking.
            log::debug!("task {:?} died before join could park", target);
            return;
        }
        let task = core.park_current();
        log::debug!("task {:?} joining task {:?}", task.id, target);
        inner.joins.entry(target).or_default().push(task);
    }

    /// Sweep the waiters of one resource.
    ///
    /// Every waiter whose resolver answers true goes Waiting -> Ready,
    /// is admitted to its home core, and becomes that core's preferred
    /// task. Waiters whose resolver stays false remain parked. Returns
    /// the number woken.
    pub fn resolve(&self, handle: ResourceHandle, cores: &CoreSet) -> usize {
        let mut inner = self.inner.lock();
        let waiters = match inner.resource.remove(&handle) {
            Some(w) => w,
            None => return 0,
        };

        let mut woken = Vec::new();
        let mut kept = Vec::new();
        for waiter in waiters {
            if waiter.cap.resolved() {
                woken.push(waiter.task);
            } else {
                kept.push(waiter);
            }
        }
        if !kept.is_empty() {
            inner.resource.insert(handle, kept);
        }
        drop(inner);

        let count = woken.len();
        for task in woken {
            self.release(task, cores);
        }
        if count > 0 {
            log::debug!("resource {:#x}: {} waiter(s) woken", handle, count);
        }
        count
    }

    /// Release every joiner of `dead`. Called when the joined task
    /// reaches Dead. Returns the number released.
    pub fn task_died(&self, dead: TaskId, cores: &CoreSet) -> usize {
        let joiners = {
            let mut inner = self.inner.lock();
            inner.joins.remove(&dead).unwrap_or_default()
        };
        let count = joiners.len();
        for task in joiners {
            self.release(task, cores);
        }
        if count > 0 {
            log::debug!("task {:?} dead, {} joiner(s) released", dead, count);
        }
        count
    }

    /// Whether any task is still joined on `id`. Consulted by the reap
    /// sweep so a Dead task outlives its join records.
    pub fn has_joiners(&self, id: TaskId) -> bool {
        self.inner
            .lock()
            .joins
            .get(&id)
            .map(|v| !v.is_empty())
            .unwrap_or(false)
    }

    /// Total parked tasks, both modes. Diagnostics only.
    pub fn waiting_count(&self) -> usize {
        let inner = self.inner.lock();
        inner.resource.values().map(Vec::len).sum::<usize>()
            + inner.joins.values().map(Vec::len).sum::<usize>()
    }

    // Coordinator lock is already released here; the core locks are
    // taken fresh.
    fn release(&self, task: Arc<Task>, cores: &CoreSet) {
        task.set_state(TaskState::Ready);
        cores.admit(Arc::clone(&task));
        cores.prefer_task(&task);
    }
}

impl Default for WaitCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
