//! Kern subsystem - Scheduling and synchronization core
//!
//! Contains the spinlock primitive, the task lifecycle, the per-core
//! scheduler, and the wait coordinator.

pub mod lock;
pub mod runq;
pub mod sched;
pub mod task;
pub mod wait;

pub use lock::{RawSpinLock, SpinLock, SpinLockGuard};
pub use runq::{ReadyQueue, SchedEntry, DEFAULT_QUANTUM};
pub use sched::{CoreSched, CoreSet};
pub use task::{Context, Task, TaskState, TaskTable};
pub use wait::{ResourceCap, ResourceHandle, WaitCoordinator};
