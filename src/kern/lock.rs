//! Locking Primitives
//!
//! The spinlock is the only synchronization building block in this core:
//! every structure touched from more than one core (ready queues, wait
//! lists, per-task state) sits behind one of these.
//!
//! Provides:
//! - `RawSpinLock`, a single word of shared memory with test-and-set
//!   acquisition, for embedding in other structures
//! - `SpinLock<T>`, an RAII data wrapper over the raw lock
//!
//! The lock is deliberately minimal: no ownership metadata, no recursion
//! count, no queue. Acquisition order among contenders is unspecified.
//! Callers needing reentrancy must layer a counting lock on top.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, Ordering};

#[cfg(feature = "spin-diagnostics")]
use core::sync::atomic::AtomicU64;

/// Iteration count after which a contended spin is reported once.
/// Observability aid only; the spin is never broken.
#[cfg(feature = "spin-diagnostics")]
pub const SPIN_WARN_THRESHOLD: u64 = 100_000_000;

// ============================================================================
// Raw Spin Lock
// ============================================================================

/// A raw spin lock: one word, Unlocked(false)/Locked(true).
///
/// Should only be used for very short critical sections. There is no
/// bound on wait time; with the `spin-diagnostics` feature a counter
/// tracks contended iterations and emits a single warning past
/// [`SPIN_WARN_THRESHOLD`].
#[repr(C)]
pub struct RawSpinLock {
    lock_data: AtomicBool,
    #[cfg(feature = "spin-diagnostics")]
    spin_count: AtomicU64,
}

impl core::fmt::Debug for RawSpinLock {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RawSpinLock")
            .field("locked", &self.is_locked())
            .finish()
    }
}

impl RawSpinLock {
    /// Create a new unlocked lock
    pub const fn new() -> Self {
        Self {
            lock_data: AtomicBool::new(false),
            #[cfg(feature = "spin-diagnostics")]
            spin_count: AtomicU64::new(0),
        }
    }

    /// Acquire the lock, spinning until available
    pub fn acquire(&self) {
        while self
            .lock_data
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            // Spin with a hint to the CPU
            while self.lock_data.load(Ordering::Relaxed) {
                self.spin_hint();
            }
        }
        #[cfg(feature = "spin-diagnostics")]
        self.spin_count.store(0, Ordering::Relaxed);
    }

    /// Release the lock
    ///
    /// Calling this while the lock is not held is a caller error; the
    /// lock performs no ownership tracking.
    pub fn release(&self) {
        self.lock_data.store(false, Ordering::Release);
    }

    /// Try to acquire the lock without blocking
    pub fn try_acquire(&self) -> bool {
        self.lock_data
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Check if the lock is held
    ///
    /// A single load with no further guarantee. Diagnostics only: a
    /// caller must not use this to decide whether `acquire` would block.
    pub fn is_locked(&self) -> bool {
        self.lock_data.load(Ordering::Relaxed)
    }

    #[cfg(not(feature = "spin-diagnostics"))]
    #[inline(always)]
    fn spin_hint(&self) {
        core::hint::spin_loop();
    }

    #[cfg(feature = "spin-diagnostics")]
    #[inline]
    fn spin_hint(&self) {
        core::hint::spin_loop();
        let n = self.spin_count.fetch_add(1, Ordering::Relaxed) + 1;
        if n == SPIN_WARN_THRESHOLD {
            log::warn!("spinlock: {} contended iterations without progress", n);
        }
    }
}

impl Default for RawSpinLock {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl Send for RawSpinLock {}
unsafe impl Sync for RawSpinLock {}

// ============================================================================
// Spin Lock with Data
// ============================================================================

/// Data behind a [`RawSpinLock`]. The only access path is through the
/// guard, so a reference to the interior cannot outlive the hold.
pub struct SpinLock<T> {
    lock: RawSpinLock,
    data: UnsafeCell<T>,
}

impl<T> SpinLock<T> {
    pub const fn new(data: T) -> Self {
        Self {
            lock: RawSpinLock::new(),
            data: UnsafeCell::new(data),
        }
    }

    /// Spin until the lock is held, then hand out the guard
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        self.lock.acquire();
        SpinLockGuard { lock: self }
    }

    /// One CAS attempt; `None` means someone else holds the lock
    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T>> {
        if self.lock.try_acquire() {
            Some(SpinLockGuard { lock: self })
        } else {
            None
        }
    }

    pub fn is_locked(&self) -> bool {
        self.lock.is_locked()
    }

    /// Exclusive borrow needs no locking at all
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}

impl<T: core::fmt::Debug> core::fmt::Debug for SpinLock<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.try_lock() {
            Some(guard) => f.debug_struct("SpinLock").field("data", &&*guard).finish(),
            None => f.write_str("SpinLock { <held> }"),
        }
    }
}

unsafe impl<T: Send> Send for SpinLock<T> {}
unsafe impl<T: Send> Sync for SpinLock<T> {}

pub struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
}

impl<'a, T> core::ops::Deref for SpinLockGuard<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<'a, T> core::ops::DerefMut for SpinLockGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<'a, T> Drop for SpinLockGuard<'a, T> {
    fn drop(&mut self) {
        self.lock.lock.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_raw_lock() {
        let lock = RawSpinLock::new();

        assert!(!lock.is_locked());

        lock.acquire();
        assert!(lock.is_locked());

        lock.release();
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_acquire_release_acquire() {
        // A single holder never self-deadlocks across a release
        let lock = RawSpinLock::new();

        lock.acquire();
        lock.release();
        lock.acquire();
        assert!(lock.is_locked());
        lock.release();
    }

    #[test]
    fn test_try_acquire() {
        let lock = RawSpinLock::new();

        assert!(lock.try_acquire());
        assert!(!lock.try_acquire());

        lock.release();
        assert!(lock.try_acquire());
        lock.release();
    }

    #[test]
    fn test_mutual_exclusion() {
        // No increment may be lost under contention
        let lock = Arc::new(SpinLock::new(0u64));
        let mut handles = std::vec::Vec::new();

        for _ in 0..4 {
            let lock = Arc::clone(&lock);
            handles.push(thread::spawn(move || {
                for _ in 0..10_000 {
                    let mut guard = lock.lock();
                    *guard += 1;
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(*lock.lock(), 40_000);
    }

    #[test]
    fn test_contended_acquire_waits_for_release() {
        let lock = Arc::new(RawSpinLock::new());
        lock.acquire();

        let contender = {
            let lock = Arc::clone(&lock);
            thread::spawn(move || {
                assert!(!lock.try_acquire());
                lock.acquire();
                lock.release();
            })
        };

        thread::sleep(std::time::Duration::from_millis(20));
        lock.release();
        contender.join().unwrap();
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_spinlock_guard() {
        let lock = SpinLock::new(7u32);

        {
            let mut guard = lock.lock();
            assert_eq!(*guard, 7);
            *guard += 1;
            assert!(lock.is_locked());
        }
        // Guard drop released the lock
        assert!(!lock.is_locked());
        assert_eq!(*lock.lock(), 8);
    }

    #[test]
    fn test_spinlock_debug_respects_hold() {
        let lock = SpinLock::new(3u32);
        assert_eq!(std::format!("{:?}", lock), "SpinLock { data: 3 }");

        let _guard = lock.lock();
        assert_eq!(std::format!("{:?}", lock), "SpinLock { <held> }");
    }

    #[test]
    fn test_get_mut_bypasses_the_lock() {
        let mut lock = SpinLock::new(1u32);
        *lock.get_mut() = 5;
        assert!(!lock.is_locked());
        assert_eq!(*lock.lock(), 5);
    }
}
