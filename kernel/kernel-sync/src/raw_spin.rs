use core::hint::spin_loop;
use core::sync::atomic::{AtomicBool, Ordering};

/// Bare test-and-set spin lock with no data and no guard.
///
/// Used directly where the lock's critical section does not nest inside a
/// single function — most notably the per-process lock, which the scheduler
/// acquires on one side of a context switch and releases on the other (see
/// [`LockHandoff`](crate::LockHandoff)). Everything else should prefer
/// [`SpinLock`](crate::SpinLock).
///
/// No fairness is provided; a core can starve under heavy contention.
pub struct RawSpin {
    held: AtomicBool,
}

impl Default for RawSpin {
    fn default() -> Self {
        Self::new()
    }
}

impl RawSpin {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            held: AtomicBool::new(false),
        }
    }

    /// Spin until the lock is acquired (test-and-test-and-set).
    #[inline]
    pub fn lock(&self) {
        while self.held.swap(true, Ordering::Acquire) {
            // Spin on a plain load; the swap above is the only write.
            while self.held.load(Ordering::Relaxed) {
                spin_loop();
            }
        }
    }

    /// One acquisition attempt; never spins.
    #[inline]
    pub fn try_lock(&self) -> bool {
        !self.held.load(Ordering::Relaxed) && !self.held.swap(true, Ordering::Acquire)
    }

    /// Release the lock.
    ///
    /// # Safety
    /// The caller (or whoever handed the lock to the caller) must hold it.
    #[inline]
    pub unsafe fn unlock(&self) {
        self.held.store(false, Ordering::Release);
    }

    /// Whether the lock is currently held by anyone.
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.held.load(Ordering::Relaxed)
    }
}
