use crate::RawSpin;
use core::ptr::NonNull;

/// Unlock responsibility for a held [`RawSpin`], detached from the acquiring
/// execution context.
///
/// The scheduler acquires a process lock on one side of a context switch and
/// the lock is released by whatever code resumes on the other side. Rather
/// than leaving that as a convention, the acquiring side wraps the held lock
/// in a `LockHandoff` and parks it in the per-core slot; the resuming side
/// takes the token and consumes it with [`release`](Self::release). Exactly
/// one token crosses each switch boundary.
///
/// The token is deliberately not `Drop`: losing one means the lock stays
/// held, which is the bug the type exists to make visible.
pub struct LockHandoff {
    lock: NonNull<RawSpin>,
}

// Safety: the token is a capability to unlock; moving it between execution
// contexts is the whole point. The referenced lock is always 'static in
// practice (it lives in a process record that outlives the switch).
unsafe impl Send for LockHandoff {}

impl LockHandoff {
    /// Wrap a lock the caller currently holds.
    ///
    /// # Safety
    /// `lock` must be held, must outlive the token, and the caller must not
    /// unlock it by any other means.
    #[must_use]
    pub unsafe fn new(lock: &RawSpin) -> Self {
        debug_assert!(lock.is_locked());
        Self {
            lock: NonNull::from(lock),
        }
    }

    /// Release the wrapped lock, consuming the token.
    pub fn release(self) {
        // Safety: constructed from a held lock, and we are the only owner of
        // the unlock responsibility.
        unsafe { self.lock.as_ref().unlock() }
    }
}
