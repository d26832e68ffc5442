//! Counting semaphores with FIFO sleep lists.
//!
//! The only place this crate blocks besides the idle loop. Waiter
//! descriptors are slab-owned and live exactly as long as the wait; a
//! poster hands the oldest descriptor's process to the scheduler while
//! still holding the semaphore lock.

use crate::proc::current;
use crate::sched::{self, ProcState};
use kernel_alloc::KBox;
use kernel_collections::{container_of, ListNode, RawQueue};
use kernel_sync::SpinLock;

struct WaitData {
    /// True once a poster has claimed this waiter.
    released: bool,
    owner: *mut crate::proc::Proc,
    link: ListNode,
}

struct SemInner {
    val: i32,
    /// Oldest waiter at the front. Invariant: a negative `val` has exactly
    /// `-val` descriptors queued.
    waiters: RawQueue,
}

pub struct Semaphore {
    inner: SpinLock<SemInner>,
}

impl Semaphore {
    #[must_use]
    pub const fn new(val: i32) -> Self {
        Self {
            inner: SpinLock::new(SemInner {
                val,
                waiters: RawQueue::new(),
            }),
        }
    }

    /// Take one unit, sleeping until a poster provides it.
    ///
    /// Returns true for a genuine release. False means a self-wake: the
    /// sleeper was brought back without a post (it was killed) and its
    /// reservation was withdrawn.
    pub fn wait(&self) -> bool {
        let me = current();
        // Safety: a running process cannot be reaped.
        unsafe {
            debug_assert!(!me.is_null() && !(*me).is_idle, "only processes may block");
        }
        let mut inner = self.inner.lock();
        inner.val -= 1;
        if inner.val >= 0 {
            return true;
        }

        let mut wd = KBox::new(WaitData {
            released: false,
            owner: me,
            link: ListNode::new(),
        });
        // Safety: the descriptor outlives the wait; the queue is ours under
        // the semaphore lock. Our own lock must land before the semaphore
        // lock goes, so a racing post stalls in activate until we are
        // off-CPU instead of seeing us RUNNING and dropping the wake.
        unsafe {
            inner.waiters.push(&raw mut wd.link);
            (*me).lock.lock();
        }
        drop(inner);
        // Safety: we hold our own lock, as sched_locked requires.
        unsafe { sched::sched_locked(ProcState::Sleeping) };

        let mut inner = self.inner.lock();
        let released = wd.released;
        if !released {
            // woke without a post; take the reservation back
            // Safety: an unreleased descriptor is still queued.
            unsafe { inner.waiters.detach(&raw mut wd.link) };
            inner.val += 1;
        }
        drop(inner);
        released
    }

    /// Release one unit, waking the oldest waiter if any is owed.
    pub fn post(&self) {
        let mut inner = self.inner.lock();
        inner.val += 1;
        if inner.val <= 0 {
            let link = inner.waiters.pop();
            assert!(!link.is_null(), "semaphore count and sleep list disagree");
            // Safety: queued descriptors are live until their waiter
            // removes them; we hold the semaphore lock.
            unsafe {
                let wd = container_of!(link, WaitData, link);
                (*wd).released = true;
                sched::activate((*wd).owner);
            }
        }
    }

    /// Non-blocking take: true if a unit was available.
    pub fn get(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.val > 0 {
            inner.val -= 1;
            true
        } else {
            false
        }
    }

    /// Drain every currently available unit; returns how many were taken.
    pub fn get_all(&self) -> i32 {
        let mut inner = self.inner.lock();
        if inner.val > 0 {
            let taken = inner.val;
            inner.val = 0;
            taken
        } else {
            0
        }
    }

    /// Release every waiter currently queued.
    pub fn post_all(&self) {
        let mut inner = self.inner.lock();
        while inner.val < 0 {
            inner.val += 1;
            let link = inner.waiters.pop();
            assert!(!link.is_null(), "semaphore count and sleep list disagree");
            // Safety: as in post.
            unsafe {
                let wd = container_of!(link, WaitData, link);
                (*wd).released = true;
                sched::activate((*wd).owner);
            }
        }
    }

    /// Snapshot of the counter (negative: that many sleepers).
    pub fn value(&self) -> i32 {
        self.inner.lock().val
    }
}
