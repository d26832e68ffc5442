//! Per-core scheduling state.

use crate::proc::Proc;
use crate::timer::Timer;
use core::cell::UnsafeCell;
use core::ptr;
use core::sync::atomic::{AtomicBool, AtomicPtr, Ordering};
use kernel_hal::platform;
use kernel_sync::LockHandoff;

pub const MAX_CORES: usize = 8;

/// One core's view of the scheduler.
///
/// `current`, `idle` and the handoff slot are only ever touched by the flow
/// of control executing on this core; the context-switch boundary is what
/// orders the accesses.
pub(crate) struct PerCore {
    pub(crate) online: AtomicBool,
    current: AtomicPtr<Proc>,
    idle: AtomicPtr<Proc>,
    /// The one lock in flight across this core's current switch boundary.
    handoff: UnsafeCell<Option<LockHandoff>>,
    pub(crate) need_resched: AtomicBool,
    /// The core's recurring preemption timer.
    pub(crate) preempt: UnsafeCell<Timer>,
}

// Safety: the UnsafeCell fields are per-core; switches hand them over with
// the ordering the platform's context_switch provides.
unsafe impl Sync for PerCore {}

impl PerCore {
    const fn new() -> Self {
        Self {
            online: AtomicBool::new(false),
            current: AtomicPtr::new(ptr::null_mut()),
            idle: AtomicPtr::new(ptr::null_mut()),
            handoff: UnsafeCell::new(None),
            need_resched: AtomicBool::new(false),
            preempt: UnsafeCell::new(Timer::new(crate::sched::SCHED_SLICE_MS, crate::sched::preempt_fired)),
        }
    }

    pub(crate) fn current(&self) -> *mut Proc {
        self.current.load(Ordering::Relaxed)
    }

    pub(crate) fn set_current(&self, p: *mut Proc) {
        self.current.store(p, Ordering::Relaxed);
    }

    pub(crate) fn idle(&self) -> *mut Proc {
        self.idle.load(Ordering::Relaxed)
    }

    pub(crate) fn set_idle(&self, p: *mut Proc) {
        self.idle.store(p, Ordering::Relaxed);
    }

    /// Park a lock token for whoever resumes on the other side of the next
    /// switch on this core.
    pub(crate) fn stash_handoff(&self, token: LockHandoff) {
        // Safety: per-core slot; the previous token was consumed at the last
        // resume point, so the slot is empty.
        let slot = unsafe { &mut *self.handoff.get() };
        debug_assert!(slot.is_none(), "handoff slot already occupied");
        *slot = Some(token);
    }

    /// Consume the token parked across the switch that just resumed us.
    pub(crate) fn take_handoff(&self) -> LockHandoff {
        // Safety: per-core slot, see stash_handoff.
        let slot = unsafe { &mut *self.handoff.get() };
        match slot.take() {
            Some(token) => token,
            None => panic!("resumed with no lock in the handoff slot"),
        }
    }
}

static CORES: [PerCore; MAX_CORES] = [const { PerCore::new() }; MAX_CORES];

/// The calling core's state.
pub(crate) fn this_core() -> &'static PerCore {
    &CORES[platform().core_id()]
}

pub(crate) fn core(id: usize) -> &'static PerCore {
    &CORES[id]
}
