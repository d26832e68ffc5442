//! Run queue, process selection and the two-phase context switch.
//!
//! A process never switches directly to another process: it parks into its
//! core's idle flow, and the idle flow picks the next process. Every switch
//! boundary carries exactly one lock — the outgoing process's — as an
//! explicit [`LockHandoff`] token that the resuming side consumes.

use crate::cpu::{this_core, PerCore};
use crate::proc::Proc;
use crate::timer::{self, Timer};
use core::ptr;
use core::sync::atomic::{AtomicBool, Ordering};
use kernel_collections::{container_of, ListNode, Queue};
use kernel_hal::platform;
use kernel_sync::LockHandoff;

/// Preemption slice armed on every dispatch.
pub const SCHED_SLICE_MS: u64 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum ProcState {
    Unused = 0,
    Runnable = 1,
    Running = 2,
    Sleeping = 3,
    Zombie = 4,
}

/// RUNNABLE and RUNNING processes, FIFO with rotate-to-tail on selection.
static RUN_QUEUE: Queue = Queue::new();

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

/// Make `p` schedulable. SLEEPING and UNUSED processes become RUNNABLE and
/// join the queue; RUNNING/RUNNABLE ones are already covered. Returns false
/// for a ZOMBIE, which cannot come back.
pub(crate) fn activate(p: *mut Proc) -> bool {
    // Safety: the caller guarantees `p` is live; state under its lock.
    unsafe {
        (*p).lock.lock();
        let ok = match (*p).state() {
            ProcState::Running | ProcState::Runnable => true,
            ProcState::Sleeping | ProcState::Unused => {
                (*p).set_state(ProcState::Runnable);
                RUN_QUEUE.push(&raw mut (*p).sched_link);
                true
            }
            ProcState::Zombie => false,
        };
        (*p).lock.unlock();
        ok
    }
}

/// One pass over the run queue: the first candidate that is still RUNNABLE
/// once its lock is held gets rotated to the tail and returned with its
/// lock held. Null when nothing qualifies.
///
/// The per-process locks are only tried, never waited for, while the queue
/// lock is held; the peeked state is re-validated after the lock lands.
fn pick_next() -> *mut Proc {
    let mut q = RUN_QUEUE.lock();
    let mut link = q.front();
    for _ in 0..q.len() {
        // Safety: queued links belong to live processes; membership is
        // stable under the queue lock we hold.
        unsafe {
            let p = container_of!(link, Proc, sched_link);
            let next = ListNode::next(link);
            if (*p).lock.try_lock() {
                if (*p).state() == ProcState::Runnable {
                    q.rotate_to_back(link);
                    return p;
                }
                (*p).lock.unlock();
            }
            link = next;
        }
    }
    ptr::null_mut()
}

/// Take the CPU away from the calling process, leaving it in `new_state`.
pub(crate) fn sched(new_state: ProcState) {
    let me = this_core().current();
    // Safety: we are the running process.
    unsafe {
        (*me).lock.lock();
        sched_locked(new_state);
    }
}

/// As [`sched`], with the caller already holding its own lock (the
/// semaphore sleep path acquires it before dropping the semaphore lock, so
/// a racing post blocks in `activate` until the sleeper is off-CPU).
///
/// # Safety
/// The calling process's lock must be held; it is consumed either way.
pub(crate) unsafe fn sched_locked(new_state: ProcState) {
    let core = this_core();
    let me = core.current();
    let idle = core.idle();
    debug_assert!(me != idle, "idle flows park in idle_main, not sched");
    unsafe {
        if (*me).killed.load(Ordering::Acquire) && new_state != ProcState::Zombie {
            // a killed process keeps the CPU until it reaches its
            // termination check; parking it now could strand it
            (*me).lock.unlock();
            timer::arm_preempt();
            return;
        }
        debug_assert_eq!((*me).state(), ProcState::Running);
        (*me).set_state(new_state);
        match new_state {
            ProcState::Runnable => {}
            ProcState::Sleeping | ProcState::Zombie => {
                RUN_QUEUE.detach(&raw mut (*me).sched_link);
            }
            ProcState::Unused | ProcState::Running => {
                panic!("invalid transition out of RUNNING")
            }
        }
        core.set_current(idle);
        core.stash_handoff(LockHandoff::new(&(*me).lock));
        platform().context_switch((*me).switch_ctx, (*idle).switch_ctx);
        // a later dispatch resumed us, possibly on another core; it parked
        // our own lock in that core's slot
        this_core().take_handoff().release();
    }
}

/// Give up the rest of the slice; the caller stays RUNNABLE.
pub fn yield_now() {
    let core = this_core();
    let me = core.current();
    if me.is_null() || me == core.idle() {
        return;
    }
    sched(ProcState::Runnable);
}

/// Dispatch processes until the queue has nothing runnable.
fn dispatch(core: &'static PerCore) {
    let idle = core.idle();
    loop {
        let p = pick_next();
        if p.is_null() {
            return;
        }
        // Safety: pick_next returned `p` with its lock held.
        unsafe {
            (*p).set_state(ProcState::Running);
            core.set_current(p);
            if let Some(a) = (*p).addr_space {
                platform().address_space_attach(a);
            }
            timer::arm_preempt();
            core.stash_handoff(LockHandoff::new(&(*p).lock));
            platform().context_switch((*idle).switch_ctx, (*p).switch_ctx);
            // the process parked back into us; drop the lock it carried
            core.take_handoff().release();
        }
    }
}

/// The calling core's idle loop: dispatch when there is work, wait for an
/// event when there is none. Returns only after [`request_shutdown`], once
/// the queue is drained.
pub fn idle_main() {
    let core = this_core();
    assert!(!core.idle().is_null(), "idle loop started before init");
    core.online.store(true, Ordering::Release);
    log::info!("core {} scheduling", platform().core_id());
    loop {
        dispatch(core);
        if SHUTDOWN.load(Ordering::Acquire) {
            break;
        }
        platform().wait_for_event();
    }
    core.online.store(false, Ordering::Release);
    log::info!("core {} offline", platform().core_id());
}

/// Ask every idle loop to wind down once it runs out of work.
pub fn request_shutdown() {
    SHUTDOWN.store(true, Ordering::Release);
}

/// Consume the pending preemption request for this core, if any. Meant for
/// the trap-return path: follow up with [`yield_now`].
pub fn preempt_pending() -> bool {
    this_core().need_resched.swap(false, Ordering::AcqRel)
}

/// Handler of each core's recurring preemption timer.
pub(crate) fn preempt_fired(_t: *mut Timer) {
    this_core().need_resched.store(true, Ordering::Release);
}
