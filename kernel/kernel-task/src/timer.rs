//! Per-core deadline timers.
//!
//! Each core keeps its own index of armed timers ordered by absolute
//! millisecond deadline, tie-broken by timer address so the order is total.
//! The tick handler first re-arms the hardware countdown with a short
//! default (bounding handler latency), then fires everything that is due.
//! Handlers run without the index lock and may re-arm their own timer.

use crate::cpu::{this_core, MAX_CORES};
use kernel_collections::{container_of, RbNode, RbRoot};
use kernel_hal::platform;
use kernel_sync::SpinLock;

/// Countdown programmed when no deadline asks for less.
pub const DEFAULT_TICK_MS: u64 = 10;

/// One deadline timer. Pin it somewhere stable and arm it with
/// [`set_timer`] on the core that should fire it.
pub struct Timer {
    elapse_ms: u64,
    deadline_ms: u64,
    armed: bool,
    /// Set while the handler runs; cancelling mid-fire is a contract
    /// violation.
    firing: bool,
    triggered: bool,
    core: usize,
    node: RbNode,
    handler: fn(*mut Timer),
}

// Safety: all mutable state is guarded by the owning core's index lock.
unsafe impl Send for Timer {}
unsafe impl Sync for Timer {}

impl Timer {
    #[must_use]
    pub const fn new(elapse_ms: u64, handler: fn(*mut Timer)) -> Self {
        Self {
            elapse_ms,
            deadline_ms: 0,
            armed: false,
            firing: false,
            triggered: false,
            core: 0,
            node: RbNode::new(),
            handler,
        }
    }

    /// Whether the timer has fired since it was last armed.
    #[must_use]
    pub fn triggered(&self) -> bool {
        self.triggered
    }

    #[must_use]
    pub fn elapse_ms(&self) -> u64 {
        self.elapse_ms
    }
}

struct TimerIndex {
    root: RbRoot,
}

static TIMERS: [SpinLock<TimerIndex>; MAX_CORES] =
    [const { SpinLock::new(TimerIndex { root: RbRoot::new() }) }; MAX_CORES];

fn deadline_less(a: *const RbNode, b: *const RbNode) -> bool {
    // Safety: index nodes are embedded in armed timers, live while linked.
    unsafe {
        let ta = container_of!(a, Timer, node);
        let tb = container_of!(b, Timer, node);
        ((*ta).deadline_ms, ta as usize) < ((*tb).deadline_ms, tb as usize)
    }
}

/// Arm `t` on the calling core: deadline = now + its elapse. Re-arming an
/// already armed timer replaces its deadline. Reprograms the countdown when
/// `t` becomes the earliest.
///
/// # Safety
/// `t` must stay pinned and live until it fires or is cancelled, and must
/// only ever be armed on one core at a time.
pub unsafe fn set_timer(t: *mut Timer) {
    let core_id = platform().core_id();
    let now = platform().now_ms();
    let mut index = TIMERS[core_id].lock();
    unsafe {
        if (*t).armed {
            assert_eq!((*t).core, core_id, "timer is armed on another core");
            index.root.erase(&raw mut (*t).node);
        }
        (*t).deadline_ms = now + (*t).elapse_ms;
        (*t).armed = true;
        (*t).triggered = false;
        (*t).core = core_id;
        if index.root.insert(&raw mut (*t).node, deadline_less).is_err() {
            panic!("timer already linked in the deadline index");
        }
        if core::ptr::eq(index.root.first(), &raw mut (*t).node) {
            platform().set_countdown_ms((*t).elapse_ms.max(1));
        }
        log::trace!(
            "core {core_id}: timer {t:p} armed for t+{}ms",
            (*t).elapse_ms
        );
    }
}

/// Disarm `t` on the calling core and reprogram the countdown from the
/// remaining earliest deadline (default tick when none). No-op when `t` is
/// not armed.
///
/// # Safety
/// `t` must be a timer last armed on this core, and must not be mid-fire.
pub unsafe fn cancel_timer(t: *mut Timer) {
    let core_id = platform().core_id();
    let mut index = TIMERS[core_id].lock();
    unsafe {
        assert!(!(*t).firing, "cancelling a timer from inside its handler");
        if !(*t).armed {
            return;
        }
        assert_eq!((*t).core, core_id, "timer is armed on another core");
        index.root.erase(&raw mut (*t).node);
        (*t).armed = false;
        let first = index.root.first();
        let next_ms = if first.is_null() {
            DEFAULT_TICK_MS
        } else {
            let head = container_of!(first, Timer, node);
            (*head)
                .deadline_ms
                .saturating_sub(platform().now_ms())
                .max(1)
        };
        platform().set_countdown_ms(next_ms);
    }
}

/// Pop the earliest timer if its deadline has passed, marking it fired.
fn pop_due(core_id: usize) -> *mut Timer {
    let mut index = TIMERS[core_id].lock();
    let first = index.root.first();
    if first.is_null() {
        return core::ptr::null_mut();
    }
    // Safety: linked nodes belong to armed timers; we hold the index lock.
    unsafe {
        let t = container_of!(first, Timer, node);
        if (*t).deadline_ms > platform().now_ms() {
            return core::ptr::null_mut();
        }
        index.root.erase(first);
        (*t).armed = false;
        (*t).triggered = true;
        (*t).firing = true;
        t
    }
}

/// Timer-interrupt entry for the calling core.
pub fn on_tick() {
    platform().set_countdown_ms(DEFAULT_TICK_MS);
    let core_id = platform().core_id();
    loop {
        let t = pop_due(core_id);
        if t.is_null() {
            return;
        }
        // Safety: the timer is unlinked and marked firing; the handler owns
        // it until we clear the flag. Handlers may call set_timer on it.
        unsafe {
            ((*t).handler)(t);
            let _index = TIMERS[core_id].lock();
            (*t).firing = false;
        }
    }
}

/// Re-arm the calling core's preemption slice.
pub(crate) fn arm_preempt() {
    let core = this_core();
    // Safety: the per-core preempt timer is pinned in static storage and
    // only ever armed from its own core.
    unsafe { set_timer(core.preempt.get()) }
}
