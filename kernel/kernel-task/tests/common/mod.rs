//! Thread-backed [`Platform`] for hosted scheduler tests.
//!
//! Every kernel context is backed by one OS thread and a parking gate.
//! `context_switch` opens the target's gate and parks on its own; the
//! logical core identity travels through the gate, so a flow woken by
//! another core's idle loop resumes believing it runs there. The clock is
//! a plain counter the test advances by hand; ticks are delivered by
//! calling [`kernel_task::on_tick`] from a thread bound to the right core.

#![allow(dead_code)]

use kernel_alloc::PAGE_SIZE;
use kernel_hal::{AddressSpaceId, KernelContext, Platform};
use std::cell::Cell;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

// context word layout: [0] gate, [1] started, [2] entry, [3] arg0, [4] arg1
const W_GATE: usize = 0;
const W_STARTED: usize = 1;
const W_ENTRY: usize = 2;
const W_ARG0: usize = 3;
const W_ARG1: usize = 4;

struct GateState {
    run: bool,
    core: usize,
}

struct Gate {
    inner: Mutex<GateState>,
    cv: Condvar,
}

impl Gate {
    fn leak_new() -> &'static Gate {
        Box::leak(Box::new(Gate {
            inner: Mutex::new(GateState {
                run: false,
                core: usize::MAX,
            }),
            cv: Condvar::new(),
        }))
    }

    /// Let the flow behind this gate run, as `core`.
    fn open(&self, core: usize) {
        let mut g = self.inner.lock().unwrap();
        g.run = true;
        g.core = core;
        self.cv.notify_one();
    }

    /// Park until opened; returns the core identity to adopt.
    fn wait(&self) -> usize {
        let mut g = self.inner.lock().unwrap();
        while !g.run {
            g = self.cv.wait(g).unwrap();
        }
        g.run = false;
        g.core
    }
}

thread_local! {
    static MY_GATE: Cell<*const Gate> = const { Cell::new(std::ptr::null()) };
    static MY_CORE: Cell<usize> = const { Cell::new(usize::MAX) };
}

pub struct ThreadPlatform {
    cores: usize,
    clock_ms: AtomicU64,
    countdown_ms: Vec<AtomicU64>,
    next_aspace: AtomicUsize,
    live_aspaces: AtomicUsize,
}

impl ThreadPlatform {
    pub fn new(cores: usize) -> Self {
        Self {
            cores,
            clock_ms: AtomicU64::new(0),
            countdown_ms: (0..cores).map(|_| AtomicU64::new(0)).collect(),
            next_aspace: AtomicUsize::new(1),
            live_aspaces: AtomicUsize::new(0),
        }
    }

    pub fn advance_ms(&self, ms: u64) {
        self.clock_ms.fetch_add(ms, Ordering::SeqCst);
    }

    /// Last countdown programmed by `core`.
    pub fn last_countdown(&self, core: usize) -> u64 {
        self.countdown_ms[core].load(Ordering::SeqCst)
    }

    pub fn live_address_spaces(&self) -> usize {
        self.live_aspaces.load(Ordering::SeqCst)
    }
}

impl Platform for ThreadPlatform {
    fn core_id(&self) -> usize {
        let id = MY_CORE.with(Cell::get);
        assert!(id < self.cores, "thread has no core identity");
        id
    }

    fn core_count(&self) -> usize {
        self.cores
    }

    fn now_ms(&self) -> u64 {
        self.clock_ms.load(Ordering::SeqCst)
    }

    fn set_countdown_ms(&self, ms: u64) {
        self.countdown_ms[self.core_id()].store(ms, Ordering::SeqCst);
    }

    unsafe fn context_init(
        &self,
        ctx: *mut KernelContext,
        _stack_top: *mut u8,
        entry: extern "C" fn(usize, usize) -> !,
        arg0: usize,
        arg1: usize,
    ) {
        let w = unsafe { (*ctx).words_mut() };
        w[W_GATE] = 0;
        w[W_STARTED] = 0;
        w[W_ENTRY] = entry as usize;
        w[W_ARG0] = arg0;
        w[W_ARG1] = arg1;
    }

    unsafe fn context_switch(&self, from: *mut KernelContext, to: *mut KernelContext) {
        let my_core = MY_CORE.with(Cell::get);
        let from_gate = MY_GATE.with(|g| {
            if g.get().is_null() {
                g.set(Gate::leak_new());
            }
            g.get()
        });
        unsafe {
            // binding also marks the context live: idle contexts are first
            // used as a switch source, never via context_init
            (*from).words_mut()[W_GATE] = from_gate as usize;
            (*from).words_mut()[W_STARTED] = 1;
        }

        let (gate_word, started, entry_word, arg0, arg1) = {
            let w = unsafe { (*to).words() };
            (w[W_GATE], w[W_STARTED], w[W_ENTRY], w[W_ARG0], w[W_ARG1])
        };
        if started == 0 {
            // first switch into this context: give it a thread
            let gate = Gate::leak_new();
            unsafe {
                (*to).words_mut()[W_STARTED] = 1;
                (*to).words_mut()[W_GATE] = gate as *const Gate as usize;
            }
            gate.open(my_core);
            thread::Builder::new()
                .name("kernel-flow".into())
                .spawn(move || {
                    MY_GATE.with(|g| g.set(gate));
                    let core = gate.wait();
                    MY_CORE.with(|c| c.set(core));
                    // Safety: context_init stored a real entry pointer.
                    let entry: extern "C" fn(usize, usize) -> ! =
                        unsafe { std::mem::transmute::<usize, _>(entry_word) };
                    entry(arg0, arg1);
                })
                .unwrap();
        } else {
            let gate = gate_word as *const Gate;
            // Safety: gates are leaked and outlive every context.
            unsafe { (*gate).open(my_core) };
        }

        // park this flow; adopt whatever core resumes it
        // Safety: from_gate is this thread's leaked gate.
        let core = unsafe { (*from_gate).wait() };
        MY_CORE.with(|c| c.set(core));
    }

    fn address_space_create(&self) -> AddressSpaceId {
        self.live_aspaces.fetch_add(1, Ordering::SeqCst);
        AddressSpaceId::new(self.next_aspace.fetch_add(1, Ordering::SeqCst))
    }

    fn address_space_destroy(&self, _id: AddressSpaceId) {
        self.live_aspaces.fetch_sub(1, Ordering::SeqCst);
    }

    fn address_space_attach(&self, _id: AddressSpaceId) {}

    fn wait_for_event(&self) {
        thread::sleep(Duration::from_millis(1));
    }

    fn halt(&self) -> ! {
        loop {
            thread::park();
        }
    }
}

static PLATFORM: OnceLock<&'static ThreadPlatform> = OnceLock::new();

/// Install a fresh platform and seed the allocators. Once per test process.
pub fn boot(cores: usize) -> &'static ThreadPlatform {
    let p: &'static ThreadPlatform = Box::leak(Box::new(ThreadPlatform::new(cores)));
    PLATFORM.set(p).ok().expect("boot called twice");
    kernel_hal::install(p);
    let arena = Box::leak(vec![0u8; 512 * PAGE_SIZE].into_boxed_slice());
    // Safety: the arena is leaked and owned by the allocators from here on.
    unsafe { kernel_alloc::init(arena.as_mut_ptr(), arena.len()) };
    p
}

pub fn the_platform() -> &'static ThreadPlatform {
    PLATFORM.get().expect("boot first")
}

/// Run `f` on a thread that identifies as `core`.
pub fn run_as_core(core: usize, f: impl FnOnce() + Send + 'static) -> JoinHandle<()> {
    thread::spawn(move || {
        MY_CORE.with(|c| c.set(core));
        f();
    })
}

/// Bring up one idle loop per core; join the handles after
/// [`kernel_task::request_shutdown`] takes effect.
pub fn start_cores(cores: usize) -> Vec<JoinHandle<()>> {
    (0..cores)
        .map(|i| run_as_core(i, kernel_task::idle_main))
        .collect()
}

static ROOT_PARK: kernel_task::Semaphore = kernel_task::Semaphore::new(0);

/// End a root-process test body: ask the idle loops to wind down and take
/// the root off the run queue for good.
pub fn finish_root() {
    kernel_task::request_shutdown();
    ROOT_PARK.wait();
    unreachable!("the root park semaphore is never posted");
}
