//! Process records, the parent/child tree and the PID index.
//!
//! Locking: the global table lock guards the tree links, the PID index and
//! the PID counter; each process's own spin lock guards its scheduling
//! state and is the lock handed across context switches. The consistent
//! acquisition order is table lock, then semaphore locks, then per-process
//! locks, then the run-queue lock.

use crate::cpu::{core, this_core, MAX_CORES};
use crate::sched::{self, ProcState};
use crate::sem::Semaphore;
use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use kernel_alloc::{PAGES, PAGE_SIZE, SLAB};
use kernel_collections::{container_of, ListNode, RbNode, RbRoot};
use kernel_hal::{platform, AddressSpaceId, KernelContext};
use kernel_sync::{RawSpin, SpinLock};
use thiserror::Error;

pub type Pid = u64;

/// Exit code forced on a process terminated through [`kill`].
pub const KILLED_EXIT_CODE: i32 = -1;

pub(crate) struct Proc {
    /// Scheduling lock: guards the state transition and crosses the
    /// context-switch boundary as a handoff token.
    pub(crate) lock: RawSpin,
    state: AtomicU8,
    pub(crate) killed: AtomicBool,
    /// Set under the table lock just before the exit path posts the parent;
    /// lets `wait` distinguish "child mid-exit" from a spurious wake.
    exiting: AtomicBool,
    pub(crate) is_idle: bool,
    pub(crate) pid: Pid,
    exit_code: i32,
    entry: fn(usize),
    arg: usize,
    pub(crate) addr_space: Option<AddressSpaceId>,
    parent: *mut Proc,
    children: ListNode,
    sibling: ListNode,
    pid_node: RbNode,
    pub(crate) sched_link: ListNode,
    pub(crate) child_exit: Semaphore,
    /// Kernel switch context, stored at the top of `kstack_page`; the stack
    /// grows down from just below it.
    pub(crate) switch_ctx: *mut KernelContext,
    /// Trap-entry context at the top of `trap_page`; its contents belong to
    /// the trap layer.
    trap_ctx: *mut KernelContext,
    kstack_page: *mut u8,
    trap_page: *mut u8,
}

impl Proc {
    pub(crate) fn state(&self) -> ProcState {
        match self.state.load(Ordering::Acquire) {
            0 => ProcState::Unused,
            1 => ProcState::Runnable,
            2 => ProcState::Running,
            3 => ProcState::Sleeping,
            _ => ProcState::Zombie,
        }
    }

    pub(crate) fn set_state(&self, s: ProcState) {
        self.state.store(s as u8, Ordering::Release);
    }
}

/// Handle to a created-but-not-yet-started process. Consumed by [`start`];
/// after that the record belongs to the scheduler and the parent's `wait`.
pub struct ProcRef(pub(crate) NonNull<Proc>);

impl ProcRef {
    #[must_use]
    pub fn pid(&self) -> Pid {
        // Safety: the record outlives the handle; pid is set at creation.
        unsafe { self.0.as_ref().pid }
    }
}

// Safety: the handle is a unique capability over an unstarted record.
unsafe impl Send for ProcRef {}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WaitError {
    #[error("the calling process has no children")]
    NoChildren,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KillError {
    #[error("no process with id {0}")]
    NotFound(Pid),
}

struct ProcTable {
    pids: RbRoot,
    next_pid: Pid,
    root: *mut Proc,
}

// Safety: raw pointers guarded by the SpinLock around the table.
unsafe impl Send for ProcTable {}

static TABLE: SpinLock<ProcTable> = SpinLock::new(ProcTable {
    pids: RbRoot::new(),
    next_pid: 1,
    root: ptr::null_mut(),
});

fn pid_less(a: *const RbNode, b: *const RbNode) -> bool {
    // Safety: index nodes are embedded in live process records.
    unsafe {
        let pa = container_of!(a, Proc, pid_node);
        let pb = container_of!(b, Proc, pid_node);
        (*pa).pid < (*pb).pid
    }
}

fn ctx_at_top(page: *mut u8) -> *mut KernelContext {
    let off = PAGE_SIZE - size_of::<KernelContext>();
    // Safety: the offset stays inside the page and is 16-aligned.
    unsafe { page.add(off).cast() }
}

fn idle_entry(_arg: usize) {}

/// Allocate and wire a blank record. Shared between real and idle
/// processes; only real ones get a trap page and a PID index entry.
unsafe fn alloc_record(entry: fn(usize), arg: usize, idle: bool) -> *mut Proc {
    let p = SLAB.alloc(size_of::<Proc>()).cast::<Proc>();
    let kstack_page = PAGES.alloc();
    let (trap_page, addr_space) = if idle {
        (ptr::null_mut(), None)
    } else {
        (PAGES.alloc(), Some(platform().address_space_create()))
    };
    unsafe {
        p.write(Proc {
            lock: RawSpin::new(),
            state: AtomicU8::new(if idle {
                ProcState::Running as u8
            } else {
                ProcState::Unused as u8
            }),
            killed: AtomicBool::new(false),
            exiting: AtomicBool::new(false),
            is_idle: idle,
            pid: 0,
            exit_code: 0,
            entry,
            arg,
            addr_space,
            parent: ptr::null_mut(),
            children: ListNode::new(),
            sibling: ListNode::new(),
            pid_node: RbNode::new(),
            sched_link: ListNode::new(),
            child_exit: Semaphore::new(0),
            switch_ctx: ctx_at_top(kstack_page),
            trap_ctx: if trap_page.is_null() {
                ptr::null_mut()
            } else {
                ctx_at_top(trap_page)
            },
            kstack_page,
            trap_page,
        });
        ListNode::init(&raw mut (*p).children);
    }
    p
}

/// Create a process that will run `entry(arg)` once started.
///
/// The record gets the next PID, a slot in the PID index, an address space
/// and two fresh pages: one kernel stack topped by the switch context, one
/// trap stack topped by the trap context.
pub fn create(entry: fn(usize), arg: usize) -> ProcRef {
    // Safety: freshly allocated record, not yet reachable by anyone else.
    let p = unsafe { alloc_record(entry, arg, false) };
    unsafe {
        platform().context_init(
            (*p).switch_ctx,
            (*p).switch_ctx.cast::<u8>(),
            proc_entry,
            p as usize,
            0,
        );
        let mut table = TABLE.lock();
        (*p).pid = table.next_pid;
        table.next_pid += 1;
        if table.pids.insert(&raw mut (*p).pid_node, pid_less).is_err() {
            panic!("pid {} already indexed", (*p).pid);
        }
        log::debug!("created process {}", (*p).pid);
        ProcRef(NonNull::new_unchecked(p))
    }
}

/// First code a new process runs, on its own kernel stack.
extern "C" fn proc_entry(proc_ptr: usize, _reserved: usize) -> ! {
    // the dispatching idle handed our own lock across the first switch
    this_core().take_handoff().release();
    let p = proc_ptr as *mut Proc;
    // Safety: entry and arg were fixed at creation and never change.
    let (entry, arg) = unsafe { ((*p).entry, (*p).arg) };
    entry(arg);
    exit(0)
}

pub(crate) fn current() -> *mut Proc {
    this_core().current()
}

/// PID of the calling process; 0 on an idle flow.
#[must_use]
pub fn current_pid() -> Pid {
    let p = current();
    if p.is_null() {
        0
    } else {
        // Safety: a running process cannot be reaped.
        unsafe { (*p).pid }
    }
}

/// Trap-entry context of the calling process, for the trap layer. Null on
/// an idle flow.
#[must_use]
pub fn current_trap_context() -> *mut KernelContext {
    let p = current();
    if p.is_null() {
        ptr::null_mut()
    } else {
        // Safety: a running process cannot be reaped.
        unsafe { (*p).trap_ctx }
    }
}

/// Adopt `child` under the calling process. Must happen before [`start`].
pub fn set_parent_to_current(child: &ProcRef) {
    let me = current();
    let c = child.0.as_ptr();
    let _table = TABLE.lock();
    // Safety: both records are live; tree links are guarded by the table
    // lock we hold.
    unsafe {
        assert!(
            !me.is_null() && !(*me).is_idle,
            "idle flows cannot own children"
        );
        assert_eq!(
            (*c).state(),
            ProcState::Unused,
            "parent must be set before start"
        );
        (*c).parent = me;
        ListNode::insert_before(&raw mut (*me).children, &raw mut (*c).sibling);
    }
}

/// Hand `child` to the scheduler. A child nobody adopted becomes the root
/// process's.
pub fn start(child: ProcRef) {
    let c = child.0.as_ptr();
    // Safety: the record is live and still Unused; links under table lock.
    unsafe {
        {
            let table = TABLE.lock();
            assert_eq!((*c).state(), ProcState::Unused, "process started twice");
            if (*c).parent.is_null() {
                let root = table.root;
                assert!(!root.is_null(), "process manager not initialized");
                (*c).parent = root;
                ListNode::insert_before(&raw mut (*root).children, &raw mut (*c).sibling);
            }
        }
        sched::activate(c);
    }
}

/// Reap one terminated child: its PID and exit code.
///
/// Blocks until a child terminates; fails immediately when the caller has
/// no children at all.
pub fn wait() -> Result<(Pid, i32), WaitError> {
    let me = current();
    loop {
        let mut exit_in_progress = false;
        {
            let mut table = TABLE.lock();
            // Safety: we are the running process; children are guarded by
            // the table lock.
            unsafe {
                let head = &raw mut (*me).children;
                if ListNode::is_empty(head) {
                    return Err(WaitError::NoChildren);
                }
                let mut link = ListNode::next(head);
                while link != head {
                    let child = container_of!(link, Proc, sibling);
                    match (*child).state() {
                        ProcState::Zombie => {
                            let pid = (*child).pid;
                            let code = (*child).exit_code;
                            table.pids.erase(&raw mut (*child).pid_node);
                            ListNode::detach(link);
                            // its lock is released only after its final
                            // switch; taking it once proves it is off-CPU
                            (*child).lock.lock();
                            (*child).lock.unlock();
                            destroy(child);
                            log::debug!("reaped process {pid} (exit code {code})");
                            return Ok((pid, code));
                        }
                        _ if (*child).exiting.load(Ordering::Acquire) => {
                            exit_in_progress = true;
                        }
                        _ => {}
                    }
                    link = ListNode::next(link);
                }
            }
        }
        if exit_in_progress {
            // the zombie transition is a few instructions away; don't sleep
            // on a wakeup that was already delivered
            sched::yield_now();
            core::hint::spin_loop();
        } else {
            // Safety: the running process owns its semaphore.
            unsafe { (*me).child_exit.wait() };
        }
    }
}

unsafe fn destroy(p: *mut Proc) {
    unsafe {
        if let Some(a) = (*p).addr_space {
            platform().address_space_destroy(a);
        }
        PAGES.free((*p).kstack_page);
        PAGES.free((*p).trap_page);
        ptr::drop_in_place(p);
        SLAB.free(p.cast());
    }
}

/// Terminate the calling process. Children are handed to the root process,
/// the parent's child-exit semaphore is posted, and the scheduler takes
/// the flow away for good.
pub fn exit(code: i32) -> ! {
    let me = current();
    // Safety: we are the running process; tree surgery under table lock.
    unsafe {
        assert!(!me.is_null() && !(*me).is_idle, "idle flows cannot exit");
        {
            let table = TABLE.lock();
            let root = table.root;
            assert!(me != root, "the root process cannot exit");
            (*me).exiting.store(true, Ordering::Release);
            let head = &raw mut (*me).children;
            while !ListNode::is_empty(head) {
                let link = ListNode::next(head);
                ListNode::detach(link);
                let child = container_of!(link, Proc, sibling);
                (*child).parent = root;
                ListNode::insert_before(&raw mut (*root).children, link);
                // root may already have a zombie to collect
                (*root).child_exit.post();
            }
            (*me).exit_code = code;
            (*(*me).parent).child_exit.post();
        }
        log::debug!("process {} exiting with code {code}", (*me).pid);
        sched::sched(ProcState::Zombie);
    }
    unreachable!("a zombie was rescheduled")
}

/// Mark the process with `pid` for termination and make sure it gets
/// scheduled to notice.
pub fn kill(pid: Pid) -> Result<(), KillError> {
    let table = TABLE.lock();
    // Safety: index nodes belong to live records while under the table lock.
    unsafe {
        let node = table.pids.lookup_by(|n| unsafe {
            let p = container_of!(n, Proc, pid_node);
            pid.cmp(&(*p).pid)
        });
        if node.is_null() {
            return Err(KillError::NotFound(pid));
        }
        let p = container_of!(node, Proc, pid_node);
        if (*p).state() == ProcState::Unused {
            return Err(KillError::NotFound(pid));
        }
        assert!(p != table.root, "the root process cannot be killed");
        (*p).killed.store(true, Ordering::Release);
        sched::activate(p);
        log::debug!("killed process {pid}");
    }
    Ok(())
}

/// Termination check for the return-to-user path: a killed process exits
/// here with [`KILLED_EXIT_CODE`].
pub fn exit_if_killed() {
    let me = current();
    if me.is_null() {
        return;
    }
    // Safety: a running process cannot be reaped.
    unsafe {
        if !(*me).is_idle && (*me).killed.load(Ordering::Acquire) {
            exit(KILLED_EXIT_CODE);
        }
    }
}

/// Bring up the process manager: one idle record per core and the root
/// process running `root_entry(arg)`. Called exactly once, after the
/// platform and allocators are ready.
pub fn init(root_entry: fn(usize), arg: usize) {
    let cores = platform().core_count();
    assert!(cores <= MAX_CORES, "too many cores");
    for id in 0..cores {
        // Safety: fresh record; the core slots are written before any idle
        // loop runs.
        let idle = unsafe { alloc_record(idle_entry, 0, true) };
        core(id).set_idle(idle);
        core(id).set_current(idle);
    }
    let root = create(root_entry, arg);
    let root_ptr = root.0.as_ptr();
    {
        let mut table = TABLE.lock();
        assert!(table.root.is_null(), "process manager initialized twice");
        table.root = root_ptr;
    }
    log::info!("process manager online, root pid {}", root.pid());
    // the root has no parent; activate it directly
    sched::activate(root_ptr);
}
