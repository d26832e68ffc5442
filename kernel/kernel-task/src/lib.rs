//! # Process lifecycle, scheduling and blocking synchronization
//!
//! The upper half of the kernel core: process records with a parent/child
//! tree and a PID index, a round-robin run queue with a two-phase context
//! switch protocol (every process-to-process handoff bounces through the
//! core's idle process), counting semaphores with FIFO sleep lists, and a
//! per-core deadline-ordered timer wheel that also drives preemption.
//!
//! Boot order: install the [`kernel_hal::Platform`], seed
//! [`kernel_alloc::init`], call [`init`] once with the root process entry,
//! then run [`idle_main`] on every core.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod cpu;
mod proc;
mod sched;
mod sem;
mod timer;

pub use cpu::MAX_CORES;
pub use proc::{
    create, current_pid, current_trap_context, exit, exit_if_killed, init, kill,
    set_parent_to_current, start, wait, KillError, Pid, ProcRef, WaitError, KILLED_EXIT_CODE,
};
pub use sched::{idle_main, preempt_pending, request_shutdown, yield_now, SCHED_SLICE_MS};
pub use sem::Semaphore;
pub use timer::{cancel_timer, on_tick, set_timer, Timer, DEFAULT_TICK_MS};
