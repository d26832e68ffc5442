//! # Kernel synchronization primitives
//!
//! Spin-based mutual exclusion for a shared-memory multiprocessor: a raw
//! test-and-set spin lock, a RAII mutex built on it, an explicit lock
//! hand-off token for the scheduler's cross-context-switch protocol, and a
//! spin-waiting once-cell for initialization-once singletons.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod handoff;
mod once;
mod raw_spin;
mod spin_lock;

pub use handoff::LockHandoff;
pub use once::SyncOnceCell;
pub use raw_spin::RawSpin;
pub use spin_lock::{SpinLock, SpinLockGuard};
