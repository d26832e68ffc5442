//! # Kernel memory allocators
//!
//! Two layers over one caller-provided arena:
//!
//! * [`PageAllocator`] — a free-list of whole 4 KiB pages. Process blocks,
//!   kernel stacks and slab backing pages come from here.
//! * [`SlabAllocator`] — sub-page objects in 24 size classes from 2 bytes to
//!   2 KiB, one class per backing page, with a per-page free list of 16-bit
//!   offsets. [`KBox`] is the owned-pointer convenience on top.
//!
//! Exhaustion and caller misuse (foreign or misaligned frees, oversized
//! requests) are unrecoverable here and panic; the embedding's panic
//! handler decides what a dead kernel does next.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod kbox;
mod pages;
mod slab;

pub use kbox::KBox;
pub use pages::{PageAllocator, PAGE_SIZE};
pub use slab::{ClassStats, SlabAllocator, CLASS_COUNT};

/// The boot arena's allocators. [`init`] wires them up once.
pub static PAGES: PageAllocator = PageAllocator::new();
pub static SLAB: SlabAllocator = SlabAllocator::new();

/// Hand the boot arena `[base, base + len)` to the global allocators.
///
/// # Safety
/// The range must be valid, unused, and owned by the allocators from here
/// on. Must be called exactly once, before any allocation.
pub unsafe fn init(base: *mut u8, len: usize) {
    unsafe { PAGES.init(base, len) };
    SLAB.init(&PAGES);
    log::info!(
        "memory: {} pages of {} bytes at {base:p}",
        PAGES.total_pages(),
        PAGE_SIZE
    );
}
