//! # Hardware abstraction seam
//!
//! Everything the portable kernel needs from the machine, gathered behind
//! one [`Platform`] trait: core identity, monotonic time, the countdown
//! timer, context switching, address-space lifetime, and the idle wait.
//!
//! The embedding installs its platform exactly once at boot with
//! [`install`]; portable code reaches it through [`platform`]. Tests install
//! a thread-backed platform and run the whole kernel hosted.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod context;
mod platform;

pub use context::KernelContext;
pub use platform::{install, platform, AddressSpaceId, Platform};
