//! The machine interface and its one-time installation.

use crate::KernelContext;
use kernel_sync::SyncOnceCell;

/// Opaque handle to one address space the platform manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AddressSpaceId(usize);

impl AddressSpaceId {
    #[must_use]
    pub const fn new(raw: usize) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn raw(self) -> usize {
        self.0
    }
}

/// Machine services the portable kernel runs on.
///
/// Exactly one implementation is installed per boot. All methods may be
/// called from any core; `&self` methods that answer per-core questions
/// (`core_id`) answer for the calling core.
pub trait Platform: Sync {
    /// Identity of the calling core, `0..core_count()`.
    fn core_id(&self) -> usize;

    /// Number of cores brought up for this boot. Constant after install.
    fn core_count(&self) -> usize;

    /// Monotonic milliseconds since an arbitrary boot-time origin.
    fn now_ms(&self) -> u64;

    /// Program the calling core's countdown timer to fire in `ms`.
    ///
    /// A new deadline replaces any previously programmed one.
    fn set_countdown_ms(&self, ms: u64);

    /// Prepare `ctx` so that switching to it enters `entry(arg0, arg1)` on
    /// the stack ending at `stack_top`.
    ///
    /// # Safety
    /// `ctx` must be valid for writes; `stack_top` must be the one-past-end
    /// of a live, sufficiently large, suitably aligned stack that stays
    /// allocated until the context is discarded.
    unsafe fn context_init(
        &self,
        ctx: *mut KernelContext,
        stack_top: *mut u8,
        entry: extern "C" fn(usize, usize) -> !,
        arg0: usize,
        arg1: usize,
    );

    /// Save the calling flow into `from` and resume `to`.
    ///
    /// Returns when some other core (or a later flow on this core) switches
    /// back into `from`; the caller may be running on a different core by
    /// then.
    ///
    /// # Safety
    /// `from` must be valid for writes and `to` must hold a context prepared
    /// by [`context_init`](Self::context_init) or saved by an earlier switch.
    /// Neither may be switched into concurrently from another core.
    unsafe fn context_switch(&self, from: *mut KernelContext, to: *mut KernelContext);

    /// Create an empty address space.
    fn address_space_create(&self) -> AddressSpaceId;

    /// Release `id` and everything mapped into it. `id` must not be attached
    /// on any core.
    fn address_space_destroy(&self, id: AddressSpaceId);

    /// Make `id` the active address space on the calling core.
    fn address_space_attach(&self, id: AddressSpaceId);

    /// Block the calling core cheaply until an interrupt-like event. May
    /// return spuriously.
    fn wait_for_event(&self);

    /// Stop the calling core permanently.
    fn halt(&self) -> !;
}

static PLATFORM: SyncOnceCell<&'static dyn Platform> = SyncOnceCell::new();

/// Install the platform for this boot. Called exactly once, before any
/// other kernel initialization.
///
/// # Panics
/// If a platform is already installed.
pub fn install(p: &'static dyn Platform) {
    if PLATFORM.set(p).is_err() {
        panic!("platform installed twice");
    }
    log::info!("platform installed: {} cores", p.core_count());
}

/// The installed platform.
///
/// # Panics
/// If called before [`install`].
#[must_use]
pub fn platform() -> &'static dyn Platform {
    match PLATFORM.get() {
        Some(p) => *p,
        None => panic!("platform accessed before install"),
    }
}
