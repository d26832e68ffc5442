//! Owned slab-allocated values.

use crate::slab::SlabAllocator;
use core::fmt;
use core::ops::{Deref, DerefMut};
use core::ptr::NonNull;

/// A `T` owned in the slab; freed (and dropped) when the box drops.
///
/// The requested class size is the value's size rounded up to its
/// alignment, which keeps every class the slab can pick suitably aligned.
pub struct KBox<T> {
    ptr: NonNull<T>,
    slab: &'static SlabAllocator,
}

// Safety: KBox owns its T exclusively, like Box.
unsafe impl<T: Send> Send for KBox<T> {}
unsafe impl<T: Sync> Sync for KBox<T> {}

impl<T> KBox<T> {
    /// Allocate from the global slab.
    ///
    /// # Panics
    /// As [`SlabAllocator::alloc`].
    pub fn new(value: T) -> Self {
        Self::new_in(&crate::SLAB, value)
    }

    /// Allocate from a specific slab.
    pub fn new_in(slab: &'static SlabAllocator, value: T) -> Self {
        if size_of::<T>() == 0 {
            core::mem::forget(value);
            return Self {
                ptr: NonNull::dangling(),
                slab,
            };
        }
        let want = size_of::<T>().next_multiple_of(align_of::<T>());
        let raw = slab.alloc(want).cast::<T>();
        debug_assert_eq!(raw as usize % align_of::<T>(), 0);
        // Safety: the slab returned `want >= size_of::<T>()` exclusive bytes.
        unsafe { raw.write(value) };
        Self {
            // Safety: slab allocations are never null.
            ptr: unsafe { NonNull::new_unchecked(raw) },
            slab,
        }
    }
}

impl<T> Deref for KBox<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Safety: ptr holds a live T for the box's lifetime.
        unsafe { self.ptr.as_ref() }
    }
}

impl<T> DerefMut for KBox<T> {
    fn deref_mut(&mut self) -> &mut T {
        // Safety: exclusive through &mut self.
        unsafe { self.ptr.as_mut() }
    }
}

impl<T> Drop for KBox<T> {
    fn drop(&mut self) {
        // Safety: ptr holds a live T we own; freed exactly once here.
        unsafe {
            self.ptr.as_ptr().drop_in_place();
            if size_of::<T>() != 0 {
                self.slab.free(self.ptr.as_ptr().cast());
            }
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for KBox<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        (**self).fmt(f)
    }
}
