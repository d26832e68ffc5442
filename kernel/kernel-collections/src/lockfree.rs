//! Lock-free singly-linked stack (Treiber stack).
//!
//! Multiple cores push and drain without taking a spin lock; intended for
//! cross-core signaling links. Single-node [`pop`](LockFreeStack::pop) is
//! subject to the classic ABA hazard if nodes are freed and re-pushed while
//! another core is mid-pop; the safe consumption pattern under concurrent
//! reuse is [`drain`](LockFreeStack::drain).

use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};

/// One link; embed it in the object being queued.
#[repr(C)]
pub struct StackNode {
    next: *mut StackNode,
}

impl Default for StackNode {
    fn default() -> Self {
        Self::new()
    }
}

impl StackNode {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next: ptr::null_mut(),
        }
    }

    /// Successor in a popped/drained chain; null terminates.
    ///
    /// # Safety
    /// Only meaningful on nodes the caller has removed from the stack.
    #[must_use]
    pub unsafe fn next(node: *const Self) -> *mut Self {
        unsafe { (*node).next }
    }
}

pub struct LockFreeStack {
    head: AtomicPtr<StackNode>,
}

impl Default for LockFreeStack {
    fn default() -> Self {
        Self::new()
    }
}

impl LockFreeStack {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            head: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Push `node` onto the stack.
    ///
    /// # Safety
    /// `node` must be valid until it is popped or drained, and must not be
    /// linked anywhere else.
    pub unsafe fn push(&self, node: *mut StackNode) {
        let mut head = self.head.load(Ordering::Relaxed);
        loop {
            unsafe { (*node).next = head };
            match self
                .head
                .compare_exchange_weak(head, node, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return,
                Err(seen) => head = seen,
            }
        }
    }

    /// Pop one node; null when empty. See the ABA note on the type.
    pub fn pop(&self) -> *mut StackNode {
        let mut head = self.head.load(Ordering::Acquire);
        while !head.is_null() {
            let next = unsafe { (*head).next };
            match self
                .head
                .compare_exchange_weak(head, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => break,
                Err(seen) => head = seen,
            }
        }
        head
    }

    /// Atomically take the whole chain; returns the old head (null if empty).
    pub fn drain(&self) -> *mut StackNode {
        self.head.swap(ptr::null_mut(), Ordering::AcqRel)
    }

    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire).is_null()
    }
}
