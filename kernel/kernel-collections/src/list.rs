//! Circular intrusive doubly-linked list.
//!
//! A list head is itself a node; an empty list is a node linked to itself.
//! All operations are O(1) splices. The list carries no lock — the caller
//! holds whatever lock protects the container.

use core::ptr;

/// One link in a circular doubly-linked list.
///
/// Constructed unlinked ([`new`](Self::new) leaves both pointers null);
/// [`init`](Self::init) must run before the node is used as a head or
/// spliced into a list.
#[repr(C)]
pub struct ListNode {
    prev: *mut ListNode,
    next: *mut ListNode,
}

impl Default for ListNode {
    fn default() -> Self {
        Self::new()
    }
}

impl ListNode {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            prev: ptr::null_mut(),
            next: ptr::null_mut(),
        }
    }

    /// Make `node` a singleton ring (an empty list, or a detached node).
    ///
    /// # Safety
    /// `node` must be valid for writes and not currently linked into a list
    /// that anyone else still walks.
    pub unsafe fn init(node: *mut Self) {
        unsafe {
            (*node).prev = node;
            (*node).next = node;
        }
    }

    /// Whether the ring at `list` contains only the head itself.
    ///
    /// # Safety
    /// `list` must be an initialized head, and the caller must hold the
    /// container's lock.
    #[must_use]
    pub unsafe fn is_empty(list: *const Self) -> bool {
        unsafe { (*list).next.cast_const() == list }
    }

    /// Splice `node` in directly after `list` (new first element).
    ///
    /// # Safety
    /// `list` must be an initialized head; `node` must be valid and not
    /// linked anywhere; the caller must hold the container's lock.
    pub unsafe fn insert_after(list: *mut Self, node: *mut Self) {
        unsafe {
            let next = (*list).next;
            (*node).prev = list;
            (*node).next = next;
            (*next).prev = node;
            (*list).next = node;
        }
    }

    /// Splice `node` in directly before `list` (new last element).
    ///
    /// # Safety
    /// As for [`insert_after`](Self::insert_after).
    pub unsafe fn insert_before(list: *mut Self, node: *mut Self) {
        unsafe {
            let prev = (*list).prev;
            (*node).prev = prev;
            (*node).next = list;
            (*prev).next = node;
            (*list).prev = node;
        }
    }

    /// Unlink `node` from its ring and re-initialize it as a singleton.
    ///
    /// Returns the former predecessor, or null if `node` was alone.
    ///
    /// # Safety
    /// `node` must be linked (or a singleton); the caller must hold the
    /// container's lock.
    pub unsafe fn detach(node: *mut Self) -> *mut Self {
        unsafe {
            let prev = (*node).prev;
            let next = (*node).next;
            (*prev).next = next;
            (*next).prev = prev;
            Self::init(node);
            if prev == node { ptr::null_mut() } else { prev }
        }
    }

    /// # Safety
    /// `node` must be initialized; caller holds the container's lock.
    #[must_use]
    pub unsafe fn next(node: *const Self) -> *mut Self {
        unsafe { (*node).next }
    }

    /// # Safety
    /// `node` must be initialized; caller holds the container's lock.
    #[must_use]
    pub unsafe fn prev(node: *const Self) -> *mut Self {
        unsafe { (*node).prev }
    }
}
