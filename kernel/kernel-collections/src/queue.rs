//! FIFO queue over intrusive list nodes.
//!
//! [`RawQueue`] is the bare head/tail/count structure whose operations
//! require external serialization; [`Queue`] pairs one with its own spin
//! lock. Used for the scheduler run queue and semaphore sleep lists.

use crate::ListNode;
use core::ptr;
use kernel_sync::{SpinLock, SpinLockGuard};

/// Unlocked FIFO queue state: first/last node and a count.
///
/// Nodes are kept in one circular ring; `head`/`tail` point into it. Empty
/// means both are null.
pub struct RawQueue {
    head: *mut ListNode,
    tail: *mut ListNode,
    len: usize,
}

// Safety: raw pointers only; access is serialized by the owning lock.
unsafe impl Send for RawQueue {}

impl Default for RawQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl RawQueue {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            head: ptr::null_mut(),
            tail: ptr::null_mut(),
            len: 0,
        }
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// First node, or null when empty.
    #[must_use]
    pub const fn front(&self) -> *mut ListNode {
        self.head
    }

    /// Append `node` at the tail.
    ///
    /// # Safety
    /// `node` must be valid and not linked into any container.
    pub unsafe fn push(&mut self, node: *mut ListNode) {
        unsafe {
            ListNode::init(node);
            if self.len == 0 {
                self.head = node;
                self.tail = node;
            } else {
                ListNode::insert_after(self.tail, node);
                self.tail = node;
            }
        }
        self.len += 1;
    }

    /// Remove and return the head node; null when empty.
    pub fn pop(&mut self) -> *mut ListNode {
        let node = self.head;
        if !node.is_null() {
            // Safety: node is linked in this queue.
            unsafe { self.detach(node) };
        }
        node
    }

    /// Unlink `node` from anywhere in the queue.
    ///
    /// # Safety
    /// `node` must currently be linked into this queue.
    pub unsafe fn detach(&mut self, node: *mut ListNode) {
        assert!(self.len > 0, "detach from empty queue");
        if self.len == 1 {
            self.head = ptr::null_mut();
            self.tail = ptr::null_mut();
        } else if self.head == node {
            self.head = unsafe { ListNode::next(node) };
        } else if self.tail == node {
            self.tail = unsafe { ListNode::prev(node) };
        }
        unsafe { ListNode::detach(node) };
        self.len -= 1;
    }

    /// Move an already-linked `node` to the tail (run-queue rotation).
    ///
    /// # Safety
    /// `node` must currently be linked into this queue.
    pub unsafe fn rotate_to_back(&mut self, node: *mut ListNode) {
        unsafe {
            self.detach(node);
            self.push(node);
        }
    }
}

/// A [`RawQueue`] plus the spin lock that serializes it.
pub struct Queue {
    inner: SpinLock<RawQueue>,
}

impl Default for Queue {
    fn default() -> Self {
        Self::new()
    }
}

impl Queue {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            inner: SpinLock::new(RawQueue::new()),
        }
    }

    /// Take the queue lock for a compound operation (walks, rotations).
    pub fn lock(&self) -> SpinLockGuard<'_, RawQueue> {
        self.inner.lock()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Locked push.
    ///
    /// # Safety
    /// As for [`RawQueue::push`].
    pub unsafe fn push(&self, node: *mut ListNode) {
        unsafe { self.inner.lock().push(node) }
    }

    /// Locked pop; null when empty.
    pub fn pop(&self) -> *mut ListNode {
        self.inner.lock().pop()
    }

    /// Locked detach.
    ///
    /// # Safety
    /// As for [`RawQueue::detach`].
    pub unsafe fn detach(&self, node: *mut ListNode) {
        unsafe { self.inner.lock().detach(node) }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fifo_order_and_detach() {
        let mut nodes: Vec<ListNode> = (0..4).map(|_| ListNode::new()).collect();
        let ptrs: Vec<*mut ListNode> = nodes.iter_mut().map(|n| &raw mut *n).collect();

        let mut q = RawQueue::new();
        assert!(q.is_empty());
        assert!(q.pop().is_null());

        unsafe {
            for &p in &ptrs {
                q.push(p);
            }
        }
        assert_eq!(q.len(), 4);
        assert_eq!(q.front(), ptrs[0]);

        // remove one from the middle
        unsafe { q.detach(ptrs[2]) };
        assert_eq!(q.len(), 3);

        assert_eq!(q.pop(), ptrs[0]);
        assert_eq!(q.pop(), ptrs[1]);
        assert_eq!(q.pop(), ptrs[3]);
        assert!(q.pop().is_null());
        assert!(q.is_empty());
    }

    #[test]
    fn rotation_moves_front_to_back() {
        let mut nodes: Vec<ListNode> = (0..3).map(|_| ListNode::new()).collect();
        let ptrs: Vec<*mut ListNode> = nodes.iter_mut().map(|n| &raw mut *n).collect();

        let mut q = RawQueue::new();
        unsafe {
            for &p in &ptrs {
                q.push(p);
            }
            q.rotate_to_back(ptrs[0]);
        }
        assert_eq!(q.pop(), ptrs[1]);
        assert_eq!(q.pop(), ptrs[2]);
        assert_eq!(q.pop(), ptrs[0]);
    }
}
