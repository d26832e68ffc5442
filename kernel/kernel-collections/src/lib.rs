//! # Intrusive kernel collections
//!
//! Containers that live inside the objects they organize: a circular
//! doubly-linked list, a FIFO queue (with and without its own lock), a
//! lock-free singly-linked stack, and a red-black ordered index. None of
//! them allocate; callers embed the node types in their own structs and
//! recover the containing object with [`container_of!`].
//!
//! All raw-node operations are `unsafe`: the caller owns the aliasing and
//! locking discipline. The usual contract is "one lock protects the whole
//! container; every node is linked into at most one container at a time".

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod list;
pub mod lockfree;
pub mod queue;
pub mod rbtree;

pub use list::ListNode;
pub use lockfree::{LockFreeStack, StackNode};
pub use queue::{Queue, RawQueue};
pub use rbtree::{RbNode, RbRoot};

/// Recover a pointer to the struct containing `$ptr` at field `$field`.
///
/// ```
/// use kernel_collections::{container_of, ListNode};
///
/// struct Job {
///     id: u32,
///     link: ListNode,
/// }
///
/// let mut job = Job { id: 7, link: ListNode::new() };
/// let link: *mut ListNode = &raw mut job.link;
/// let back = unsafe { container_of!(link, Job, link) };
/// assert_eq!(unsafe { (*back).id }, 7);
/// ```
#[macro_export]
macro_rules! container_of {
    ($ptr:expr, $ty:ty, $field:ident) => {
        $ptr.byte_sub(core::mem::offset_of!($ty, $field)).cast::<$ty>()
    };
}
