//! Slab allocator for sub-page objects.
//!
//! Twenty-four size classes; each backing page serves exactly one class and
//! starts with a [`SlabHeader`]. Free objects within a page form a singly
//! linked list of 16-bit offsets from the page base, with 0 (the header) as
//! the terminator. Pages with room hang off their class's partial list,
//! exhausted pages off the full list, and a page whose last object is freed
//! goes back to the page allocator.

use crate::pages::{PageAllocator, PAGE_SIZE};
use kernel_collections::{container_of, ListNode};
use kernel_sync::{SpinLock, SyncOnceCell};

/// Object sizes served, in bytes. Requests above the last entry are refused.
const CLASS_SIZES: [usize; CLASS_COUNT] = [
    2, 4, 8, 12, 16, 24, 32, 40, 48, 56, 64, 96, 128, 160, 192, 224, 256, 320, 384, 448, 512,
    1024, 1536, 2048,
];

pub const CLASS_COUNT: usize = 24;

/// Lives at the base of every slab page.
#[repr(C)]
struct SlabHeader {
    /// Link in the class's partial or full list.
    link: ListNode,
    /// Offset of the first free object; 0 when the page is full.
    free_head: u16,
    /// Objects currently allocated from this page.
    live: u16,
    /// Index into [`CLASS_SIZES`].
    class: u16,
}

/// Objects of one class are aligned to the largest power of two dividing
/// their size.
const fn class_align(obj_size: usize) -> usize {
    1 << obj_size.trailing_zeros()
}

/// Offset of the first object in a page of the given class.
const fn first_offset(obj_size: usize) -> usize {
    size_of::<SlabHeader>().next_multiple_of(class_align(obj_size))
}

struct ClassLists {
    /// Pages with at least one free object.
    partial: ListNode,
    /// Pages with none.
    full: ListNode,
    pages: usize,
    live: usize,
}

// Safety: the list nodes are only touched under the owning SpinLock.
unsafe impl Send for ClassLists {}

impl ClassLists {
    const fn new() -> Self {
        Self {
            partial: ListNode::new(),
            full: ListNode::new(),
            pages: 0,
            live: 0,
        }
    }
}

/// Usage snapshot of one size class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassStats {
    pub obj_size: usize,
    /// Backing pages currently held.
    pub pages: usize,
    /// Objects currently allocated.
    pub live: usize,
}

pub struct SlabAllocator {
    classes: [SpinLock<ClassLists>; CLASS_COUNT],
    pages: SyncOnceCell<&'static PageAllocator>,
}

impl Default for SlabAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl SlabAllocator {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            classes: [const { SpinLock::new(ClassLists::new()) }; CLASS_COUNT],
            pages: SyncOnceCell::new(),
        }
    }

    /// Wire the slab to its page source. Must be called exactly once,
    /// before any allocation.
    pub fn init(&self, pages: &'static PageAllocator) {
        if self.pages.set(pages).is_err() {
            panic!("slab allocator initialized twice");
        }
        for class in &self.classes {
            let lists = &mut *class.lock();
            // Safety: the heads live inside the locked static and are
            // initialized exactly once here.
            unsafe {
                ListNode::init(&raw mut lists.partial);
                ListNode::init(&raw mut lists.full);
            }
        }
    }

    fn page_source(&self) -> &'static PageAllocator {
        match self.pages.get() {
            Some(p) => p,
            None => panic!("slab allocator used before init"),
        }
    }

    /// Smallest class serving `size`, or none if it exceeds the largest.
    fn class_for(size: usize) -> Option<usize> {
        CLASS_SIZES.iter().position(|&s| s >= size)
    }

    /// Allocate `size` bytes (rounded up to the class size).
    ///
    /// Objects carved from a fresh page are zeroed; recycled objects keep
    /// whatever the previous owner left behind, apart from the first two
    /// bytes, which held the free-list link.
    ///
    /// # Panics
    /// When `size` is 0 or above the largest class, or the arena is
    /// exhausted.
    pub fn alloc(&self, size: usize) -> *mut u8 {
        assert!(size > 0, "zero-size slab request");
        let Some(class) = Self::class_for(size) else {
            panic!(
                "slab request of {size} bytes exceeds the largest class ({})",
                CLASS_SIZES[CLASS_COUNT - 1]
            );
        };
        let obj_size = CLASS_SIZES[class];
        let first = first_offset(obj_size);

        let mut lists = self.classes[class].lock();
        // Safety: list nodes and headers are ours under the class lock;
        // offsets stay within the page by construction.
        unsafe {
            if ListNode::is_empty(&raw const lists.partial) {
                let page = self.page_source().alloc();
                page.write_bytes(0, PAGE_SIZE);
                let hdr = page.cast::<SlabHeader>();
                (*hdr).class = class as u16;
                (*hdr).live = 0;
                (*hdr).free_head = first as u16;
                let mut off = first;
                while off + obj_size <= PAGE_SIZE {
                    let next = if off + 2 * obj_size <= PAGE_SIZE {
                        off + obj_size
                    } else {
                        0
                    };
                    page.add(off).cast::<u16>().write(next as u16);
                    off += obj_size;
                }
                ListNode::init(&raw mut (*hdr).link);
                ListNode::insert_after(&raw mut lists.partial, &raw mut (*hdr).link);
                lists.pages += 1;
            }

            let link = ListNode::next(&raw const lists.partial);
            let hdr = container_of!(link, SlabHeader, link);
            let page = hdr.cast::<u8>();
            let off = (*hdr).free_head as usize;
            debug_assert_ne!(off, 0, "empty page on the partial list");
            let next = page.add(off).cast::<u16>().read();
            // the link word occupied the object's first two bytes
            page.add(off).cast::<u16>().write(0);
            (*hdr).free_head = next;
            (*hdr).live += 1;
            if next == 0 {
                ListNode::detach(link);
                ListNode::insert_after(&raw mut lists.full, link);
            }
            lists.live += 1;
            page.add(off)
        }
    }

    /// Return `ptr` to its class. A page whose last object leaves goes back
    /// to the page allocator.
    ///
    /// # Safety
    /// `ptr` must have come from [`alloc`](Self::alloc) on this allocator
    /// and must not be used afterwards.
    ///
    /// # Panics
    /// When `ptr` does not sit on an object boundary of its page's class.
    pub unsafe fn free(&self, ptr: *mut u8) {
        let addr = ptr as usize;
        let page = (addr & !(PAGE_SIZE - 1)) as *mut u8;
        let hdr = page.cast::<SlabHeader>();
        // Safety: a slab pointer's page starts with the header; the class
        // field is immutable while any object is live.
        let class = unsafe { (*hdr).class } as usize;
        assert!(class < CLASS_COUNT, "slab free of a foreign pointer {ptr:p}");
        let obj_size = CLASS_SIZES[class];
        let first = first_offset(obj_size);
        let off = addr - page as usize;
        assert!(
            off >= first && (off - first) % obj_size == 0,
            "slab free of a misaligned pointer {ptr:p}"
        );

        let mut lists = self.classes[class].lock();
        // Safety: header and links are ours under the class lock.
        unsafe {
            if (*hdr).free_head == 0 {
                // was full, can serve again
                ListNode::detach(&raw mut (*hdr).link);
                ListNode::insert_after(&raw mut lists.partial, &raw mut (*hdr).link);
            }
            ptr.cast::<u16>().write((*hdr).free_head);
            (*hdr).free_head = off as u16;
            (*hdr).live -= 1;
            lists.live -= 1;
            if (*hdr).live == 0 {
                ListNode::detach(&raw mut (*hdr).link);
                lists.pages -= 1;
                self.page_source().free(page);
            }
        }
    }

    /// # Panics
    /// When `class` is out of range.
    pub fn class_stats(&self, class: usize) -> ClassStats {
        assert!(class < CLASS_COUNT);
        let lists = self.classes[class].lock();
        ClassStats {
            obj_size: CLASS_SIZES[class],
            pages: lists.pages,
            live: lists.live,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::panic::{catch_unwind, AssertUnwindSafe};

    fn fresh() -> (&'static PageAllocator, &'static SlabAllocator) {
        let pa: &'static PageAllocator = Box::leak(Box::new(PageAllocator::new()));
        let slab: &'static SlabAllocator = Box::leak(Box::new(SlabAllocator::new()));
        let arena = Box::leak(vec![0u8; 64 * PAGE_SIZE].into_boxed_slice());
        unsafe { pa.init(arena.as_mut_ptr(), arena.len()) };
        slab.init(pa);
        (pa, slab)
    }

    #[test]
    fn classes_are_sorted_and_page_sized() {
        for w in CLASS_SIZES.windows(2) {
            assert!(w[0] < w[1]);
        }
        for &s in &CLASS_SIZES {
            // at least one object must fit behind the header
            assert!(first_offset(s) + s <= PAGE_SIZE, "class {s} cannot fit");
        }
    }

    #[test]
    fn alloc_respects_class_alignment() {
        let (_pa, slab) = fresh();
        for &s in &CLASS_SIZES {
            let align = class_align(s);
            for _ in 0..3 {
                let p = slab.alloc(s);
                assert_eq!(p as usize % align, 0, "class {s} misaligned");
            }
        }
    }

    #[test]
    fn fresh_objects_are_zeroed_and_distinct() {
        let (_pa, slab) = fresh();
        let mut seen = Vec::new();
        for _ in 0..100 {
            let p = slab.alloc(48);
            assert!(!seen.contains(&p));
            for i in 0..48 {
                assert_eq!(unsafe { p.add(i).read() }, 0);
            }
            unsafe { p.write_bytes(0xaa, 48) };
            seen.push(p);
        }
        let stats = slab.class_stats(SlabAllocator::class_for(48).unwrap());
        assert_eq!(stats.live, 100);
        for p in seen {
            unsafe { slab.free(p) };
        }
    }

    #[test]
    fn empty_pages_return_to_the_arena() {
        let (pa, slab) = fresh();
        let before = pa.outstanding();
        let ptrs: Vec<*mut u8> = (0..500).map(|_| slab.alloc(64)).collect();
        assert!(pa.outstanding() > before);
        for p in ptrs {
            unsafe { slab.free(p) };
        }
        assert_eq!(pa.outstanding(), before);
        let stats = slab.class_stats(SlabAllocator::class_for(64).unwrap());
        assert_eq!(stats.pages, 0);
        assert_eq!(stats.live, 0);
    }

    #[test]
    fn full_pages_rotate_back_on_free() {
        let (_pa, slab) = fresh();
        let class = SlabAllocator::class_for(1024).unwrap();
        // a 1024-byte class page holds 3 objects (first at offset 1024)
        let a = slab.alloc(1024);
        let b = slab.alloc(1024);
        let c = slab.alloc(1024);
        assert_eq!(slab.class_stats(class).pages, 1);
        let d = slab.alloc(1024);
        assert_eq!(slab.class_stats(class).pages, 2);
        unsafe { slab.free(b) };
        // the first page serves again before a third page is carved
        let e = slab.alloc(1024);
        assert_eq!(e, b);
        assert_eq!(slab.class_stats(class).pages, 2);
        for p in [a, c, d, e] {
            unsafe { slab.free(p) };
        }
    }

    #[test]
    fn oversized_request_is_fatal() {
        let (_pa, slab) = fresh();
        let hit = catch_unwind(AssertUnwindSafe(|| slab.alloc(2049)));
        assert!(hit.is_err());
    }

    #[test]
    fn misaligned_free_is_fatal() {
        let (_pa, slab) = fresh();
        let p = slab.alloc(64);
        let hit = catch_unwind(AssertUnwindSafe(|| unsafe { slab.free(p.add(1)) }));
        assert!(hit.is_err());
        unsafe { slab.free(p) };
    }

    #[test]
    fn cross_thread_churn_balances_out() {
        let (pa, slab) = fresh();
        let before = pa.outstanding();
        std::thread::scope(|s| {
            for t in 0..4 {
                s.spawn(move || {
                    let sizes = [2, 12, 48, 96, 320, 2048];
                    for round in 0..200 {
                        let size = sizes[(t + round) % sizes.len()];
                        let ptrs: Vec<*mut u8> = (0..8).map(|_| slab.alloc(size)).collect();
                        for p in ptrs {
                            unsafe { slab.free(p) };
                        }
                    }
                });
            }
        });
        assert_eq!(pa.outstanding(), before);
        for class in 0..CLASS_COUNT {
            assert_eq!(slab.class_stats(class).live, 0);
        }
    }
}
