//! Whole-page allocation from an intrusive free list.
//!
//! Every free page stores the pointer to the next free page in its first
//! word, so the allocator itself needs no storage beyond the list head.

use core::ptr;
use kernel_sync::SpinLock;

pub const PAGE_SIZE: usize = 4096;

struct FreePage {
    next: *mut FreePage,
}

struct PageList {
    head: *mut FreePage,
    free: usize,
    total: usize,
    base: usize,
    end: usize,
}

// Safety: raw pointers guarded by the SpinLock around PageList.
unsafe impl Send for PageList {}

/// Free-list allocator over one contiguous arena of 4 KiB pages.
pub struct PageAllocator {
    inner: SpinLock<PageList>,
}

impl Default for PageAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl PageAllocator {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            inner: SpinLock::new(PageList {
                head: ptr::null_mut(),
                free: 0,
                total: 0,
                base: 0,
                end: 0,
            }),
        }
    }

    /// Seed the free list from `[base, base + len)`. The range is trimmed
    /// inward to page boundaries.
    ///
    /// # Safety
    /// The range must be valid for reads and writes and owned by this
    /// allocator from now on. Must be called exactly once.
    pub unsafe fn init(&self, base: *mut u8, len: usize) {
        let start = (base as usize).next_multiple_of(PAGE_SIZE);
        let end = (base as usize + len) & !(PAGE_SIZE - 1);
        assert!(start < end, "arena smaller than one page");

        let mut inner = self.inner.lock();
        assert_eq!(inner.total, 0, "page allocator initialized twice");
        inner.base = start;
        inner.end = end;
        let mut page = start;
        while page < end {
            let fp = page as *mut FreePage;
            unsafe { (*fp).next = inner.head };
            inner.head = fp;
            inner.free += 1;
            inner.total += 1;
            page += PAGE_SIZE;
        }
    }

    /// One page, page-aligned, contents unspecified.
    ///
    /// # Panics
    /// When the arena is exhausted.
    pub fn alloc(&self) -> *mut u8 {
        let mut inner = self.inner.lock();
        assert!(inner.total > 0, "page allocator not initialized");
        let page = inner.head;
        if page.is_null() {
            log::error!("page arena exhausted, {} pages in use", inner.total);
            panic!("out of pages ({} in use)", inner.total);
        }
        // Safety: every list entry is a live page we own.
        inner.head = unsafe { (*page).next };
        inner.free -= 1;
        page.cast()
    }

    /// Return `page` to the free list.
    ///
    /// # Safety
    /// `page` must have come from [`alloc`](Self::alloc) on this allocator
    /// and must not be used afterwards.
    ///
    /// # Panics
    /// When `page` is misaligned or outside the arena.
    pub unsafe fn free(&self, page: *mut u8) {
        let addr = page as usize;
        assert_eq!(addr % PAGE_SIZE, 0, "freeing a misaligned page {page:p}");
        let mut inner = self.inner.lock();
        assert!(
            addr >= inner.base && addr < inner.end,
            "freeing a foreign page {page:p}"
        );
        let fp = page.cast::<FreePage>();
        unsafe { (*fp).next = inner.head };
        inner.head = fp;
        inner.free += 1;
    }

    /// Pages currently handed out.
    pub fn outstanding(&self) -> usize {
        let inner = self.inner.lock();
        inner.total - inner.free
    }

    pub fn free_pages(&self) -> usize {
        self.inner.lock().free
    }

    pub fn total_pages(&self) -> usize {
        self.inner.lock().total
    }
}
