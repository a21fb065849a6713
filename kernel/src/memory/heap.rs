//! Kernel heap: a first-fit allocator with block coalescing.
//!
//! An intrusive [`BlockHeader`] sits immediately before each payload.
//! The block list is address-ordered and partitions the heap window
//! exactly; `free` restores that invariant by merging with the free
//! successor and then the free predecessor.
//!
//! The same structure backs the `#[global_allocator]`: alignment beyond
//! the header's natural 4 bytes is handled by over-allocating and
//! stashing the raw block pointer just below the aligned payload.

#![allow(dead_code)]

use crate::config::{HEAP_SIZE, HEAP_START};
use core::alloc::{GlobalAlloc, Layout};
use core::mem::size_of;
use core::ptr;
use spin::Mutex;

/// Intrusive header preceding every payload.
#[repr(C)]
struct BlockHeader {
    /// Payload size in bytes (header excluded).
    size: usize,
    used: bool,
    next: *mut BlockHeader,
}

const HEADER_SIZE: usize = size_of::<BlockHeader>();

/// A block is split only when the remainder can hold a header plus a
/// minimal payload.
const SPLIT_SLACK: usize = 4;

/// First-fit allocator over a contiguous window.
pub struct FirstFitHeap {
    head: *mut BlockHeader,
    start: usize,
    size: usize,
}

// The raw pointers never leave the lock that guards the heap.
unsafe impl Send for FirstFitHeap {}

impl FirstFitHeap {
    pub const fn empty() -> Self {
        FirstFitHeap {
            head: ptr::null_mut(),
            start: 0,
            size: 0,
        }
    }

    /// Take ownership of `[start, start + size)` as one free block.
    ///
    /// # Safety
    ///
    /// The window must be writable, 4-byte aligned, and unused by
    /// anything else for the heap's lifetime.
    pub unsafe fn init(&mut self, start: *mut u8, size: usize) {
        let head = start as *mut BlockHeader;
        unsafe {
            (*head).size = size - HEADER_SIZE;
            (*head).used = false;
            (*head).next = ptr::null_mut();
        }
        self.head = head;
        self.start = start as usize;
        self.size = size;
    }

    /// First-fit allocation. Returns null on exhaustion.
    pub fn alloc(&mut self, size: usize) -> *mut u8 {
        if self.head.is_null() || size == 0 {
            return ptr::null_mut();
        }
        // Keep successor headers 4-byte aligned.
        let size = (size + 3) & !3;

        let mut current = self.head;
        while !current.is_null() {
            unsafe {
                if !(*current).used && (*current).size >= size {
                    (*current).used = true;

                    // Split when the surplus can carry another block.
                    if (*current).size > size + HEADER_SIZE + SPLIT_SLACK {
                        let remainder =
                            (current as usize + HEADER_SIZE + size) as *mut BlockHeader;
                        (*remainder).size = (*current).size - size - HEADER_SIZE;
                        (*remainder).used = false;
                        (*remainder).next = (*current).next;
                        (*current).size = size;
                        (*current).next = remainder;
                    }

                    return (current as *mut u8).add(HEADER_SIZE);
                }
                current = (*current).next;
            }
        }
        ptr::null_mut()
    }

    /// Free a payload pointer. Null is a no-op.
    pub fn free(&mut self, ptr_in: *mut u8) {
        if ptr_in.is_null() {
            return;
        }
        let block = (ptr_in as usize - HEADER_SIZE) as *mut BlockHeader;
        unsafe {
            (*block).used = false;

            // Coalesce with the successor.
            let next = (*block).next;
            if !next.is_null() && !(*next).used {
                (*block).size += HEADER_SIZE + (*next).size;
                (*block).next = (*next).next;
            }

            // Find the predecessor by a forward scan and coalesce.
            let mut prev = self.head;
            while !prev.is_null() && (*prev).next != block {
                prev = (*prev).next;
            }
            if !prev.is_null() && !(*prev).used {
                (*prev).size += HEADER_SIZE + (*block).size;
                (*prev).next = (*block).next;
            }
        }
    }

    /// Walk the block list: `(payload_addr, payload_size, used)`.
    fn walk(&self, mut f: impl FnMut(usize, usize, bool)) {
        let mut current = self.head;
        while !current.is_null() {
            unsafe {
                f(
                    current as usize + HEADER_SIZE,
                    (*current).size,
                    (*current).used,
                );
                current = (*current).next;
            }
        }
    }

    /// Check the structural invariant: blocks are address-ordered,
    /// non-overlapping, and partition the window exactly.
    pub fn verify(&self) -> bool {
        let mut cursor = self.start;
        let mut ok = true;
        self.walk(|addr, size, _| {
            if addr != cursor + HEADER_SIZE {
                ok = false;
            }
            cursor = addr + size;
        });
        ok && cursor == self.start + self.size
    }

    fn stats(&self) -> HeapStats {
        let mut used = 0;
        let mut free = 0;
        self.walk(|_, size, in_use| {
            if in_use {
                used += size;
            } else {
                free += size;
            }
        });
        HeapStats {
            total: self.size,
            used,
            free,
        }
    }

    #[cfg(test)]
    fn block_list(&self) -> alloc::vec::Vec<(usize, usize, bool)> {
        let mut list = alloc::vec::Vec::new();
        self.walk(|addr, size, used| list.push((addr, size, used)));
        list
    }
}

/// Heap usage statistics.
#[derive(Debug, Clone, Copy)]
pub struct HeapStats {
    /// Window size in bytes.
    pub total: usize,
    /// Bytes in used payloads.
    pub used: usize,
    /// Bytes in free payloads.
    pub free: usize,
}

/// Lock wrapper making the heap usable as the global allocator.
pub struct LockedHeap(Mutex<FirstFitHeap>);

impl LockedHeap {
    pub const fn empty() -> Self {
        LockedHeap(Mutex::new(FirstFitHeap::empty()))
    }
}

/// Global heap instance.
#[cfg_attr(not(test), global_allocator)]
static ALLOCATOR: LockedHeap = LockedHeap::empty();

unsafe impl GlobalAlloc for LockedHeap {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let align = layout.align().max(size_of::<usize>());
        let total = layout.size() + align + size_of::<usize>();

        let raw = self.0.lock().alloc(total);
        if raw.is_null() {
            return ptr::null_mut();
        }

        // Align past a slot that remembers the raw block pointer.
        let aligned = (raw as usize + size_of::<usize>() + align - 1) & !(align - 1);
        unsafe {
            *(aligned as *mut usize).sub(1) = raw as usize;
        }
        aligned as *mut u8
    }

    unsafe fn dealloc(&self, ptr_in: *mut u8, _layout: Layout) {
        if ptr_in.is_null() {
            return;
        }
        let raw = unsafe { *(ptr_in as *mut usize).sub(1) } as *mut u8;
        self.0.lock().free(raw);
    }
}

/// Hand the fixed heap window to the allocator. Called once at boot,
/// before anything allocates.
pub fn init_heap() {
    unsafe {
        ALLOCATOR.0.lock().init(HEAP_START as *mut u8, HEAP_SIZE);
    }
    log::info!(
        "heap ready: {:#x}..{:#x} ({} MiB)",
        HEAP_START,
        HEAP_START + HEAP_SIZE,
        HEAP_SIZE / (1024 * 1024)
    );
}

/// Raw allocation for the loader and mmap. Null on exhaustion.
pub fn kmalloc(size: usize) -> *mut u8 {
    ALLOCATOR.0.lock().alloc(size)
}

/// Raw free; accepts null.
pub fn kfree(ptr_in: *mut u8) {
    ALLOCATOR.0.lock().free(ptr_in);
}

/// Current heap usage.
pub fn stats() -> HeapStats {
    ALLOCATOR.0.lock().stats()
}

/// Allocation failure is unrecoverable for kernel objects; the loader
/// uses `kmalloc` directly and handles null itself.
#[cfg(not(test))]
#[alloc_error_handler]
fn alloc_error_handler(layout: Layout) -> ! {
    panic!("allocation error: {:?}", layout)
}

#[cfg(test)]
pub fn init_test_heap() {
    static ONCE: spin::Once<()> = spin::Once::new();
    ONCE.call_once(|| {
        let arena = alloc::vec![0u64; 1024 * 1024].leak();
        unsafe {
            ALLOCATOR
                .0
                .lock()
                .init(arena.as_mut_ptr() as *mut u8, arena.len() * 8);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_heap(f: impl FnOnce(&mut FirstFitHeap)) {
        let mut arena = alloc::vec![0u64; 8192];
        let mut heap = FirstFitHeap::empty();
        unsafe {
            heap.init(arena.as_mut_ptr() as *mut u8, arena.len() * 8);
        }
        f(&mut heap);
    }

    #[test]
    fn test_alloc_and_split() {
        with_heap(|heap| {
            let a = heap.alloc(64);
            assert!(!a.is_null());
            let b = heap.alloc(64);
            assert!(!b.is_null());
            // First fit hands out ascending addresses from a fresh heap.
            assert!((b as usize) > (a as usize));
            assert!(heap.verify());
        });
    }

    #[test]
    fn test_free_null_is_noop() {
        with_heap(|heap| {
            heap.free(core::ptr::null_mut());
            assert!(heap.verify());
        });
    }

    #[test]
    fn test_exhaustion_returns_null() {
        with_heap(|heap| {
            assert!(heap.alloc(usize::MAX / 2).is_null());
        });
    }

    #[test]
    fn test_alloc_free_restores_heap() {
        with_heap(|heap| {
            let before = heap.block_list();
            let a = heap.alloc(100);
            let b = heap.alloc(200);
            heap.free(a);
            heap.free(b);
            assert_eq!(heap.block_list(), before);
            assert!(heap.verify());
        });
    }

    #[test]
    fn test_coalesce_forward_and_backward() {
        with_heap(|heap| {
            let a = heap.alloc(64);
            let b = heap.alloc(64);
            // Pin the tail so the two blocks only merge with each other.
            let c = heap.alloc(64);
            heap.free(a);
            heap.free(b);
            let merged = heap
                .block_list()
                .into_iter()
                .find(|&(addr, _, used)| addr == a as usize && !used)
                .expect("merged block starts at the first payload");
            assert!(merged.1 >= 128 + HEADER_SIZE);
            heap.free(c);
            assert!(heap.verify());
        });
    }

    #[test]
    fn test_first_fit_reuses_earliest_hole() {
        with_heap(|heap| {
            let a = heap.alloc(64);
            let _b = heap.alloc(64);
            heap.free(a);
            let c = heap.alloc(32);
            assert_eq!(a as usize, c as usize);
        });
    }

    #[test]
    fn test_partition_is_exact_under_churn() {
        with_heap(|heap| {
            let mut live = alloc::vec::Vec::new();
            for i in 1..40usize {
                live.push(heap.alloc(i * 12));
            }
            for ptr_in in live.drain(..).step_by(2) {
                heap.free(ptr_in);
            }
            assert!(heap.verify());
        });
    }
}
