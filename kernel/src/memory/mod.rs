//! Memory management.
//!
//! One allocator serves everything: kernel objects through the global
//! allocator, and raw `kmalloc`/`kfree` for the ELF loader and the
//! mmap/munmap syscalls.

pub mod heap;

pub use heap::{init_heap, kfree, kmalloc, stats, HeapStats};
