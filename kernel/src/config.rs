//! Fixed physical memory map and table sizes.
//!
//! Everything runs identity-mapped in a flat 32-bit address space, so
//! these constants *are* the memory layout:
//!
//! | Range                         | Use                               |
//! |-------------------------------|-----------------------------------|
//! | `0x0010_0000` (1 MiB)         | Kernel image (Multiboot2 load)    |
//! | `0x0020_0000` (2 MiB)         | Boot/kernel stack top, grows down |
//! | `0x0050_0000` (5 MiB)         | Initial user program break        |
//! | `0x0080_0000`–`0x0090_0000`   | User program stack window         |
//! | `0x0100_0000`–`0x0500_0000`   | Kernel heap                       |

/// Top of the boot-time kernel stack (grows down toward the kernel image).
pub const BOOT_STACK_TOP: u32 = 0x0020_0000;

/// Kernel heap window start (16 MiB).
pub const HEAP_START: usize = 0x0100_0000;

/// Kernel heap window size (64 MiB).
pub const HEAP_SIZE: usize = 0x0400_0000;

/// Bottom of the fixed user-program stack window.
pub const USER_STACK_BASE: u32 = 0x0080_0000;

/// Size of the user stack window (1 MiB).
pub const USER_STACK_SIZE: u32 = 0x0010_0000;

/// Initial `brk` value handed to user programs.
pub const USER_BREAK_BASE: u32 = 0x0050_0000;

/// Lowest address a user pointer may carry; anything below is `-EFAULT`.
pub const USER_PTR_MIN: u32 = 0x1000;

/// Page size used by the ELF loader for segment placement.
pub const PAGE_SIZE: u32 = 4096;

/// File-descriptor table size (0/1/2 reserved for stdio).
pub const MAX_FDS: usize = 256;

/// Shell history ring length.
pub const HISTORY_MAX: usize = 16;

/// RAM-disk geometry: 512-byte sectors, 2 MiB total.
pub const SECTOR_SIZE: usize = 512;
pub const DISK_SECTORS: usize = 4096;
