//! GDT (Global Descriptor Table) and TSS initialization.
//!
//! Flat segmentation: every descriptor spans the whole 4 GiB address
//! space; the table exists to give the CPU ring-0 and ring-3 selectors
//! and a TSS for the privilege-stack switch.
//!
//! ## GDT Layout
//!
//! | Index | Byte Offset | Selector (RPL) | Description          |
//! |-------|-------------|----------------|----------------------|
//! |   0   |    0x00     |      —         | Null descriptor      |
//! |   1   |    0x08     |    0x08        | Kernel Code (Ring 0) |
//! |   2   |    0x10     |    0x10        | Kernel Data (Ring 0) |
//! |   3   |    0x18     |    0x1B        | User Code (Ring 3)   |
//! |   4   |    0x20     |    0x23        | User Data (Ring 3)   |
//! |   5   |    0x28     |    0x28        | TSS                  |

use bitflags::bitflags;
use core::arch::global_asm;
use core::mem::size_of;
use core::ptr::{addr_of, addr_of_mut};

/// Kernel code segment selector (Ring 0).
pub const KERNEL_CS: u16 = 0x08;

/// Kernel data segment selector (Ring 0).
pub const KERNEL_DS: u16 = 0x10;

/// User code segment selector (Ring 3).
/// GDT index 3, byte offset 0x18, RPL 3 → selector value 0x1B.
pub const USER_CS: u16 = 0x1B;

/// User data segment selector (Ring 3).
/// GDT index 4, byte offset 0x20, RPL 3 → selector value 0x23.
pub const USER_DS: u16 = 0x23;

/// TSS selector.
pub const TSS_SEL: u16 = 0x28;

bitflags! {
    /// Access byte of a segment descriptor.
    #[derive(Debug, Clone, Copy)]
    pub struct Access: u8 {
        const PRESENT    = 1 << 7;
        const RING_3     = 3 << 5;
        const SEGMENT    = 1 << 4;
        const EXECUTABLE = 1 << 3;
        const READ_WRITE = 1 << 1;
        const ACCESSED   = 1 << 0;
    }
}

impl Access {
    const KERNEL_CODE: Access = Access::PRESENT
        .union(Access::SEGMENT)
        .union(Access::EXECUTABLE)
        .union(Access::READ_WRITE);
    const KERNEL_DATA: Access = Access::PRESENT
        .union(Access::SEGMENT)
        .union(Access::READ_WRITE);
    const USER_CODE: Access = Access::KERNEL_CODE.union(Access::RING_3);
    const USER_DATA: Access = Access::KERNEL_DATA.union(Access::RING_3);
}

/// Granularity byte: 4 KiB granularity, 32-bit operand size, limit bits 16-19.
const GRAN_FLAT_32: u8 = 0xCF;

/// Access byte of an available 32-bit TSS descriptor.
const ACCESS_TSS: u8 = 0x89;

/// One 8-byte IA-32 segment descriptor.
#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
struct GdtEntry {
    limit_low: u16,
    base_low: u16,
    base_middle: u8,
    access: u8,
    granularity: u8,
    base_high: u8,
}

impl GdtEntry {
    const fn null() -> Self {
        GdtEntry {
            limit_low: 0,
            base_low: 0,
            base_middle: 0,
            access: 0,
            granularity: 0,
            base_high: 0,
        }
    }

    fn new(base: u32, limit: u32, access: u8, granularity: u8) -> Self {
        GdtEntry {
            limit_low: limit as u16,
            base_low: base as u16,
            base_middle: (base >> 16) as u8,
            access,
            granularity: ((limit >> 16) as u8 & 0x0F) | (granularity & 0xF0),
            base_high: (base >> 24) as u8,
        }
    }
}

/// 32-bit Task State Segment.
///
/// Only `ss0`/`esp0` matter: they name the stack the CPU switches to on
/// a ring 3 → ring 0 transition. The rest is hardware-task-switch
/// legacy this kernel never uses.
#[repr(C, packed)]
struct TaskStateSegment {
    prev_tss: u32,
    esp0: u32,
    ss0: u32,
    esp1: u32,
    ss1: u32,
    esp2: u32,
    ss2: u32,
    cr3: u32,
    eip: u32,
    eflags: u32,
    eax: u32,
    ecx: u32,
    edx: u32,
    ebx: u32,
    esp: u32,
    ebp: u32,
    esi: u32,
    edi: u32,
    es: u32,
    cs: u32,
    ss: u32,
    ds: u32,
    fs: u32,
    gs: u32,
    ldt: u32,
    trap: u16,
    iomap_base: u16,
}

impl TaskStateSegment {
    const fn new() -> Self {
        TaskStateSegment {
            prev_tss: 0,
            esp0: 0,
            ss0: 0,
            esp1: 0,
            ss1: 0,
            esp2: 0,
            ss2: 0,
            cr3: 0,
            eip: 0,
            eflags: 0,
            eax: 0,
            ecx: 0,
            edx: 0,
            ebx: 0,
            esp: 0,
            ebp: 0,
            esi: 0,
            edi: 0,
            es: 0,
            cs: 0,
            ss: 0,
            ds: 0,
            fs: 0,
            gs: 0,
            ldt: 0,
            trap: 0,
            iomap_base: size_of::<TaskStateSegment>() as u16,
        }
    }
}

/// Pointer structure for the LGDT instruction.
#[repr(C, packed)]
struct GdtPointer {
    limit: u16,
    base: u32,
}

// Loading a new GDT only takes effect once every segment register is
// reloaded; CS needs a far transfer, done here with the push/retf pair.
global_asm!(
    r#"
    .code32

    .global gdt_flush
gdt_flush:
    mov eax, [esp + 4]
    lgdt [eax]

    mov ax, 0x10                    # KERNEL_DS
    mov ds, ax
    mov es, ax
    mov fs, ax
    mov gs, ax
    mov ss, ax

    push 0x08                       # KERNEL_CS
    lea eax, [1f]
    push eax
    retf
1:
    ret

    .global tss_flush
tss_flush:
    mov ax, 0x28                    # TSS_SEL
    ltr ax
    ret
"#
);

extern "C" {
    fn gdt_flush(pointer: u32);
    fn tss_flush();
}

/// The table itself. Filled in by `init()` before it is loaded.
static mut GDT: [GdtEntry; 6] = [GdtEntry::null(); 6];

/// Task State Segment.
///
/// Mutable static so `esp0` can be updated when a new kernel stack
/// becomes active.
static mut TSS: TaskStateSegment = TaskStateSegment::new();

/// Build and load the GDT, reload all segment registers, load the TSS.
///
/// Must be called once, before the IDT is installed.
pub fn init() {
    unsafe {
        let tss_base = addr_of!(TSS) as u32;
        let tss_limit = size_of::<TaskStateSegment>() as u32 - 1;

        (*addr_of_mut!(TSS)).ss0 = KERNEL_DS as u32;
        (*addr_of_mut!(TSS)).esp0 = crate::config::BOOT_STACK_TOP;

        let gdt = &mut *addr_of_mut!(GDT);
        gdt[0] = GdtEntry::null();
        gdt[1] = GdtEntry::new(0, 0xFFFF_FFFF, Access::KERNEL_CODE.bits(), GRAN_FLAT_32);
        gdt[2] = GdtEntry::new(0, 0xFFFF_FFFF, Access::KERNEL_DATA.bits(), GRAN_FLAT_32);
        gdt[3] = GdtEntry::new(0, 0xFFFF_FFFF, Access::USER_CODE.bits(), GRAN_FLAT_32);
        gdt[4] = GdtEntry::new(0, 0xFFFF_FFFF, Access::USER_DATA.bits(), GRAN_FLAT_32);
        gdt[5] = GdtEntry::new(tss_base, tss_limit, ACCESS_TSS, 0x00);

        let pointer = GdtPointer {
            limit: (size_of::<[GdtEntry; 6]>() - 1) as u16,
            base: addr_of!(GDT) as u32,
        };

        gdt_flush(&pointer as *const GdtPointer as u32);
        tss_flush();
    }

    log::debug!("gdt loaded, tss at {:#x}", unsafe { addr_of!(TSS) as u32 });
}

/// Update the kernel stack the CPU lands on after a ring 3 → 0 switch.
///
/// Call whenever a new kernel stack becomes active for the running
/// program.
pub fn set_kernel_stack(ss: u16, esp: u32) {
    unsafe {
        (*addr_of_mut!(TSS)).ss0 = ss as u32;
        (*addr_of_mut!(TSS)).esp0 = esp;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_segment_selectors() {
        // User code: GDT index 3, RPL 3 → (3 << 3) | 3 = 0x1B
        assert_eq!(USER_CS, 0x1B);
        // User data: GDT index 4, RPL 3 → (4 << 3) | 3 = 0x23
        assert_eq!(USER_DS, 0x23);
    }

    #[test]
    fn test_kernel_segment_selectors() {
        assert_eq!(KERNEL_CS, 0x08);
        assert_eq!(KERNEL_DS, 0x10);
        assert_eq!(TSS_SEL, 0x28);
    }

    #[test]
    fn test_segment_rpl() {
        assert_eq!(USER_CS & 0x3, 3);
        assert_eq!(USER_DS & 0x3, 3);
        assert_eq!(KERNEL_CS & 0x3, 0);
        assert_eq!(KERNEL_DS & 0x3, 0);
    }

    #[test]
    fn test_access_bytes_match_ia32_encoding() {
        assert_eq!(Access::KERNEL_CODE.bits(), 0x9A);
        assert_eq!(Access::KERNEL_DATA.bits(), 0x92);
        assert_eq!(Access::USER_CODE.bits(), 0xFA);
        assert_eq!(Access::USER_DATA.bits(), 0xF2);
    }

    #[test]
    fn test_descriptor_packing() {
        let entry = GdtEntry::new(0, 0xFFFF_FFFF, Access::KERNEL_CODE.bits(), GRAN_FLAT_32);
        assert_eq!({ entry.limit_low }, 0xFFFF);
        assert_eq!({ entry.base_low }, 0);
        assert_eq!({ entry.base_middle }, 0);
        assert_eq!({ entry.access }, 0x9A);
        assert_eq!({ entry.granularity }, 0xCF);
        assert_eq!({ entry.base_high }, 0);

        let tss = GdtEntry::new(0x0012_3456, 103, ACCESS_TSS, 0x00);
        assert_eq!({ tss.base_low }, 0x3456);
        assert_eq!({ tss.base_middle }, 0x12);
        assert_eq!({ tss.base_high }, 0);
        assert_eq!({ tss.limit_low }, 103);
    }

    #[test]
    fn test_tss_layout() {
        // esp0/ss0 sit right after the previous-task link.
        assert_eq!(core::mem::size_of::<TaskStateSegment>(), 104);
        assert_eq!(core::mem::offset_of!(TaskStateSegment, esp0), 4);
        assert_eq!(core::mem::offset_of!(TaskStateSegment, ss0), 8);
    }
}
