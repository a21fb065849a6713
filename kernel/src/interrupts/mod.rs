//! Interrupt handling subsystem.
//!
//! Assembly stubs push the vector number (and a zero error code where
//! the CPU supplies none), save the register file, and call the central
//! dispatcher with a pointer to the resulting [`InterruptFrame`]. The
//! dispatcher picks one of three paths:
//!
//! 1. vector 0x80: the Linux-style syscall front-end;
//! 2. vector <= 31 with a user program live: fault recovery, rewriting
//!    the frame's return `eip` so `iret` lands in the fault trampoline;
//! 3. vector <= 31 otherwise: a kernel fault, which is fatal.
//!
//! The dispatcher never touches `esp` while on the interrupt frame; the
//! only redirection mechanism is the return-`eip` rewrite, so `iret`
//! restores `eflags`/`cs` (and on a ring switch `ss:esp`) atomically.

mod idt;
pub mod pic;

use crate::gdt;
use crate::loader::runner;
use crate::loader::trampoline;
use crate::syscall;
use core::arch::{asm, global_asm};
use core::ptr::{addr_of, addr_of_mut};
use idt::{GateOptions, IdtEntry, IdtPointer};

/// Software interrupt vector for system calls.
pub const SYSCALL_VECTOR: u32 = 0x80;

/// Register frame built by the stubs, low address first.
///
/// `pusha` lays down `edi..eax`, the stub adds the saved `ds` and the
/// vector/error pair, and the CPU's own pushes follow. On a ring switch
/// the CPU additionally pushes `user_esp`/`user_ss` after `eflags`;
/// those slots are absent for same-ring entries and must not be touched.
#[derive(Debug)]
#[repr(C)]
pub struct InterruptFrame {
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    pub esp_dummy: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,
    pub ds: u32,
    pub int_no: u32,
    pub err_code: u32,
    pub eip: u32,
    pub cs: u32,
    pub eflags: u32,
}

impl InterruptFrame {
    /// The address `iret` will resume at.
    pub fn return_eip(&self) -> u32 {
        self.eip
    }

    /// Redirect `iret` to a different resumption point.
    ///
    /// This is the only sanctioned way to leave the interrupt context
    /// early: the stack restoration happens in the trampoline the new
    /// `eip` points at, never here.
    pub fn set_return_eip(&mut self, eip: u32) {
        self.eip = eip;
    }
}

// Exception and IRQ stubs. Vectors 8, 10-14 and 17 get a CPU-pushed
// error code; everything else pushes a zero placeholder so the frame
// layout is uniform.
global_asm!(
    r#"
    .code32

    .macro isr_noerr num
    .global isr\num
isr\num\():
    push 0
    push \num
    jmp isr_common
    .endm

    .macro isr_err num
    .global isr\num
isr\num\():
    push \num
    jmp isr_common
    .endm

    isr_noerr 0
    isr_noerr 1
    isr_noerr 2
    isr_noerr 3
    isr_noerr 4
    isr_noerr 5
    isr_noerr 6
    isr_noerr 7
    isr_err   8
    isr_noerr 9
    isr_err   10
    isr_err   11
    isr_err   12
    isr_err   13
    isr_err   14
    isr_noerr 15
    isr_noerr 16
    isr_err   17
    isr_noerr 18
    isr_noerr 19
    isr_noerr 20
    isr_noerr 21
    isr_noerr 22
    isr_noerr 23
    isr_noerr 24
    isr_noerr 25
    isr_noerr 26
    isr_noerr 27
    isr_noerr 28
    isr_noerr 29
    isr_noerr 30
    isr_noerr 31
    isr_noerr 32
    isr_noerr 33
    isr_noerr 34
    isr_noerr 35
    isr_noerr 36
    isr_noerr 37
    isr_noerr 38
    isr_noerr 39
    isr_noerr 40
    isr_noerr 41
    isr_noerr 42
    isr_noerr 43
    isr_noerr 44
    isr_noerr 45
    isr_noerr 46
    isr_noerr 47
    isr_noerr 128

    .global isr_default
isr_default:
    push 0
    push 255
    jmp isr_common

isr_common:
    push ds
    pusha
    mov ax, 0x10
    mov ds, ax
    mov es, ax
    mov fs, ax
    mov gs, ax
    push esp
    call isr_handler
    add esp, 4
    popa
    pop ds
    add esp, 8
    iretd

    .section .rodata
    .align 4
    .global isr_stub_table
isr_stub_table:
    .long isr0,  isr1,  isr2,  isr3,  isr4,  isr5,  isr6,  isr7
    .long isr8,  isr9,  isr10, isr11, isr12, isr13, isr14, isr15
    .long isr16, isr17, isr18, isr19, isr20, isr21, isr22, isr23
    .long isr24, isr25, isr26, isr27, isr28, isr29, isr30, isr31
    .long isr32, isr33, isr34, isr35, isr36, isr37, isr38, isr39
    .long isr40, isr41, isr42, isr43, isr44, isr45, isr46, isr47
    .text
"#
);

extern "C" {
    static isr_stub_table: [u32; 48];
    fn isr128();
    fn isr_default();
}

/// The table itself; built by `init()` before `lidt`.
static mut IDT: [IdtEntry; 256] = [IdtEntry::missing(); 256];

/// Install all 256 gates, remap the PIC, and enable interrupts.
///
/// Every IRQ line stays masked; the only expected entries are
/// `int 0x80` and CPU exceptions.
pub fn init() {
    unsafe {
        let default_gate = IdtEntry::new(
            isr_default as usize as u32,
            gdt::KERNEL_CS,
            GateOptions::kernel_gate(),
        );
        let idt = &mut *addr_of_mut!(IDT);
        for entry in idt.iter_mut() {
            *entry = default_gate;
        }

        let stubs = &*addr_of!(isr_stub_table);
        for (vector, &stub) in stubs.iter().enumerate() {
            idt[vector] = IdtEntry::new(stub, gdt::KERNEL_CS, GateOptions::kernel_gate());
        }

        // int 0x80 must be reachable from ring 3.
        idt[SYSCALL_VECTOR as usize] = IdtEntry::new(
            isr128 as usize as u32,
            gdt::KERNEL_CS,
            GateOptions::user_gate(),
        );

        let pointer = IdtPointer::new(addr_of!(IDT) as u32, 256);
        pointer.load();
    }

    pic::init();
    crate::port::enable_interrupts();
    log::debug!("idt installed, pic remapped to {:#x}/{:#x}", pic::PIC1_OFFSET, pic::PIC2_OFFSET);
}

/// Human-readable CPU exception names, indexed by vector.
const EXCEPTION_NAMES: [&str; 32] = [
    "divide error",
    "debug",
    "non-maskable interrupt",
    "breakpoint",
    "overflow",
    "bound range exceeded",
    "invalid opcode",
    "device not available",
    "double fault",
    "coprocessor segment overrun",
    "invalid TSS",
    "segment not present",
    "stack-segment fault",
    "general protection fault",
    "page fault",
    "reserved",
    "x87 floating-point error",
    "alignment check",
    "machine check",
    "SIMD floating-point error",
    "virtualization error",
    "control protection",
    "reserved",
    "reserved",
    "reserved",
    "reserved",
    "reserved",
    "reserved",
    "reserved",
    "reserved",
    "reserved",
    "reserved",
];

/// Central interrupt dispatcher, called from the assembly stubs.
#[no_mangle]
extern "C" fn isr_handler(frame: &mut InterruptFrame) {
    match frame.int_no {
        SYSCALL_VECTOR => {
            let result = syscall::dispatch(
                frame.eax, frame.ebx, frame.ecx, frame.edx, frame.esi, frame.edi, frame.ebp,
            );
            frame.eax = result as u32;

            // exit/exit_group raise the flag instead of unwinding; the
            // iret below must land in the exit trampoline, which swaps
            // back to the kernel stack saved at launch.
            let state = runner::state();
            if state.take_exit_request() && state.is_live() {
                state.stage_exit();
                frame.set_return_eip(trampoline::exit_trampoline_addr());
            }
        }
        vector @ 0..=31 => {
            let state = runner::state();
            if state.is_live() {
                crate::console::print_colored("\n", crate::console::Color::LightRed);
                crate::print!("fault {} ", vector);
                crate::console::print_colored(
                    "in user program, returning to shell\n",
                    crate::console::Color::LightRed,
                );
                log::error!(
                    "fault {} ({}) at eip {:#x}, err {:#x}",
                    vector,
                    EXCEPTION_NAMES[vector as usize],
                    frame.return_eip(),
                    frame.err_code
                );
                state.stage_exit();
                frame.set_return_eip(trampoline::fault_trampoline_addr());
            } else {
                fatal_exception(vector, frame);
            }
        }
        vector @ 0x20..=0x2F => {
            // Masked in normal operation; a spurious line still needs
            // its EOI.
            pic::end_of_interrupt(vector as u8);
        }
        _ => {}
    }
}

/// A CPU exception with no user program live: nothing to recover.
fn fatal_exception(vector: u32, frame: &InterruptFrame) -> ! {
    log::error!(
        "kernel fault {} ({}) at {:#x}:{:#x}, err {:#x}, eflags {:#x}",
        vector,
        EXCEPTION_NAMES[vector as usize],
        frame.cs,
        frame.return_eip(),
        frame.err_code,
        frame.eflags
    );
    crate::console::print_colored("\nKERNEL FAULT: ", crate::console::Color::LightRed);
    crate::println!(
        "{} (vector {}) at {:#x}, halting",
        EXCEPTION_NAMES[vector as usize],
        vector,
        frame.return_eip()
    );
    hlt_loop()
}

/// Halt forever with interrupts off.
pub fn hlt_loop() -> ! {
    loop {
        unsafe {
            asm!("cli; hlt", options(nomem, nostack));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_layout_matches_stub_push_order() {
        assert_eq!(core::mem::offset_of!(InterruptFrame, edi), 0);
        assert_eq!(core::mem::offset_of!(InterruptFrame, eax), 28);
        assert_eq!(core::mem::offset_of!(InterruptFrame, ds), 32);
        assert_eq!(core::mem::offset_of!(InterruptFrame, int_no), 36);
        assert_eq!(core::mem::offset_of!(InterruptFrame, err_code), 40);
        assert_eq!(core::mem::offset_of!(InterruptFrame, eip), 44);
    }

    #[test]
    fn test_return_eip_rewrite() {
        let mut frame = InterruptFrame {
            edi: 0,
            esi: 0,
            ebp: 0,
            esp_dummy: 0,
            ebx: 0,
            edx: 0,
            ecx: 0,
            eax: 0,
            ds: 0x10,
            int_no: 0,
            err_code: 0,
            eip: 0x0804_8000,
            cs: 0x08,
            eflags: 0x202,
        };
        frame.set_return_eip(0xC0DE);
        assert_eq!(frame.return_eip(), 0xC0DE);
        // Only the eip slot moves; the iret tail stays untouched.
        assert_eq!(frame.cs, 0x08);
        assert_eq!(frame.eflags, 0x202);
    }
}
