//! Multiboot2 header and 32-bit entry stub.
//!
//! GRUB loads the kernel at 1 MiB in protected mode with paging off and
//! interrupts disabled, leaving the magic in `eax` and the boot-info
//! pointer in `ebx`. The stub only has to stand up a stack and hand
//! both registers to `kernel_main`.

use core::arch::global_asm;

global_asm!(
    r#"
    .section .multiboot2, "a"
    .align 8
multiboot2_header:
    .long 0xE85250D6                            # magic
    .long 0                                     # architecture: i386
    .long 16                                    # header length
    .long 0x17ADAF1A                            # checksum: -(0xE85250D6 + 0 + 16) mod 2^32

    .section .boot.text, "ax"
    .code32
    .global _start
_start:
    cli
    cld

    # Kernel stack grows down from the 2 MiB mark, clear of the image.
    mov esp, {boot_stack_top}
    mov ebp, esp

    # kernel_main(mb_magic, mb_info)
    push ebx
    push eax
    call kernel_main

    # kernel_main never returns; halt hard if it somehow does.
1:
    cli
    hlt
    jmp 1b
"#,
    boot_stack_top = const crate::config::BOOT_STACK_TOP,
);
