//! Ferrite kernel.
//!
//! A 32-bit protected-mode kernel for the IA-32 PC platform, booted by
//! a Multiboot2 loader. It brings up a text/framebuffer console and a
//! polled keyboard, serves a small in-RAM filesystem, and can load and
//! execute ELF32 binaries speaking the Linux i386 `int 0x80` ABI,
//! returning to the shell cleanly whether the program exits or faults.
//!
//! # Boot Process
//!
//! 1. GRUB loads the image at 1 MiB and enters `_start` (`boot.rs`)
//! 2. Serial + logger, then the kernel heap
//! 3. GDT with TSS, then IDT with the PIC remapped and masked
//! 4. Console (VGA text or the bootloader's framebuffer)
//! 5. Filesystem, fd table, syscall layer
//! 6. Shell loop; `run <path>` hands control to the ELF runner

#![cfg_attr(not(test), no_std)]
#![cfg_attr(not(test), no_main)]
#![cfg_attr(not(test), feature(alloc_error_handler))]
#![deny(unsafe_op_in_unsafe_fn)]

extern crate alloc;

mod banner;
mod boot;
mod config;
mod console;
mod gdt;
mod interrupts;
mod keyboard;
mod loader;
mod logger;
mod memory;
mod multiboot;
mod panic;
mod port;
mod serial;
mod shell;
mod syscall;
mod vfs;

use console::Color;

/// Kernel entry point, called from the boot stub with the Multiboot2
/// registers.
#[no_mangle]
pub extern "C" fn kernel_main(mb_magic: u32, mb_info: u32) -> ! {
    serial::init();
    logger::init();
    log::info!("ferrite booting, multiboot magic {:#x}", mb_magic);

    // Heap first: everything else allocates.
    memory::init_heap();

    gdt::init();
    interrupts::init();

    console::init(multiboot::framebuffer(mb_magic, mb_info));
    console::clear_screen();
    console::print_colored("\n   Ferrite 0.1\n", Color::Cyan);
    console::print_colored("   IA-32 protected mode, Multiboot2\n\n", Color::LightGrey);

    boot_step("Memory manager", || {
        let stats = memory::stats();
        alloc::format!("{} MiB heap", stats.total / (1024 * 1024))
    });
    boot_step("Filesystem", || {
        vfs::init();
        let files = vfs::ramfs::with_fs(|fs| fs.list_all().len());
        alloc::format!("{} entries", files)
    });
    boot_step("Syscalls", || {
        syscall::init();
        alloc::string::String::from("int 0x80")
    });
    boot_step("Keyboard", || {
        keyboard::init();
        alloc::string::String::from("polled PS/2")
    });

    console::print_colored("\nFerrite started.\n", Color::Cyan);
    console::print_colored("Type 'help' for commands.\n\n", Color::LightGrey);

    // Ring 3 → 0 transitions must land on the live kernel stack.
    gdt::set_kernel_stack(gdt::KERNEL_DS, port::current_esp());

    shell::run();

    // The shell exited; idle until reset.
    log::info!("shell exited, idling");
    interrupts::hlt_loop()
}

/// One line of the boot report.
fn boot_step(name: &str, f: impl FnOnce() -> alloc::string::String) {
    crate::print!("[ ");
    console::print_colored("OK", Color::LightGreen);
    crate::print!(" ] {}: ", name);
    let detail = f();
    console::print_colored(&detail, Color::LightGrey);
    crate::println!();
}
