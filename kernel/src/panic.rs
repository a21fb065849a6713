//! Panic handler.
//!
//! A kernel panic is the fatal error class: report on both the serial
//! log and the console, then halt.

use core::panic::PanicInfo;

#[cfg(not(test))]
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    log::error!("KERNEL PANIC: {}", info);

    crate::console::print_colored("\nKERNEL PANIC: ", crate::console::Color::LightRed);
    if let Some(location) = info.location() {
        crate::println!("{} at {}:{}", info.message(), location.file(), location.line());
    } else {
        crate::println!("{}", info.message());
    }

    crate::interrupts::hlt_loop()
}
