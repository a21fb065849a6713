//! Serial port driver for diagnostic output.
//!
//! A minimal 16550 driver on COM1. The `log` facade (see `logger`) writes
//! here so kernel diagnostics survive even when the console is showing a
//! user program's output.

#![allow(dead_code)]

use crate::port::{inb, outb};
use core::fmt;
use spin::Mutex;

/// COM1 base address.
const COM1_BASE: u16 = 0x3F8;

/// Global serial port (COM1).
static SERIAL1: Mutex<Option<SerialPort>> = Mutex::new(None);

/// A 16550 UART at a fixed base port.
pub struct SerialPort {
    base: u16,
}

impl SerialPort {
    /// Program the UART: 38400 baud, 8N1, FIFOs on.
    fn init(base: u16) -> Self {
        unsafe {
            outb(base + 1, 0x00); // disable interrupts
            outb(base + 3, 0x80); // DLAB on
            outb(base + 0, 0x03); // divisor low (38400 baud)
            outb(base + 1, 0x00); // divisor high
            outb(base + 3, 0x03); // 8 bits, no parity, one stop
            outb(base + 2, 0xC7); // FIFO on, clear, 14-byte threshold
            outb(base + 4, 0x0B); // DTR + RTS + OUT2
        }
        SerialPort { base }
    }

    /// Transmit one byte, spinning until the holding register is empty.
    fn send(&mut self, byte: u8) {
        unsafe {
            while inb(self.base + 5) & 0x20 == 0 {
                core::hint::spin_loop();
            }
            outb(self.base, byte);
        }
    }

    /// Non-blocking receive: line status bit 0 gates data availability.
    fn try_recv(&mut self) -> Option<u8> {
        unsafe {
            if inb(self.base + 5) & 0x01 != 0 {
                Some(inb(self.base))
            } else {
                None
            }
        }
    }
}

impl fmt::Write for SerialPort {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            if byte == b'\n' {
                self.send(b'\r');
            }
            self.send(byte);
        }
        Ok(())
    }
}

/// Initialize COM1.
pub fn init() {
    *SERIAL1.lock() = Some(SerialPort::init(COM1_BASE));
}

/// Write a byte to COM1.
pub fn write_byte(byte: u8) {
    if let Some(ref mut serial) = *SERIAL1.lock() {
        serial.send(byte);
    }
}

/// Write a string to COM1.
pub fn write_str(s: &str) {
    use fmt::Write;
    if let Some(ref mut serial) = *SERIAL1.lock() {
        let _ = serial.write_str(s);
    }
}

/// Write formatted output to COM1.
pub fn write_fmt(args: fmt::Arguments) {
    use fmt::Write;
    if let Some(ref mut serial) = *SERIAL1.lock() {
        let _ = serial.write_fmt(args);
    }
}

/// Try to read a byte from COM1 (non-blocking).
pub fn try_read_byte() -> Option<u8> {
    if let Some(ref mut serial) = *SERIAL1.lock() {
        serial.try_recv()
    } else {
        None
    }
}
