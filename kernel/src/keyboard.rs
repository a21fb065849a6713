//! Polled PS/2 keyboard driver.
//!
//! No IRQ: the shell (and the stdin syscall path) call [`poll`], which
//! drains the controller and decodes scancode set 1 through
//! `pc-keyboard`. Decoded bytes land in a small ring buffer; arrow and
//! delete keys travel in-band as the codes the line editor expects.

use crate::port::inb;
use lazy_static::lazy_static;
use pc_keyboard::{layouts, DecodedKey, HandleControl, KeyCode, Keyboard, ScancodeSet1};
use spin::Mutex;

/// PS/2 data port.
const PS2_DATA_PORT: u16 = 0x60;
/// PS/2 status/command port.
const PS2_STATUS_PORT: u16 = 0x64;

/// In-band code for the Up arrow.
pub const KEY_UP: u8 = 0x80;
/// In-band code for the Down arrow.
pub const KEY_DOWN: u8 = 0x81;
/// In-band code for Delete.
pub const KEY_DELETE: u8 = 0x7F;

const QUEUE_SIZE: usize = 256;

/// Fixed-size byte ring; overflow drops the newest key.
struct KeyQueue {
    buf: [u8; QUEUE_SIZE],
    head: usize,
    tail: usize,
}

impl KeyQueue {
    const fn new() -> Self {
        KeyQueue {
            buf: [0; QUEUE_SIZE],
            head: 0,
            tail: 0,
        }
    }

    fn push(&mut self, byte: u8) {
        let next = (self.head + 1) % QUEUE_SIZE;
        if next != self.tail {
            self.buf[self.head] = byte;
            self.head = next;
        }
    }

    fn pop(&mut self) -> Option<u8> {
        if self.head == self.tail {
            return None;
        }
        let byte = self.buf[self.tail];
        self.tail = (self.tail + 1) % QUEUE_SIZE;
        Some(byte)
    }
}

lazy_static! {
    static ref DECODER: Mutex<Keyboard<layouts::Us104Key, ScancodeSet1>> = Mutex::new(
        Keyboard::new(ScancodeSet1::new(), layouts::Us104Key, HandleControl::Ignore)
    );
}

static QUEUE: Mutex<KeyQueue> = Mutex::new(KeyQueue::new());

/// Flush anything pending in the controller's output buffer.
pub fn init() {
    unsafe {
        while inb(PS2_STATUS_PORT) & 0x01 != 0 {
            let _ = inb(PS2_DATA_PORT);
        }
    }
    log::debug!("keyboard: polled ps/2, set 1");
}

/// One controller poll; call freely from wait loops.
pub fn poll() {
    let scancode = unsafe {
        if inb(PS2_STATUS_PORT) & 0x01 == 0 {
            return;
        }
        inb(PS2_DATA_PORT)
    };
    if let Some(byte) = decode(scancode) {
        QUEUE.lock().push(byte);
    }
}

/// Next decoded byte, if any.
pub fn get_char() -> Option<u8> {
    QUEUE.lock().pop()
}

/// Feed one scancode through the set-1 decoder.
fn decode(scancode: u8) -> Option<u8> {
    let mut decoder = DECODER.lock();
    let event = decoder.add_byte(scancode).ok().flatten()?;
    match decoder.process_keyevent(event)? {
        DecodedKey::Unicode(c) if (c as u32) < 0x80 => Some(c as u8),
        DecodedKey::Unicode(_) => None,
        DecodedKey::RawKey(KeyCode::ArrowUp) => Some(KEY_UP),
        DecodedKey::RawKey(KeyCode::ArrowDown) => Some(KEY_DOWN),
        DecodedKey::RawKey(KeyCode::Delete) => Some(KEY_DELETE),
        DecodedKey::RawKey(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_fifo() {
        let mut queue = KeyQueue::new();
        queue.push(b'a');
        queue.push(b'b');
        assert_eq!(queue.pop(), Some(b'a'));
        assert_eq!(queue.pop(), Some(b'b'));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_queue_drops_on_overflow() {
        let mut queue = KeyQueue::new();
        for i in 0..(QUEUE_SIZE as u32 + 10) {
            queue.push(i as u8);
        }
        let mut drained = 0;
        while queue.pop().is_some() {
            drained += 1;
        }
        assert_eq!(drained, QUEUE_SIZE - 1);
    }

    #[test]
    fn test_decode_letters_and_arrows() {
        // 'a' press (set 1 scancode 0x1E).
        assert_eq!(decode(0x1E), Some(b'a'));
        let _ = decode(0x9E); // release

        // Extended Up arrow: E0 48 press.
        assert_eq!(decode(0xE0), None);
        assert_eq!(decode(0x48), Some(KEY_UP));
        let _ = decode(0xE0);
        let _ = decode(0xC8);

        // Extended Delete: E0 53.
        assert_eq!(decode(0xE0), None);
        assert_eq!(decode(0x53), Some(KEY_DELETE));
    }
}
