//! Boot console.
//!
//! Two backends behind one interface: the classic 80×25 VGA text buffer
//! at `0xB8000`, or, when the bootloader hands over a linear RGB
//! framebuffer, a pixel console drawing `font8x8` glyphs at 2× scale
//! (16-pixel cells). The shell, the syscall `write` path, and fault
//! reporting all print here through the `print!`/`println!` macros.

use crate::multiboot::Framebuffer;
use core::fmt;
use core::ptr;
use font8x8::{UnicodeFonts, BASIC_FONTS};
use spin::Mutex;

/// VGA text buffer physical address.
const VGA_TEXT_BUFFER: usize = 0xB8000;

/// Text-mode geometry.
const TEXT_COLS: usize = 80;
const TEXT_ROWS: usize = 25;

/// CRT controller ports for the hardware cursor.
const CRTC_INDEX: u16 = 0x3D4;
const CRTC_DATA: u16 = 0x3D5;

/// Glyph cell edge in framebuffer mode (8×8 font at 2× scale).
const CELL: usize = 16;

/// The 16 VGA colors, usable on both backends.
#[allow(dead_code)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Color {
    Black = 0x0,
    Blue = 0x1,
    Green = 0x2,
    Cyan = 0x3,
    Red = 0x4,
    Magenta = 0x5,
    Brown = 0x6,
    LightGrey = 0x7,
    DarkGrey = 0x8,
    LightBlue = 0x9,
    LightGreen = 0xA,
    LightCyan = 0xB,
    LightRed = 0xC,
    LightMagenta = 0xD,
    Yellow = 0xE,
    White = 0xF,
}

impl Color {
    /// Text-mode attribute byte (foreground on black).
    fn as_attr(self) -> u8 {
        self as u8
    }

    /// 0x00RRGGBB equivalent for the framebuffer backend.
    fn as_rgb(self) -> u32 {
        match self {
            Color::Black => 0x000000,
            Color::Blue => 0x0000AA,
            Color::Green => 0x00AA00,
            Color::Cyan => 0x00AAAA,
            Color::Red => 0xAA0000,
            Color::Magenta => 0xAA00AA,
            Color::Brown => 0xAA5500,
            Color::LightGrey => 0xAAAAAA,
            Color::DarkGrey => 0x555555,
            Color::LightBlue => 0x5555FF,
            Color::LightGreen => 0x55FF55,
            Color::LightCyan => 0x55FFFF,
            Color::LightRed => 0xFF5555,
            Color::LightMagenta => 0xFF55FF,
            Color::Yellow => 0xFFFF55,
            Color::White => 0xFFFFFF,
        }
    }
}

// ────────────────────────── Text backend ──────────────────────────

struct TextConsole {
    row: usize,
    col: usize,
}

impl TextConsole {
    fn cell_ptr(&self, row: usize, col: usize) -> *mut u16 {
        (VGA_TEXT_BUFFER + (row * TEXT_COLS + col) * 2) as *mut u16
    }

    fn put_at(&self, row: usize, col: usize, byte: u8, color: Color) {
        let cell = (color.as_attr() as u16) << 8 | byte as u16;
        unsafe { ptr::write_volatile(self.cell_ptr(row, col), cell) };
    }

    fn put_byte(&mut self, byte: u8, color: Color) {
        match byte {
            b'\n' => {
                self.col = 0;
                self.row += 1;
            }
            0x08 => {
                if self.col > 0 {
                    self.col -= 1;
                }
            }
            byte => {
                self.put_at(self.row, self.col, byte, color);
                self.col += 1;
                if self.col >= TEXT_COLS {
                    self.col = 0;
                    self.row += 1;
                }
            }
        }
        if self.row >= TEXT_ROWS {
            self.scroll();
            self.row = TEXT_ROWS - 1;
        }
        self.sync_cursor();
    }

    fn scroll(&mut self) {
        let buf = VGA_TEXT_BUFFER as *mut u16;
        unsafe {
            ptr::copy(buf.add(TEXT_COLS), buf, TEXT_COLS * (TEXT_ROWS - 1));
        }
        for col in 0..TEXT_COLS {
            self.put_at(TEXT_ROWS - 1, col, b' ', Color::LightGrey);
        }
    }

    fn clear(&mut self) {
        for row in 0..TEXT_ROWS {
            for col in 0..TEXT_COLS {
                self.put_at(row, col, b' ', Color::LightGrey);
            }
        }
        self.row = 0;
        self.col = 0;
        self.sync_cursor();
    }

    /// Move the blinking hardware cursor to the logical position.
    fn sync_cursor(&self) {
        let pos = (self.row * TEXT_COLS + self.col) as u16;
        unsafe {
            crate::port::outb(CRTC_INDEX, 14);
            crate::port::outb(CRTC_DATA, (pos >> 8) as u8);
            crate::port::outb(CRTC_INDEX, 15);
            crate::port::outb(CRTC_DATA, pos as u8);
        }
    }
}

// ────────────────────────── Framebuffer backend ──────────────────────────

struct PixelConsole {
    fb: Framebuffer,
    cols: usize,
    rows: usize,
    row: usize,
    col: usize,
}

impl PixelConsole {
    fn new(fb: Framebuffer) -> Self {
        let cols = fb.width as usize / CELL;
        let rows = fb.height as usize / CELL;
        PixelConsole {
            fb,
            cols,
            rows,
            row: 0,
            col: 0,
        }
    }

    #[inline]
    fn put_pixel(&self, x: usize, y: usize, rgb: u32) {
        if x >= self.fb.width as usize || y >= self.fb.height as usize {
            return;
        }
        let offset = y * self.fb.pitch as usize + x * 4;
        unsafe { ptr::write_volatile((self.fb.addr as usize + offset) as *mut u32, rgb) };
    }

    fn draw_glyph(&self, row: usize, col: usize, byte: u8, color: Color) {
        let glyph = match BASIC_FONTS.get(byte as char) {
            Some(glyph) => glyph,
            None => return,
        };
        let (fg, bg) = (color.as_rgb(), Color::Black.as_rgb());
        let (x0, y0) = (col * CELL, row * CELL);
        for (gy, row_bits) in glyph.iter().enumerate() {
            for gx in 0..8 {
                let rgb = if row_bits & (1 << gx) != 0 { fg } else { bg };
                for sy in 0..2 {
                    for sx in 0..2 {
                        self.put_pixel(x0 + gx * 2 + sx, y0 + gy * 2 + sy, rgb);
                    }
                }
            }
        }
    }

    fn put_byte(&mut self, byte: u8, color: Color) {
        match byte {
            b'\n' => {
                self.col = 0;
                self.row += 1;
            }
            0x08 => {
                if self.col > 0 {
                    self.col -= 1;
                }
            }
            byte => {
                self.draw_glyph(self.row, self.col, byte, color);
                self.col += 1;
                if self.col >= self.cols {
                    self.col = 0;
                    self.row += 1;
                }
            }
        }
        if self.row >= self.rows {
            self.scroll();
            self.row = self.rows - 1;
        }
    }

    fn scroll(&mut self) {
        let pitch = self.fb.pitch as usize;
        let base = self.fb.addr as usize as *mut u8;
        let visible = (self.rows * CELL) * pitch;
        let step = CELL * pitch;
        unsafe {
            ptr::copy(base.add(step), base, visible - step);
            ptr::write_bytes(base.add(visible - step), 0, step);
        }
    }

    fn clear(&mut self) {
        let bytes = self.fb.height as usize * self.fb.pitch as usize;
        unsafe { ptr::write_bytes(self.fb.addr as usize as *mut u8, 0, bytes) };
        self.row = 0;
        self.col = 0;
    }

    /// Blit RGBA32 pixels at a pixel position, clipped to the screen.
    fn draw_bitmap(&self, x: usize, y: usize, w: usize, h: usize, pixels: &[u32]) {
        for py in 0..h {
            for px in 0..w {
                if let Some(&rgb) = pixels.get(py * w + px) {
                    self.put_pixel(x + px, y + py, rgb);
                }
            }
        }
    }
}

// ────────────────────────── Shared front ──────────────────────────

enum Backend {
    Text(TextConsole),
    Pixel(PixelConsole),
}

pub struct Console {
    backend: Backend,
    color: Color,
}

impl Console {
    fn put_byte(&mut self, byte: u8) {
        let color = self.color;
        match &mut self.backend {
            Backend::Text(text) => text.put_byte(byte, color),
            Backend::Pixel(pixel) => pixel.put_byte(byte, color),
        }
    }
}

impl fmt::Write for Console {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            self.put_byte(byte);
        }
        Ok(())
    }
}

static CONSOLE: Mutex<Option<Console>> = Mutex::new(None);

/// Initialise the console, picking the framebuffer backend when the
/// bootloader reported a 32-bpp linear framebuffer.
pub fn init(fb: Option<Framebuffer>) {
    let backend = match fb {
        Some(fb) if fb.bpp == 32 => Backend::Pixel(PixelConsole::new(fb)),
        _ => Backend::Text(TextConsole { row: 0, col: 0 }),
    };
    *CONSOLE.lock() = Some(Console {
        backend,
        color: Color::LightGrey,
    });
}

/// Print a single byte in the current color.
pub fn putchar(byte: u8) {
    if let Some(ref mut console) = *CONSOLE.lock() {
        console.put_byte(byte);
    }
}

/// Print a string in a specific color, restoring the previous one.
pub fn print_colored(s: &str, color: Color) {
    if let Some(ref mut console) = *CONSOLE.lock() {
        let saved = console.color;
        console.color = color;
        for byte in s.bytes() {
            console.put_byte(byte);
        }
        console.color = saved;
    }
}

/// Clear the screen and home the cursor.
pub fn clear_screen() {
    if let Some(ref mut console) = *CONSOLE.lock() {
        match &mut console.backend {
            Backend::Text(text) => text.clear(),
            Backend::Pixel(pixel) => pixel.clear(),
        }
    }
}

/// Current cursor position as `(row, col)` in character cells.
pub fn cursor_pos() -> (usize, usize) {
    match *CONSOLE.lock() {
        Some(ref console) => match &console.backend {
            Backend::Text(text) => (text.row, text.col),
            Backend::Pixel(pixel) => (pixel.row, pixel.col),
        },
        None => (0, 0),
    }
}

/// Move the cursor to a character cell.
pub fn set_cursor_pos(row: usize, col: usize) {
    if let Some(ref mut console) = *CONSOLE.lock() {
        match &mut console.backend {
            Backend::Text(text) => {
                text.row = row.min(TEXT_ROWS - 1);
                text.col = col.min(TEXT_COLS - 1);
                text.sync_cursor();
            }
            Backend::Pixel(pixel) => {
                pixel.row = row.min(pixel.rows - 1);
                pixel.col = col.min(pixel.cols - 1);
            }
        }
    }
}

/// Pixel height of one text line (for banner placement).
pub fn line_height() -> usize {
    CELL
}

/// Framebuffer dimensions, if the pixel backend is active.
pub fn framebuffer_size() -> Option<(usize, usize)> {
    match *CONSOLE.lock() {
        Some(ref console) => match &console.backend {
            Backend::Pixel(pixel) => Some((pixel.fb.width as usize, pixel.fb.height as usize)),
            Backend::Text(_) => None,
        },
        None => None,
    }
}

/// Blit an RGBA32 bitmap. Returns false when only the text backend is up.
pub fn draw_bitmap(x: usize, y: usize, w: usize, h: usize, pixels: &[u32]) -> bool {
    match *CONSOLE.lock() {
        Some(ref console) => match &console.backend {
            Backend::Pixel(pixel) => {
                pixel.draw_bitmap(x, y, w, h, pixels);
                true
            }
            Backend::Text(_) => false,
        },
        None => false,
    }
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    use fmt::Write;
    if let Some(ref mut console) = *CONSOLE.lock() {
        let _ = console.write_fmt(args);
    }
}

/// Print to the console.
#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => ($crate::console::_print(format_args!($($arg)*)));
}

/// Print to the console with a trailing newline.
#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($($arg:tt)*) => ($crate::print!("{}\n", format_args!($($arg)*)));
}
