//! Animated banner renderer.
//!
//! Frame files are raw RGBA32 with a 16-byte little-endian header
//! `{magic "BANN", width, height, delay_ms}`. Dimensions are clamped to
//! 640×480 and whole files to 1 MiB. Animation timing is driven by an
//! update-call counter rather than a time source, so the frame rate
//! tracks how often the caller spins.

use crate::vfs::ramfs;
use alloc::format;
use alloc::vec::Vec;

/// "BANN", little-endian.
pub const BANNER_MAGIC: u32 = 0x4E4E_4142;

/// Header bytes before the pixel data.
const HEADER_SIZE: usize = 16;

/// Dimension clamps.
const MAX_WIDTH: u32 = 640;
const MAX_HEIGHT: u32 = 480;

/// Whole-file bound.
const MAX_FILE_SIZE: usize = 1024 * 1024;

/// Update-calls per counted millisecond.
const TICKS_PER_MS: u32 = 7;

/// Most frames a single animation will hold.
pub const MAX_FRAMES: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BannerError {
    TooShort,
    BadMagic,
    /// Width/height beyond 640×480 or file beyond 1 MiB.
    TooLarge,
    /// Pixel data shorter than the header promises.
    Truncated,
}

/// One decoded frame.
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub delay_ms: u32,
    pub pixels: Vec<u32>,
}

/// Parse one frame file.
pub fn parse_frame(bytes: &[u8]) -> Result<Frame, BannerError> {
    if bytes.len() < HEADER_SIZE {
        return Err(BannerError::TooShort);
    }
    let word = |i: usize| u32::from_le_bytes(bytes[i..i + 4].try_into().unwrap());

    if word(0) != BANNER_MAGIC {
        return Err(BannerError::BadMagic);
    }
    let width = word(4);
    let height = word(8);
    let delay_ms = word(12);

    if width > MAX_WIDTH || height > MAX_HEIGHT {
        return Err(BannerError::TooLarge);
    }
    let pixel_count = (width * height) as usize;
    let expected = HEADER_SIZE + pixel_count * 4;
    if expected > MAX_FILE_SIZE {
        return Err(BannerError::TooLarge);
    }
    if bytes.len() < expected {
        return Err(BannerError::Truncated);
    }

    let mut pixels = Vec::with_capacity(pixel_count);
    for i in 0..pixel_count {
        pixels.push(u32::from_le_bytes(
            bytes[HEADER_SIZE + i * 4..HEADER_SIZE + i * 4 + 4]
                .try_into()
                .unwrap(),
        ));
    }

    Ok(Frame {
        width,
        height,
        delay_ms,
        pixels,
    })
}

/// Animation state.
pub struct Banner {
    frames: Vec<Frame>,
    current: usize,
    ticks: u32,
    last_advance_ms: u32,
    pub x: usize,
    pub y: usize,
    active: bool,
}

impl Banner {
    pub fn new(x: usize, y: usize) -> Self {
        Banner {
            frames: Vec::new(),
            current: 0,
            ticks: 0,
            last_advance_ms: 0,
            x,
            y,
            active: false,
        }
    }

    pub fn push_frame(&mut self, frame: Frame) {
        if self.frames.len() < MAX_FRAMES {
            self.frames.push(frame);
        }
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn frame_height(&self) -> usize {
        self.frames.first().map(|f| f.height as usize).unwrap_or(0)
    }

    pub fn set_active(&mut self, active: bool) {
        self.active = active;
        if active {
            self.ticks = 0;
            self.last_advance_ms = 0;
        }
    }

    /// Advance the tick counter; returns true when the frame changed.
    ///
    /// Deliberately counter-based: each call is worth 1/7 ms, so the
    /// animation speed is proportional to the caller's polling rate.
    pub fn update(&mut self) -> bool {
        if !self.active || self.frames.is_empty() {
            return false;
        }
        self.ticks += 1;
        let now_ms = self.ticks / TICKS_PER_MS;
        let delay = self.frames[self.current].delay_ms;
        if now_ms.saturating_sub(self.last_advance_ms) >= delay {
            self.current = (self.current + 1) % self.frames.len();
            self.last_advance_ms = now_ms;
            return true;
        }
        false
    }

    /// Blit the current frame. False when no framebuffer is available.
    pub fn draw(&self) -> bool {
        match self.frames.get(self.current) {
            Some(frame) => crate::console::draw_bitmap(
                self.x,
                self.y,
                frame.width as usize,
                frame.height as usize,
                &frame.pixels,
            ),
            None => false,
        }
    }
}

/// Load numbered frames from the filesystem: `/BANNER_<n>.BIN`, with
/// `/banner_frame_<nnn>.bin` as the fallback pattern. Stops at the
/// first index with neither.
pub fn load_frames(banner: &mut Banner) -> usize {
    let mut loaded = 0;
    for index in 0..MAX_FRAMES {
        let primary = format!("/BANNER_{}.BIN", index);
        let fallback = format!("/banner_frame_{:03}.bin", index);

        let bytes = ramfs::with_fs(|fs| {
            fs.read_file(&primary).or_else(|_| fs.read_file(&fallback))
        });
        let frame = match bytes.ok().and_then(|b| parse_frame(&b).ok()) {
            Some(frame) => frame,
            None => break,
        };
        banner.push_frame(frame);
        loaded += 1;
    }
    loaded
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    fn frame_bytes(width: u32, height: u32, delay: u32) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&BANNER_MAGIC.to_le_bytes());
        out.extend_from_slice(&width.to_le_bytes());
        out.extend_from_slice(&height.to_le_bytes());
        out.extend_from_slice(&delay.to_le_bytes());
        out.extend(core::iter::repeat(0xEEu8).take((width * height * 4) as usize));
        out
    }

    #[test]
    fn test_parse_valid_frame() {
        let frame = parse_frame(&frame_bytes(4, 2, 100)).unwrap();
        assert_eq!((frame.width, frame.height, frame.delay_ms), (4, 2, 100));
        assert_eq!(frame.pixels.len(), 8);
        assert_eq!(frame.pixels[0], 0xEEEE_EEEE);
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert_eq!(parse_frame(b"BANN"), Err(BannerError::TooShort));

        let mut bad = frame_bytes(2, 2, 0);
        bad[0] = b'X';
        assert_eq!(parse_frame(&bad), Err(BannerError::BadMagic));

        assert_eq!(
            parse_frame(&frame_bytes(MAX_WIDTH + 1, 1, 0)),
            Err(BannerError::TooLarge)
        );

        let mut short = frame_bytes(4, 4, 0);
        short.truncate(HEADER_SIZE + 3);
        assert_eq!(parse_frame(&short), Err(BannerError::Truncated));
    }

    #[test]
    fn test_file_size_clamp() {
        // 640×480 RGBA is over the 1 MiB file bound even though the
        // dimensions pass.
        let mut header = vec![];
        header.extend_from_slice(&BANNER_MAGIC.to_le_bytes());
        header.extend_from_slice(&640u32.to_le_bytes());
        header.extend_from_slice(&480u32.to_le_bytes());
        header.extend_from_slice(&0u32.to_le_bytes());
        assert_eq!(parse_frame(&header), Err(BannerError::TooLarge));
    }

    #[test]
    fn test_counter_driven_advance() {
        let mut banner = Banner::new(0, 0);
        banner.push_frame(parse_frame(&frame_bytes(1, 1, 1)).unwrap());
        banner.push_frame(parse_frame(&frame_bytes(1, 1, 1)).unwrap());
        banner.set_active(true);

        // 1 ms of delay needs TICKS_PER_MS calls to elapse.
        let mut advanced_at = None;
        for call in 1..=(TICKS_PER_MS * 2) {
            if banner.update() {
                advanced_at = Some(call);
                break;
            }
        }
        assert_eq!(advanced_at, Some(TICKS_PER_MS));
    }

    #[test]
    fn test_inactive_never_advances() {
        let mut banner = Banner::new(0, 0);
        banner.push_frame(parse_frame(&frame_bytes(1, 1, 0)).unwrap());
        for _ in 0..100 {
            assert!(!banner.update());
        }
    }
}
