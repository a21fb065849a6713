//! Sector device backing the filesystem.
//!
//! A RAM-backed virtual disk: 512-byte sectors, synchronous reads and
//! writes. `save` serializes the filesystem here; boot restores it when
//! the superblock magic checks out.

use super::ramfs::FS_MAGIC;
use crate::config::{DISK_SECTORS, SECTOR_SIZE};
use alloc::vec;
use alloc::vec::Vec;
use spin::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskError {
    OutOfRange,
    BadBuffer,
    TooLarge,
    Mismatch,
}

static DISK: Mutex<Option<Vec<u8>>> = Mutex::new(None);

/// Allocate the zero-filled disk.
pub fn init() {
    *DISK.lock() = Some(vec![0u8; DISK_SECTORS * SECTOR_SIZE]);
    log::info!(
        "ramdisk ready: {} sectors ({} KiB)",
        DISK_SECTORS,
        DISK_SECTORS * SECTOR_SIZE / 1024
    );
}

fn with_disk<R>(f: impl FnOnce(&mut Vec<u8>) -> R) -> R {
    let mut guard = DISK.lock();
    let disk = guard.as_mut().expect("ramdisk not initialised");
    f(disk)
}

/// Read one sector into `buf` (must be exactly one sector long).
pub fn read_sector(lba: u32, buf: &mut [u8]) -> Result<(), DiskError> {
    if buf.len() != SECTOR_SIZE {
        return Err(DiskError::BadBuffer);
    }
    if lba as usize >= DISK_SECTORS {
        return Err(DiskError::OutOfRange);
    }
    with_disk(|disk| {
        let start = lba as usize * SECTOR_SIZE;
        buf.copy_from_slice(&disk[start..start + SECTOR_SIZE]);
        Ok(())
    })
}

/// Write one sector from `buf` (must be exactly one sector long).
pub fn write_sector(lba: u32, buf: &[u8]) -> Result<(), DiskError> {
    if buf.len() != SECTOR_SIZE {
        return Err(DiskError::BadBuffer);
    }
    if lba as usize >= DISK_SECTORS {
        return Err(DiskError::OutOfRange);
    }
    with_disk(|disk| {
        let start = lba as usize * SECTOR_SIZE;
        disk[start..start + SECTOR_SIZE].copy_from_slice(buf);
        Ok(())
    })
}

/// Write a serialized filesystem image starting at LBA 0.
pub fn save_image(image: &[u8]) -> Result<(), DiskError> {
    if image.len() > DISK_SECTORS * SECTOR_SIZE {
        return Err(DiskError::TooLarge);
    }
    let mut sector = [0u8; SECTOR_SIZE];
    for (i, chunk) in image.chunks(SECTOR_SIZE).enumerate() {
        sector.fill(0);
        sector[..chunk.len()].copy_from_slice(chunk);
        write_sector(i as u32, &sector)?;
    }
    Ok(())
}

/// Read back a filesystem image, if the superblock looks valid.
pub fn load_image() -> Option<Vec<u8>> {
    let mut first = [0u8; SECTOR_SIZE];
    read_sector(0, &mut first).ok()?;

    let magic = u32::from_le_bytes(first[0..4].try_into().ok()?);
    if magic != FS_MAGIC {
        return None;
    }
    let total = u32::from_le_bytes(first[4..8].try_into().ok()?) as usize;
    if total < 12 || total > DISK_SECTORS * SECTOR_SIZE {
        return None;
    }

    let mut image = vec![0u8; total.div_ceil(SECTOR_SIZE) * SECTOR_SIZE];
    for (i, chunk) in image.chunks_mut(SECTOR_SIZE).enumerate() {
        read_sector(i as u32, chunk).ok()?;
    }
    image.truncate(total);
    Some(image)
}

/// Exercise the sector interface: write a pattern to the last sector,
/// read it back, then restore the original contents.
pub fn disk_test() -> Result<(), DiskError> {
    let lba = (DISK_SECTORS - 1) as u32;

    let mut saved = [0u8; SECTOR_SIZE];
    read_sector(lba, &mut saved)?;

    let mut pattern = [0u8; SECTOR_SIZE];
    for (i, byte) in pattern.iter_mut().enumerate() {
        *byte = (i % 251) as u8;
    }
    write_sector(lba, &pattern)?;

    let mut readback = [0u8; SECTOR_SIZE];
    read_sector(lba, &mut readback)?;

    write_sector(lba, &saved)?;

    if readback == pattern {
        Ok(())
    } else {
        Err(DiskError::Mismatch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // The disk is one global; tests share it under a lock.
    static TEST_LOCK: Mutex<()> = Mutex::new(());

    fn setup() -> spin::MutexGuard<'static, ()> {
        let guard = TEST_LOCK.lock();
        init();
        guard
    }

    #[test]
    fn test_sector_roundtrip() {
        let _guard = setup();
        let data = [0xABu8; SECTOR_SIZE];
        write_sector(7, &data).unwrap();
        let mut back = [0u8; SECTOR_SIZE];
        read_sector(7, &mut back).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn test_bounds() {
        let _guard = setup();
        let buf = [0u8; SECTOR_SIZE];
        assert_eq!(
            write_sector(DISK_SECTORS as u32, &buf),
            Err(DiskError::OutOfRange)
        );
        assert_eq!(write_sector(0, &buf[..10]), Err(DiskError::BadBuffer));
    }

    #[test]
    fn test_disk_test_passes() {
        let _guard = setup();
        assert_eq!(disk_test(), Ok(()));
    }

    #[test]
    fn test_image_roundtrip() {
        let _guard = setup();
        let mut image = Vec::new();
        image.extend_from_slice(&FS_MAGIC.to_le_bytes());
        image.extend_from_slice(&20u32.to_le_bytes());
        image.extend_from_slice(&0u32.to_le_bytes());
        image.extend_from_slice(b"padpadpa");
        save_image(&image).unwrap();
        let loaded = load_image().unwrap();
        assert_eq!(loaded, image);
    }
}
