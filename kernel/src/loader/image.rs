//! ELF image placement.
//!
//! The whole `PT_LOAD` span `[minva_pg, maxva_pg)` becomes one
//! zero-filled kernel-heap allocation; each segment's file bytes land at
//! `base + (trunc_pg(p_vaddr) - minva) + (p_vaddr & page_mask)`. Because
//! the allocation replaces the requested virtual range wholesale,
//! `entry = base + (e_entry - minva)` holds uniformly for `ET_EXEC` and
//! `ET_DYN`; no relocations are applied.

#![allow(dead_code)]

use super::elf::{self, Elf32Phdr, ElfError, PT_LOAD};
use super::runner::LoadError;
use crate::config::PAGE_SIZE;
use crate::memory::{kfree, kmalloc};
use alloc::string::String;
use core::ptr;

/// Round an address down to its page start.
pub fn trunc_page(addr: u32) -> u32 {
    addr & !(PAGE_SIZE - 1)
}

/// Round an address up to the next page boundary.
pub fn round_page(addr: u32) -> u32 {
    (addr.wrapping_add(PAGE_SIZE - 1)) & !(PAGE_SIZE - 1)
}

/// Page-aligned `[minva, maxva)` span of the loadable segments.
pub fn load_span(phdrs: &[Elf32Phdr]) -> Result<(u32, u32), ElfError> {
    let mut minva = u32::MAX;
    let mut maxva = 0u32;
    for phdr in phdrs {
        if phdr.p_type != PT_LOAD {
            continue;
        }
        minva = minva.min(phdr.p_vaddr);
        maxva = maxva.max(phdr.p_vaddr.wrapping_add(phdr.p_memsz));
    }
    if maxva == 0 {
        return Err(ElfError::NoLoadableSegments);
    }
    Ok((trunc_page(minva), round_page(maxva)))
}

/// One loaded ELF image, owning its heap allocation.
pub struct LoadedImage {
    base: *mut u8,
    size: usize,
    /// Relocated entry point.
    pub entry: u32,
    /// Where the program header table landed (`base + e_phoff`).
    pub phdr_addr: u32,
    pub phnum: u16,
    pub phentsize: u16,
    /// `PT_INTERP` path, when the binary asks for an interpreter.
    pub interpreter: Option<String>,
}

// Owned heap pointer, only ever touched under the runner's control.
unsafe impl Send for LoadedImage {}

impl LoadedImage {
    /// Parse, place, and copy a binary into a fresh allocation.
    pub fn load(binary: &[u8]) -> Result<Self, LoadError> {
        let header = elf::parse_header(binary)?;
        let phdrs = elf::read_phdrs(binary, &header)?;
        let (minva, maxva) = load_span(&phdrs)?;
        let size = (maxva - minva) as usize;

        let base = kmalloc(size);
        if base.is_null() {
            return Err(LoadError::OutOfMemory);
        }
        unsafe { ptr::write_bytes(base, 0, size) };

        // From here the image owns the allocation; early returns free
        // it through Drop.
        let mut image = LoadedImage {
            base,
            size,
            entry: 0,
            phdr_addr: 0,
            phnum: header.e_phnum,
            phentsize: header.e_phentsize,
            interpreter: None,
        };

        for phdr in &phdrs {
            if phdr.p_type != PT_LOAD {
                continue;
            }
            let file_start = phdr.p_offset as usize;
            let file_len = phdr.p_filesz as usize;
            let bytes = binary
                .get(file_start..file_start + file_len)
                .ok_or(ElfError::SegmentOutOfBounds)?;

            let in_page = (phdr.p_vaddr & (PAGE_SIZE - 1)) as usize;
            let offset = (trunc_page(phdr.p_vaddr) - minva) as usize + in_page;
            if offset + file_len > size {
                return Err(ElfError::SegmentOutOfBounds.into());
            }
            unsafe {
                ptr::copy_nonoverlapping(bytes.as_ptr(), image.base.add(offset), file_len);
            }
            // The memsz − filesz tail is BSS; the allocation is already
            // zero-filled.
        }

        image.entry = image.base as u32 + (header.e_entry - minva);
        image.phdr_addr = image.base as u32 + header.e_phoff;
        image.interpreter = elf::find_interpreter(binary, &phdrs)?;

        log::debug!(
            "elf image: base {:#x} size {:#x} entry {:#x} (e_entry {:#x}, minva {:#x})",
            image.base as u32,
            image.size,
            image.entry,
            { header.e_entry },
            minva
        );
        Ok(image)
    }

    pub fn base_addr(&self) -> u32 {
        self.base as u32
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// The loaded bytes, for inspection.
    pub fn bytes(&self) -> &[u8] {
        unsafe { core::slice::from_raw_parts(self.base, self.size) }
    }
}

impl Drop for LoadedImage {
    fn drop(&mut self) {
        kfree(self.base);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::elf::test_support::minimal_elf;
    use crate::loader::elf::{ET_DYN, ET_EXEC};
    use crate::memory::heap::init_test_heap;

    #[test]
    fn test_load_span_page_aligned() {
        let elf_bytes = minimal_elf(ET_EXEC, 0x0804_8123, 0x0804_8150);
        let header = elf::parse_header(&elf_bytes).unwrap();
        let phdrs = elf::read_phdrs(&elf_bytes, &header).unwrap();
        let (minva, maxva) = load_span(&phdrs).unwrap();
        assert_eq!(minva, 0x0804_8000);
        assert_eq!(maxva, 0x0804_9000);
    }

    #[test]
    fn test_entry_identity_exec_and_dyn() {
        init_test_heap();
        for (e_type, vaddr) in [(ET_EXEC, 0x0804_8000), (ET_DYN, 0u32)] {
            let entry_va = vaddr + 0x94;
            let elf_bytes = minimal_elf(e_type, vaddr, entry_va);
            let image = LoadedImage::load(&elf_bytes).unwrap();
            // entry − base == e_entry − trunc_pg(minva), EXEC or DYN alike.
            assert_eq!(image.entry - image.base_addr(), entry_va - trunc_page(vaddr));
        }
    }

    #[test]
    fn test_segment_bytes_and_bss() {
        init_test_heap();
        let mut elf_bytes = minimal_elf(ET_EXEC, 0x0804_8000, 0x0804_8000);
        elf_bytes[0xF0] = 0xAA; // a recognizable byte inside p_filesz
        let image = LoadedImage::load(&elf_bytes).unwrap();

        assert_eq!(image.size(), 0x1000); // memsz 0x200 rounded to a page
        assert_eq!(image.bytes()[0xF0], 0xAA);
        // BSS tail (filesz 0x100 .. memsz 0x200) is zero.
        assert!(image.bytes()[0x100..0x200].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_unaligned_vaddr_lands_at_page_offset() {
        init_test_heap();
        let mut elf_bytes = minimal_elf(ET_EXEC, 0x0804_8000, 0x0804_8000);
        // Shift the segment to vaddr 0x08048040 (in-page offset 0x40).
        elf_bytes[60..64].copy_from_slice(&0x0804_8040u32.to_le_bytes());
        elf_bytes[0x10] = 0x77; // p_offset 0 → file byte 0x10
        let image = LoadedImage::load(&elf_bytes).unwrap();
        assert_eq!(image.bytes()[0x40 + 0x10], 0x77);
    }

    #[test]
    fn test_truncated_segment_rejected() {
        init_test_heap();
        let mut elf_bytes = minimal_elf(ET_EXEC, 0x0804_8000, 0x0804_8000);
        elf_bytes[68..72].copy_from_slice(&0x9999u32.to_le_bytes()); // p_filesz > file
        assert!(matches!(
            LoadedImage::load(&elf_bytes),
            Err(LoadError::BadElf(ElfError::SegmentOutOfBounds))
        ));
    }
}
