//! ELF32 parsing and validation.
//!
//! Accepts little-endian ELF32 for i386, `ET_EXEC` or `ET_DYN`.
//! Section headers, relocations and `PT_DYNAMIC` are ignored; the
//! image loader places `PT_LOAD` segments and honors `PT_INTERP`.

#![allow(dead_code)]

use alloc::string::String;
use alloc::vec::Vec;
use bitflags::bitflags;
use core::mem::size_of;

/// ELF magic number: 0x7F 'E' 'L' 'F'
pub const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];

/// ELF class: 32-bit
pub const ELFCLASS32: u8 = 1;

/// ELF data encoding: little endian
pub const ELFDATA2LSB: u8 = 1;

/// ELF version: current
pub const EV_CURRENT: u8 = 1;

/// ELF type: executable
pub const ET_EXEC: u16 = 2;

/// ELF type: shared object (PIE)
pub const ET_DYN: u16 = 3;

/// Machine type: Intel 80386
pub const EM_386: u16 = 3;

/// Program header type: loadable segment
pub const PT_LOAD: u32 = 1;

/// Program header type: interpreter path
pub const PT_INTERP: u32 = 3;

bitflags! {
    /// Segment permission flags. Accepted but not enforced: the loaded
    /// image lives in kernel-reachable memory, writable and executable.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SegmentFlags: u32 {
        const EXECUTE = 1;
        const WRITE   = 2;
        const READ    = 4;
    }
}

/// ELF32 file header.
#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
pub struct Elf32Ehdr {
    /// Magic number and other info
    pub e_ident: [u8; 16],
    /// Object file type
    pub e_type: u16,
    /// Machine type
    pub e_machine: u16,
    /// Object file version
    pub e_version: u32,
    /// Entry point virtual address
    pub e_entry: u32,
    /// Program header table file offset
    pub e_phoff: u32,
    /// Section header table file offset
    pub e_shoff: u32,
    /// Processor-specific flags
    pub e_flags: u32,
    /// ELF header size
    pub e_ehsize: u16,
    /// Program header table entry size
    pub e_phentsize: u16,
    /// Program header table entry count
    pub e_phnum: u16,
    /// Section header table entry size
    pub e_shentsize: u16,
    /// Section header table entry count
    pub e_shnum: u16,
    /// Section name string table index
    pub e_shstrndx: u16,
}

/// ELF32 program header.
#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
pub struct Elf32Phdr {
    /// Segment type
    pub p_type: u32,
    /// Segment file offset
    pub p_offset: u32,
    /// Segment virtual address
    pub p_vaddr: u32,
    /// Segment physical address (unused)
    pub p_paddr: u32,
    /// Segment size in file
    pub p_filesz: u32,
    /// Segment size in memory
    pub p_memsz: u32,
    /// Segment flags
    pub p_flags: u32,
    /// Segment alignment
    pub p_align: u32,
}

/// ELF validation errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfError {
    /// Binary too small to contain an ELF header
    TooSmall,
    /// Invalid ELF magic number
    BadMagic,
    /// Not 32-bit
    BadClass,
    /// Not little endian
    BadEncoding,
    /// Not EV_CURRENT
    BadVersion,
    /// Not ET_EXEC / ET_DYN
    BadType,
    /// Not EM_386
    BadMachine,
    /// phentsize does not match Elf32Phdr
    BadPhentsize,
    /// Program header table outside the file
    PhdrOutOfBounds,
    /// Segment file range outside the file
    SegmentOutOfBounds,
    /// No PT_LOAD segments
    NoLoadableSegments,
    /// PT_INTERP path malformed
    BadInterpreter,
}

/// Parse and validate the file header.
pub fn parse_header(binary: &[u8]) -> Result<Elf32Ehdr, ElfError> {
    if binary.len() < size_of::<Elf32Ehdr>() {
        return Err(ElfError::TooSmall);
    }

    // SAFETY: length checked above; Elf32Ehdr is repr(C, packed).
    let header: Elf32Ehdr =
        unsafe { core::ptr::read_unaligned(binary.as_ptr() as *const Elf32Ehdr) };

    if header.e_ident[0..4] != ELF_MAGIC {
        return Err(ElfError::BadMagic);
    }
    if header.e_ident[4] != ELFCLASS32 {
        return Err(ElfError::BadClass);
    }
    if header.e_ident[5] != ELFDATA2LSB {
        return Err(ElfError::BadEncoding);
    }
    if header.e_ident[6] != EV_CURRENT {
        return Err(ElfError::BadVersion);
    }
    if header.e_type != ET_EXEC && header.e_type != ET_DYN {
        return Err(ElfError::BadType);
    }
    if header.e_machine != EM_386 {
        return Err(ElfError::BadMachine);
    }
    if header.e_phentsize as usize != size_of::<Elf32Phdr>() {
        return Err(ElfError::BadPhentsize);
    }

    Ok(header)
}

/// Read the program header table (`e_phnum × e_phentsize` bytes).
pub fn read_phdrs(binary: &[u8], header: &Elf32Ehdr) -> Result<Vec<Elf32Phdr>, ElfError> {
    let phoff = header.e_phoff as usize;
    let phentsize = header.e_phentsize as usize;
    let phnum = header.e_phnum as usize;

    let table_end = phoff
        .checked_add(phnum.checked_mul(phentsize).ok_or(ElfError::PhdrOutOfBounds)?)
        .ok_or(ElfError::PhdrOutOfBounds)?;
    if table_end > binary.len() {
        return Err(ElfError::PhdrOutOfBounds);
    }

    let mut phdrs = Vec::with_capacity(phnum);
    for i in 0..phnum {
        // SAFETY: bounds validated above.
        let phdr: Elf32Phdr = unsafe {
            core::ptr::read_unaligned(binary.as_ptr().add(phoff + i * phentsize) as *const Elf32Phdr)
        };
        phdrs.push(phdr);
    }
    Ok(phdrs)
}

/// Extract the `PT_INTERP` path, if the binary requests an interpreter.
pub fn find_interpreter(
    binary: &[u8],
    phdrs: &[Elf32Phdr],
) -> Result<Option<String>, ElfError> {
    for phdr in phdrs {
        if phdr.p_type != PT_INTERP {
            continue;
        }
        let offset = phdr.p_offset as usize;
        let size = phdr.p_filesz as usize;
        let bytes = binary
            .get(offset..offset + size)
            .ok_or(ElfError::SegmentOutOfBounds)?;

        // The path must be NUL-terminated and non-empty.
        return match bytes {
            [path @ .., 0] if !path.is_empty() && !path.contains(&0) => {
                let path = core::str::from_utf8(path).map_err(|_| ElfError::BadInterpreter)?;
                Ok(Some(String::from(path)))
            }
            _ => Err(ElfError::BadInterpreter),
        };
    }
    Ok(None)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use alloc::vec;

    /// Build a minimal valid ELF32 image: one PT_LOAD covering the
    /// whole file at `vaddr`, entry at `entry`.
    pub fn minimal_elf(e_type: u16, vaddr: u32, entry: u32) -> Vec<u8> {
        let mut elf = vec![0u8; 0x100];

        elf[0..4].copy_from_slice(&ELF_MAGIC);
        elf[4] = ELFCLASS32;
        elf[5] = ELFDATA2LSB;
        elf[6] = EV_CURRENT;
        elf[16..18].copy_from_slice(&e_type.to_le_bytes());
        elf[18..20].copy_from_slice(&EM_386.to_le_bytes());
        elf[20..24].copy_from_slice(&1u32.to_le_bytes()); // e_version
        elf[24..28].copy_from_slice(&entry.to_le_bytes()); // e_entry
        elf[28..32].copy_from_slice(&52u32.to_le_bytes()); // e_phoff
        elf[42..44].copy_from_slice(&32u16.to_le_bytes()); // e_phentsize
        elf[44..46].copy_from_slice(&1u16.to_le_bytes()); // e_phnum

        // PT_LOAD at offset 52
        elf[52..56].copy_from_slice(&PT_LOAD.to_le_bytes());
        elf[56..60].copy_from_slice(&0u32.to_le_bytes()); // p_offset
        elf[60..64].copy_from_slice(&vaddr.to_le_bytes()); // p_vaddr
        elf[64..68].copy_from_slice(&vaddr.to_le_bytes()); // p_paddr
        elf[68..72].copy_from_slice(&0x100u32.to_le_bytes()); // p_filesz
        elf[72..76].copy_from_slice(&0x200u32.to_le_bytes()); // p_memsz (BSS tail)
        elf[76..80].copy_from_slice(&5u32.to_le_bytes()); // p_flags R+X
        elf[80..84].copy_from_slice(&0x1000u32.to_le_bytes()); // p_align

        elf
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::minimal_elf;
    use super::*;

    #[test]
    fn test_parse_minimal_elf() {
        let elf = minimal_elf(ET_EXEC, 0x0804_8000, 0x0804_8000);
        let header = parse_header(&elf).unwrap();
        assert_eq!({ header.e_entry }, 0x0804_8000);
        assert_eq!({ header.e_phnum }, 1);

        let phdrs = read_phdrs(&elf, &header).unwrap();
        assert_eq!(phdrs.len(), 1);
        assert_eq!({ phdrs[0].p_type }, PT_LOAD);
        assert_eq!(
            SegmentFlags::from_bits_truncate(phdrs[0].p_flags),
            SegmentFlags::READ | SegmentFlags::EXECUTE
        );
    }

    #[test]
    fn test_bad_magic() {
        let mut elf = minimal_elf(ET_EXEC, 0x0804_8000, 0x0804_8000);
        elf[1] = b'X';
        assert_eq!(parse_header(&elf), Err(ElfError::BadMagic));
    }

    #[test]
    fn test_too_small() {
        assert_eq!(parse_header(&ELF_MAGIC), Err(ElfError::TooSmall));
    }

    #[test]
    fn test_wrong_class_and_machine() {
        let mut elf = minimal_elf(ET_EXEC, 0x0804_8000, 0x0804_8000);
        elf[4] = 2; // ELFCLASS64
        assert_eq!(parse_header(&elf), Err(ElfError::BadClass));

        let mut elf = minimal_elf(ET_EXEC, 0x0804_8000, 0x0804_8000);
        elf[18..20].copy_from_slice(&62u16.to_le_bytes()); // x86_64
        assert_eq!(parse_header(&elf), Err(ElfError::BadMachine));
    }

    #[test]
    fn test_rejects_relocatable() {
        let mut elf = minimal_elf(ET_EXEC, 0x0804_8000, 0x0804_8000);
        elf[16..18].copy_from_slice(&1u16.to_le_bytes()); // ET_REL
        assert_eq!(parse_header(&elf), Err(ElfError::BadType));
    }

    #[test]
    fn test_dyn_accepted() {
        let elf = minimal_elf(ET_DYN, 0, 0x94);
        assert!(parse_header(&elf).is_ok());
    }

    #[test]
    fn test_phdr_bounds_checked() {
        let mut elf = minimal_elf(ET_EXEC, 0x0804_8000, 0x0804_8000);
        elf[44..46].copy_from_slice(&200u16.to_le_bytes()); // absurd e_phnum
        let header = parse_header(&elf).unwrap();
        assert_eq!(read_phdrs(&elf, &header), Err(ElfError::PhdrOutOfBounds));
    }

    #[test]
    fn test_interpreter_extraction() {
        let mut elf = minimal_elf(ET_EXEC, 0x0804_8000, 0x0804_8000);
        // Re-type the PT_LOAD as PT_INTERP pointing at a path blob.
        elf[52..56].copy_from_slice(&PT_INTERP.to_le_bytes());
        elf[56..60].copy_from_slice(&0x90u32.to_le_bytes()); // p_offset
        elf[68..72].copy_from_slice(&8u32.to_le_bytes()); // p_filesz
        elf[0x90..0x98].copy_from_slice(b"/LD.SO\0\0");

        let header = parse_header(&elf).unwrap();
        let phdrs = read_phdrs(&elf, &header).unwrap();
        // Trailing byte after the terminator makes the path malformed.
        assert_eq!(find_interpreter(&elf, &phdrs), Err(ElfError::BadInterpreter));

        elf[68..72].copy_from_slice(&7u32.to_le_bytes());
        let phdrs = read_phdrs(&elf, &header).unwrap();
        assert_eq!(
            find_interpreter(&elf, &phdrs).unwrap().as_deref(),
            Some("/LD.SO")
        );
    }
}
