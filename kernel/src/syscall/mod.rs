//! Linux i386 syscall compatibility layer.
//!
//! Entered exclusively through `int 0x80` via the interrupt dispatcher.
//!
//! # Syscall ABI (Linux i386)
//!
//! | Register | Purpose        |
//! |----------|----------------|
//! | EAX      | Syscall number |
//! | EBX      | Argument 1     |
//! | ECX      | Argument 2     |
//! | EDX      | Argument 3     |
//! | ESI      | Argument 4     |
//! | EDI      | Argument 5     |
//! | EBP      | Argument 6     |
//! | EAX      | Return value   |
//!
//! Failures are negated errno values in EAX. Any number without a row
//! in the dispatch table is `-ENOSYS` (-38).

pub mod handlers;

use crate::config::USER_PTR_MIN;
use alloc::string::String;
use alloc::vec::Vec;

// ─── Linux errno constants ────────────────────────────────────────────
// Returned negated from syscall handlers (e.g. -ENOENT).

pub const ENOENT: i32 = 2;
pub const EBADF: i32 = 9;
pub const ENOMEM: i32 = 12;
pub const EFAULT: i32 = 14;
pub const EEXIST: i32 = 17;
pub const EINVAL: i32 = 22;
pub const EMFILE: i32 = 24;
pub const ENOSYS: i32 = 38;

// ─── Linux syscall numbers (i386) ────────────────────────────────────

pub const SYS_EXIT: u32 = 1;
pub const SYS_READ: u32 = 3;
pub const SYS_WRITE: u32 = 4;
pub const SYS_OPEN: u32 = 5;
pub const SYS_CLOSE: u32 = 6;
pub const SYS_UNLINK: u32 = 10;
pub const SYS_EXECVE: u32 = 11;
pub const SYS_LSEEK: u32 = 19;
pub const SYS_GETPID: u32 = 20;
pub const SYS_GETUID: u32 = 24;
pub const SYS_MKDIR: u32 = 39;
pub const SYS_RMDIR: u32 = 40;
pub const SYS_BRK: u32 = 45;
pub const SYS_GETGID: u32 = 47;
pub const SYS_MMAP: u32 = 90;
pub const SYS_MUNMAP: u32 = 91;
pub const SYS_SCHED_YIELD: u32 = 158;
pub const SYS_MMAP2: u32 = 192;
pub const SYS_EXIT_GROUP: u32 = 252;

// ─── Bounds on user-supplied data ────────────────────────────────────

/// Maximum pathname length accepted from user space.
pub const PATH_MAX: usize = 256;
/// Maximum number of argv entries `execve` will copy.
pub const ARGV_MAX: usize = 64;
/// Maximum length of one argv entry.
pub const ARG_MAX: usize = 256;
/// Maximum number of envp entries.
pub const ENVP_MAX: usize = 64;
/// Maximum length of one envp entry.
pub const ENV_MAX: usize = 512;

/// Initialise the syscall layer (the fd table lives in `vfs::fd`).
pub fn init() {
    handlers::reset_program_break();
    log::info!("syscall layer ready (int 0x80)");
}

/// Dispatch one syscall. Called by the interrupt dispatcher with the
/// raw register values; the result goes back into the frame's EAX.
pub fn dispatch(nr: u32, a1: u32, a2: u32, a3: u32, _a4: u32, _a5: u32, _a6: u32) -> i32 {
    #[cfg(feature = "trace-syscalls")]
    log::trace!("syscall {} ({:#x}, {:#x}, {:#x})", nr, a1, a2, a3);

    match nr {
        SYS_EXIT | SYS_EXIT_GROUP => handlers::sys_exit(a1 as i32),
        SYS_READ => handlers::sys_read(a1 as i32, a2, a3),
        SYS_WRITE => handlers::sys_write(a1 as i32, a2, a3),
        SYS_OPEN => handlers::sys_open(a1, a2, a3),
        SYS_CLOSE => handlers::sys_close(a1 as i32),
        SYS_UNLINK => handlers::sys_unlink(a1),
        SYS_EXECVE => handlers::sys_execve(a1, a2, a3),
        SYS_LSEEK => handlers::sys_lseek(a1 as i32, a2 as i32, a3),
        SYS_GETPID => 1,
        SYS_GETUID | SYS_GETGID => 0, // root
        SYS_MKDIR => handlers::sys_mkdir(a1, a2),
        SYS_RMDIR => handlers::sys_rmdir(a1),
        SYS_BRK => handlers::sys_brk(a1),
        SYS_MMAP | SYS_MMAP2 => handlers::sys_mmap(a1, a2),
        SYS_MUNMAP => handlers::sys_munmap(a1),
        SYS_SCHED_YIELD => 0,

        // Everything else → ENOSYS
        unknown => {
            log::debug!("unimplemented syscall #{} (a1={:#x}, a2={:#x})", unknown, a1, a2);
            -ENOSYS
        }
    }
}

// ─── User pointer validation ─────────────────────────────────────────

/// Validate that `[ptr, ptr + len)` is an acceptable user range.
///
/// Anything below `0x1000` is rejected, as is a range wrapping the
/// 32-bit address space. Returns `Err(-EFAULT)` without the pointer
/// ever being dereferenced.
pub fn validate_user_ptr(ptr: u32, len: u32) -> Result<u32, i32> {
    if ptr < USER_PTR_MIN {
        return Err(-EFAULT);
    }
    if len > 0 && ptr.checked_add(len - 1).is_none() {
        return Err(-EFAULT);
    }
    Ok(ptr)
}

/// Read a NUL-terminated string from user space, truncated at
/// `max_len` bytes.
pub fn read_user_string(ptr: u32, max_len: usize) -> Result<String, i32> {
    validate_user_ptr(ptr, 1)?;

    let mut buf = Vec::with_capacity(max_len.min(64));
    for i in 0..max_len {
        let addr = ptr.checked_add(i as u32).ok_or(-EFAULT)?;
        let byte = unsafe { *(addr as *const u8) };
        if byte == 0 {
            break;
        }
        buf.push(byte);
    }
    String::from_utf8(buf).map_err(|_| -EINVAL)
}

/// Read a NULL-terminated array of user pointers, at most `max`
/// entries.
pub fn read_user_ptr_array(ptr: u32, max: usize) -> Result<Vec<u32>, i32> {
    validate_user_ptr(ptr, 4)?;

    let mut out = Vec::new();
    for i in 0..max {
        let addr = ptr
            .checked_add((i * 4) as u32)
            .ok_or(-EFAULT)?;
        validate_user_ptr(addr, 4)?;
        let value = unsafe { *(addr as *const u32) };
        if value == 0 {
            break;
        }
        out.push(value);
    }
    Ok(out)
}

/// Copy kernel bytes out to a validated user range.
pub fn copy_to_user(dst: u32, src: &[u8]) -> Result<(), i32> {
    validate_user_ptr(dst, src.len() as u32)?;
    unsafe {
        core::ptr::copy_nonoverlapping(src.as_ptr(), dst as *mut u8, src.len());
    }
    Ok(())
}

/// Borrow a validated user range as a byte slice.
pub fn user_slice(ptr: u32, len: u32) -> Result<&'static [u8], i32> {
    validate_user_ptr(ptr, len)?;
    Ok(unsafe { core::slice::from_raw_parts(ptr as *const u8, len as usize) })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pointer_floor() {
        assert_eq!(validate_user_ptr(0, 1), Err(-EFAULT));
        assert_eq!(validate_user_ptr(0x200, 5), Err(-EFAULT));
        assert_eq!(validate_user_ptr(0xFFF, 1), Err(-EFAULT));
        assert!(validate_user_ptr(0x1000, 1).is_ok());
        assert!(validate_user_ptr(0x0804_8000, 4096).is_ok());
    }

    #[test]
    fn test_pointer_wrap_rejected() {
        assert_eq!(validate_user_ptr(0xFFFF_FFF0, 0x100), Err(-EFAULT));
        // The very top of the space is still addressable.
        assert!(validate_user_ptr(0xFFFF_FFFF, 1).is_ok());
    }

    #[test]
    fn test_rejected_pointers_never_dereferenced() {
        // These would fault instantly if dereferenced on a host.
        assert_eq!(read_user_string(0x10, 256), Err(-EFAULT));
        assert_eq!(read_user_ptr_array(0x10, 64), Err(-EFAULT));
        assert_eq!(copy_to_user(0x10, b"x"), Err(-EFAULT));
        assert!(user_slice(0x10, 1).is_err());
    }

    #[test]
    fn test_table_totality() {
        // Numbers outside the table return exactly -38.
        for nr in [0u32, 2, 7, 13, 59, 100, 151, 200, 251, 300, 4096, u32::MAX] {
            assert_eq!(dispatch(nr, 0, 0, 0, 0, 0, 0), -ENOSYS);
        }
        assert_eq!(-ENOSYS, -38);
    }

    #[test]
    fn test_trivial_ids() {
        assert_eq!(dispatch(SYS_GETPID, 0, 0, 0, 0, 0, 0), 1);
        assert_eq!(dispatch(SYS_GETUID, 0, 0, 0, 0, 0, 0), 0);
        assert_eq!(dispatch(SYS_GETGID, 0, 0, 0, 0, 0, 0), 0);
        assert_eq!(dispatch(SYS_SCHED_YIELD, 0, 0, 0, 0, 0, 0), 0);
    }

    #[test]
    fn test_bad_pointer_syscalls_fault() {
        // write(1, 0x200, 5) → -EFAULT, nothing printed.
        assert_eq!(dispatch(SYS_WRITE, 1, 0x200, 5, 0, 0, 0), -EFAULT);
        // open with a junk path pointer.
        assert_eq!(dispatch(SYS_OPEN, 0x10, 0, 0, 0, 0, 0), -EFAULT);
    }
}
