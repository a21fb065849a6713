//! Per-syscall handlers.
//!
//! Each function takes the raw register arguments, does its own
//! pointer validation, and returns the EAX result (negative errno on
//! failure). File descriptors route through `vfs::fd`; file contents
//! through `vfs::ramfs`.

use super::{
    copy_to_user, read_user_ptr_array, read_user_string, user_slice, ARGV_MAX, ARG_MAX,
    EBADF, EEXIST, EFAULT, EMFILE, ENOENT, ENOMEM, ENOSYS, ENVP_MAX, ENV_MAX, PATH_MAX,
};
use crate::config::USER_BREAK_BASE;
use crate::console;
use crate::keyboard;
use crate::loader::runner;
use crate::memory::{kfree, kmalloc};
use crate::vfs::{fd, ramfs, VfsError};
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};

// ─── exit / exit_group ───────────────────────────────────────────────

/// `exit(status)`: raise the runner's exit flag. The dispatcher turns
/// the flag into an `iret` to the exit trampoline; returning 0 here
/// merely fills EAX for an instant nobody observes.
pub fn sys_exit(status: i32) -> i32 {
    console::print_colored("\n[program exited with code ", console::Color::LightGrey);
    crate::print!("{}", status);
    console::print_colored("]\n", console::Color::LightGrey);
    log::info!("program exit, status {}", status);
    runner::request_exit();
    0
}

// ─── read / write ────────────────────────────────────────────────────

/// `read(fd, buf, count)`.
pub fn sys_read(fd_num: i32, buf: u32, count: u32) -> i32 {
    if count == 0 {
        return 0;
    }
    if super::validate_user_ptr(buf, count).is_err() {
        return -EFAULT;
    }

    // stdin: one keyboard poll; empty queue reads as zero bytes.
    if fd_num == 0 {
        keyboard::poll();
        return match keyboard::get_char() {
            Some(byte) => match copy_to_user(buf, &[byte]) {
                Ok(()) => 1,
                Err(err) => err,
            },
            None => 0,
        };
    }
    if fd_num == 1 || fd_num == 2 {
        return -EBADF;
    }

    let (path, offset) = match fd::with_table(|t| {
        t.entry(fd_num).map(|e| (e.path.clone(), e.offset))
    }) {
        Some(entry) => entry,
        None => return -EBADF,
    };

    let mut tmp = vec![0u8; count as usize];
    let n = match ramfs::with_fs(|fs| fs.read_at(&path, offset as usize, &mut tmp)) {
        Ok(n) => n,
        Err(_) => return -ENOENT,
    };
    if n > 0 {
        if let Err(err) = copy_to_user(buf, &tmp[..n]) {
            return err;
        }
        fd::with_table(|t| {
            if let Some(entry) = t.entry_mut(fd_num) {
                entry.offset += n as u32;
            }
        });
    }
    n as i32
}

/// `write(fd, buf, count)`: the syscall path owns stdout/stderr.
/// Writing to regular files is not implemented.
pub fn sys_write(fd_num: i32, buf: u32, count: u32) -> i32 {
    if count == 0 {
        return 0;
    }
    let bytes = match user_slice(buf, count) {
        Ok(bytes) => bytes,
        Err(err) => return err,
    };

    match fd_num {
        1 | 2 => {
            for &byte in bytes {
                console::putchar(byte);
            }
            count as i32
        }
        0 => -EBADF,
        _ => {
            if fd::with_table(|t| t.entry(fd_num).is_some()) {
                -ENOSYS
            } else {
                -EBADF
            }
        }
    }
}

// ─── open / close / lseek ────────────────────────────────────────────

/// `open(path, flags, mode)`: the pathname is copied into kernel
/// storage before the fd table ever sees it.
pub fn sys_open(path_ptr: u32, flags: u32, _mode: u32) -> i32 {
    let path = match read_user_string(path_ptr, PATH_MAX) {
        Ok(path) => path,
        Err(err) => return err,
    };
    if path.is_empty() {
        return -ENOENT;
    }
    if !ramfs::with_fs(|fs| fs.exists(&path)) {
        return -ENOENT;
    }
    match fd::with_table(|t| t.open(&path, flags)) {
        Ok(fd_num) => fd_num,
        Err(VfsError::NoSpace) => -EMFILE,
        Err(_) => -ENOENT,
    }
}

/// `close(fd)`.
pub fn sys_close(fd_num: i32) -> i32 {
    if fd::with_table(|t| t.close(fd_num)) {
        0
    } else {
        -EBADF
    }
}

/// `lseek(fd, offset, whence)`: SEEK_SET and SEEK_CUR only.
pub fn sys_lseek(fd_num: i32, offset: i32, whence: u32) -> i32 {
    const SEEK_SET: u32 = 0;
    const SEEK_CUR: u32 = 1;

    fd::with_table(|t| {
        let entry = match t.entry_mut(fd_num) {
            Some(entry) => entry,
            None => return -EBADF,
        };
        match whence {
            SEEK_SET => {
                if offset < 0 {
                    return -super::EINVAL;
                }
                entry.offset = offset as u32;
            }
            SEEK_CUR => {
                let next = entry.offset as i64 + offset as i64;
                if next < 0 {
                    return -super::EINVAL;
                }
                entry.offset = next as u32;
            }
            // SEEK_END is not implemented.
            _ => return -ENOSYS,
        }
        entry.offset as i32
    })
}

// ─── Filesystem mutations ────────────────────────────────────────────

fn vfs_errno(err: VfsError) -> i32 {
    match err {
        VfsError::AlreadyExists | VfsError::NotEmpty => -EEXIST,
        _ => -ENOENT,
    }
}

/// `unlink(path)`.
pub fn sys_unlink(path_ptr: u32) -> i32 {
    let path = match read_user_string(path_ptr, PATH_MAX) {
        Ok(path) => path,
        Err(err) => return err,
    };
    match ramfs::with_fs(|fs| fs.remove(&path, false)) {
        Ok(()) => 0,
        Err(err) => vfs_errno(err),
    }
}

/// `mkdir(path, mode)`.
pub fn sys_mkdir(path_ptr: u32, _mode: u32) -> i32 {
    let path = match read_user_string(path_ptr, PATH_MAX) {
        Ok(path) => path,
        Err(err) => return err,
    };
    match ramfs::with_fs(|fs| fs.create_dir(&path)) {
        Ok(_) => 0,
        Err(err) => vfs_errno(err),
    }
}

/// `rmdir(path)`.
pub fn sys_rmdir(path_ptr: u32) -> i32 {
    let path = match read_user_string(path_ptr, PATH_MAX) {
        Ok(path) => path,
        Err(err) => return err,
    };
    if !ramfs::with_fs(|fs| fs.is_directory(&path)) {
        return -ENOENT;
    }
    match ramfs::with_fs(|fs| fs.remove(&path, false)) {
        Ok(()) => 0,
        Err(err) => vfs_errno(err),
    }
}

// ─── Memory ──────────────────────────────────────────────────────────

/// Program break. Lives across runs; programs that care call
/// `brk(0)` first anyway.
static PROGRAM_BREAK: AtomicU32 = AtomicU32::new(USER_BREAK_BASE);

pub fn reset_program_break() {
    PROGRAM_BREAK.store(USER_BREAK_BASE, Ordering::SeqCst);
}

/// `brk(addr)`: query with 0, otherwise set and echo back.
pub fn sys_brk(addr: u32) -> i32 {
    if addr == 0 {
        return PROGRAM_BREAK.load(Ordering::SeqCst) as i32;
    }
    PROGRAM_BREAK.store(addr, Ordering::SeqCst);
    addr as i32
}

/// `mmap`/`mmap2`: anonymous maps come from the kernel heap; fixed
/// requests are echoed back untouched (memory is flat and unprotected).
pub fn sys_mmap(addr: u32, len: u32) -> i32 {
    if addr != 0 {
        return addr as i32;
    }
    let ptr = kmalloc(len as usize);
    if ptr.is_null() {
        -ENOMEM
    } else {
        ptr as i32
    }
}

/// `munmap(addr)`.
pub fn sys_munmap(addr: u32) -> i32 {
    kfree(addr as *mut u8);
    0
}

// ─── execve ──────────────────────────────────────────────────────────

/// `execve(path, argv, envp)`: copy everything out of user space with
/// bounded, validated reads, then hand over to the runner. On success
/// the runner jumps into the replacement image and this call never
/// returns.
pub fn sys_execve(path_ptr: u32, argv_ptr: u32, envp_ptr: u32) -> i32 {
    let path = match read_user_string(path_ptr, PATH_MAX) {
        Ok(path) => path,
        Err(err) => return err,
    };
    if path.is_empty() {
        return -ENOENT;
    }

    let argv = match copy_string_array(argv_ptr, ARGV_MAX, ARG_MAX) {
        Ok(argv) => argv,
        Err(err) => return err,
    };
    let envp = match copy_string_array(envp_ptr, ENVP_MAX, ENV_MAX) {
        Ok(envp) => envp,
        Err(err) => return err,
    };

    match runner::exec(&path, &argv, &envp) {
        // Staged: the dispatcher reroutes the iret and this value is
        // never seen by the caller.
        Ok(()) => 0,
        Err(err) => {
            log::warn!("execve {} failed: {:?}", path, err);
            -ENOENT
        }
    }
}

/// Copy a NULL-terminated user array of user strings into kernel
/// strings. A null array pointer is an empty list.
fn copy_string_array(array_ptr: u32, max_entries: usize, max_len: usize) -> Result<Vec<String>, i32> {
    if array_ptr == 0 {
        return Ok(Vec::new());
    }
    let pointers = read_user_ptr_array(array_ptr, max_entries)?;
    let mut out = Vec::with_capacity(pointers.len());
    for ptr in pointers {
        out.push(read_user_string(ptr, max_len)?);
    }
    Ok(out)
}
