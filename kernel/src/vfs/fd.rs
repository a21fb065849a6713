//! File descriptor table.
//!
//! Process-wide (a single user program runs at a time): a fixed-size
//! array with 0/1/2 reserved for stdio and the rest handed out lowest-
//! free-first. Paths are copied into kernel-owned storage at `open`
//! time; user memory is never referenced after the syscall returns.

use super::VfsError;
use crate::config::MAX_FDS;
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use spin::Mutex;

/// Fd 0/1/2 are reserved for stdin/stdout/stderr.
pub const FIRST_USER_FD: i32 = 3;

/// One slot in the descriptor table.
#[derive(Debug, Clone)]
pub struct FdEntry {
    pub used: bool,
    /// Kernel-owned copy of the opened path; only valid when `used`.
    pub path: String,
    pub offset: u32,
    pub mode: u32,
}

impl FdEntry {
    const fn empty() -> Self {
        FdEntry {
            used: false,
            path: String::new(),
            offset: 0,
            mode: 0,
        }
    }
}

pub struct FdTable {
    entries: Vec<FdEntry>,
}

impl FdTable {
    pub fn new() -> Self {
        let mut entries = Vec::with_capacity(MAX_FDS);
        entries.resize(MAX_FDS, FdEntry::empty());

        entries[0] = FdEntry {
            used: true,
            path: "/dev/stdin".to_string(),
            offset: 0,
            mode: 0,
        };
        entries[1] = FdEntry {
            used: true,
            path: "/dev/stdout".to_string(),
            offset: 0,
            mode: 1,
        };
        entries[2] = FdEntry {
            used: true,
            path: "/dev/stderr".to_string(),
            offset: 0,
            mode: 1,
        };
        FdTable { entries }
    }

    /// Allocate the lowest free descriptor at or above 3.
    pub fn open(&mut self, path: &str, mode: u32) -> Result<i32, VfsError> {
        for fd in FIRST_USER_FD as usize..self.entries.len() {
            if !self.entries[fd].used {
                self.entries[fd] = FdEntry {
                    used: true,
                    path: path.to_string(),
                    offset: 0,
                    mode,
                };
                return Ok(fd as i32);
            }
        }
        Err(VfsError::NoSpace)
    }

    pub fn close(&mut self, fd: i32) -> bool {
        match self.entry_mut(fd) {
            Some(entry) => {
                *entry = FdEntry::empty();
                true
            }
            None => false,
        }
    }

    pub fn entry(&self, fd: i32) -> Option<&FdEntry> {
        if fd < 0 || fd as usize >= self.entries.len() {
            return None;
        }
        let entry = &self.entries[fd as usize];
        entry.used.then_some(entry)
    }

    pub fn entry_mut(&mut self, fd: i32) -> Option<&mut FdEntry> {
        if fd < 0 || fd as usize >= self.entries.len() {
            return None;
        }
        let entry = &mut self.entries[fd as usize];
        entry.used.then_some(entry)
    }
}

static TABLE: Mutex<Option<FdTable>> = Mutex::new(None);

/// Initialise the global table with the stdio entries.
pub fn init() {
    *TABLE.lock() = Some(FdTable::new());
}

/// Run a closure with the global fd table.
pub fn with_table<F, R>(f: F) -> R
where
    F: FnOnce(&mut FdTable) -> R,
{
    let mut guard = TABLE.lock();
    let table = guard
        .as_mut()
        .expect("fd table not initialised — call vfs::fd::init()");
    f(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stdio_preassigned() {
        let table = FdTable::new();
        for fd in 0..3 {
            assert!(table.entry(fd).is_some());
        }
        assert!(table.entry(3).is_none());
    }

    #[test]
    fn test_lowest_free_fd() {
        let mut table = FdTable::new();
        let a = table.open("/A", 0).unwrap();
        let b = table.open("/B", 0).unwrap();
        assert_eq!((a, b), (3, 4));

        table.close(a);
        // Freed slot is reused before extending upward.
        assert_eq!(table.open("/C", 0).unwrap(), 3);
    }

    #[test]
    fn test_table_full() {
        let mut table = FdTable::new();
        for _ in FIRST_USER_FD as usize..MAX_FDS {
            table.open("/X", 0).unwrap();
        }
        assert_eq!(table.open("/Y", 0), Err(VfsError::NoSpace));
    }

    #[test]
    fn test_close_invalid() {
        let mut table = FdTable::new();
        assert!(!table.close(99));
        assert!(!table.close(-1));
    }

    #[test]
    fn test_path_is_owned_copy() {
        let mut table = FdTable::new();
        let path = String::from("/ETC/MOTD");
        let fd = table.open(&path, 0).unwrap();
        drop(path);
        assert_eq!(table.entry(fd).unwrap().path, "/ETC/MOTD");
    }
}
