//! Filesystem layer: an in-RAM tree, a sector-device backend, and the
//! process-wide file-descriptor table.

pub mod disk;
pub mod fd;
pub mod ramfs;

use alloc::string::String;

/// Filesystem error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VfsError {
    NotFound,
    AlreadyExists,
    NotADirectory,
    IsADirectory,
    NotEmpty,
    InvalidPath,
    NoSpace,
}

/// Initialise the disk, then the filesystem (restoring a saved image
/// when the disk carries one), then the fd table.
pub fn init() {
    disk::init();
    ramfs::init();
    fd::init();
}

/// Split an absolute path into its parent path and final component.
///
/// `"/BIN/LS"` → `("/BIN", "LS")`, `"/X"` → `("/", "X")`.
pub fn split_path(path: &str) -> (&str, &str) {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) => ("/", &trimmed[1..]),
        Some(idx) => (&trimmed[..idx], &trimmed[idx + 1..]),
        None => ("/", trimmed),
    }
}

/// Non-empty components of an absolute path.
pub fn components(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// Uppercase a path and drop trailing dots, the lookup fallback for
/// images built by case-mangling tooling.
pub fn normalize_upper(path: &str) -> String {
    let mut out: String = path.chars().map(|c| c.to_ascii_uppercase()).collect();
    while out.ends_with('.') {
        out.pop();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_path() {
        assert_eq!(split_path("/BIN/LS"), ("/BIN", "LS"));
        assert_eq!(split_path("/X"), ("/", "X"));
        assert_eq!(split_path("/A/B/C"), ("/A/B", "C"));
        assert_eq!(split_path("/A/"), ("/", "A"));
    }

    #[test]
    fn test_normalize_upper() {
        assert_eq!(normalize_upper("/bin/hello..."), "/BIN/HELLO");
        assert_eq!(normalize_upper("/BANNER_0.BIN"), "/BANNER_0.BIN");
    }
}
