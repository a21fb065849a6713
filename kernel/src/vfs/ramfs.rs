//! In-memory filesystem.
//!
//! Tree-structured: directories map names to inode numbers, files hold
//! their bytes. All data lives in the kernel heap. A compact image of
//! the whole tree can be serialized to the sector device (`save`) and
//! restored at boot.

#![allow(dead_code)]

use super::{components, disk, normalize_upper, split_path, VfsError};
use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use hashbrown::HashMap;
use spin::Mutex;

/// Inode number.
pub type Ino = u32;

/// Root directory inode.
const ROOT_INO: Ino = 1;

/// Magic identifying a serialized filesystem image.
pub const FS_MAGIC: u32 = 0x1234_5678;

/// Inode payload.
#[derive(Debug, Clone)]
pub enum InodeContent {
    /// Name → child inode, kept sorted for directory listings.
    Directory(BTreeMap<String, Ino>),
    File(Vec<u8>),
}

/// Inode: number plus content.
#[derive(Debug, Clone)]
pub struct Inode {
    pub ino: Ino,
    pub content: InodeContent,
}

impl Inode {
    pub fn is_dir(&self) -> bool {
        matches!(self.content, InodeContent::Directory(_))
    }

    pub fn size(&self) -> usize {
        match &self.content {
            InodeContent::Directory(entries) => entries.len(),
            InodeContent::File(data) => data.len(),
        }
    }
}

/// A directory listing row.
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
    pub size: usize,
}

pub struct MemFs {
    inodes: HashMap<Ino, Inode>,
    next_ino: Ino,
}

static FS: Mutex<Option<MemFs>> = Mutex::new(None);

/// Initialise the global filesystem: restore the saved disk image when
/// one is present, otherwise seed the default tree.
pub fn init() {
    let fs = match disk::load_image().and_then(|image| MemFs::from_image(&image)) {
        Some(fs) => {
            log::info!("filesystem restored from disk image");
            fs
        }
        None => {
            let mut fs = MemFs::new();
            fs.seed_defaults();
            fs
        }
    };
    *FS.lock() = Some(fs);
}

/// Run a closure with the global filesystem.
pub fn with_fs<F, R>(f: F) -> R
where
    F: FnOnce(&mut MemFs) -> R,
{
    let mut guard = FS.lock();
    let fs = guard
        .as_mut()
        .expect("filesystem not initialised — call vfs::init()");
    f(fs)
}

impl MemFs {
    pub fn new() -> Self {
        let mut inodes = HashMap::new();
        inodes.insert(
            ROOT_INO,
            Inode {
                ino: ROOT_INO,
                content: InodeContent::Directory(BTreeMap::new()),
            },
        );
        MemFs {
            inodes,
            next_ino: ROOT_INO + 1,
        }
    }

    fn seed_defaults(&mut self) {
        let _ = self.create_dir("/BIN");
        let _ = self.create_dir("/ETC");
        let _ = self.create_dir("/HOME");
        let _ = self.create_file("/ETC/MOTD", b"Welcome to Ferrite.\n");
        let _ = self.create_file(
            "/README.TXT",
            b"Ferrite: a small i386 kernel.\nTry 'help' for shell commands.\n",
        );
    }

    // ── Lookup ──────────────────────────────────────────────

    pub fn get(&self, ino: Ino) -> Option<&Inode> {
        self.inodes.get(&ino)
    }

    /// Resolve an absolute path, case-sensitively.
    pub fn resolve(&self, path: &str) -> Option<Ino> {
        let mut current = ROOT_INO;
        for part in components(path) {
            let node = self.inodes.get(&current)?;
            match &node.content {
                InodeContent::Directory(entries) => current = *entries.get(part)?,
                InodeContent::File(_) => return None,
            }
        }
        Some(current)
    }

    /// Resolve with the uppercase-normalized fallback.
    pub fn resolve_any(&self, path: &str) -> Option<Ino> {
        self.resolve(path)
            .or_else(|| self.resolve(&normalize_upper(path)))
    }

    pub fn exists(&self, path: &str) -> bool {
        self.resolve_any(path).is_some()
    }

    pub fn is_directory(&self, path: &str) -> bool {
        self.resolve_any(path)
            .and_then(|ino| self.inodes.get(&ino))
            .map(|node| node.is_dir())
            .unwrap_or(false)
    }

    // ── Creation ────────────────────────────────────────────

    fn insert_child(&mut self, path: &str, content: InodeContent) -> Result<Ino, VfsError> {
        let (parent_path, name) = split_path(path);
        if name.is_empty() {
            return Err(VfsError::InvalidPath);
        }
        let parent_ino = self.resolve(parent_path).ok_or(VfsError::NotFound)?;
        let ino = self.next_ino;

        let parent = self.inodes.get_mut(&parent_ino).ok_or(VfsError::NotFound)?;
        match &mut parent.content {
            InodeContent::Directory(entries) => {
                if entries.contains_key(name) {
                    return Err(VfsError::AlreadyExists);
                }
                entries.insert(name.to_string(), ino);
            }
            InodeContent::File(_) => return Err(VfsError::NotADirectory),
        }

        self.next_ino += 1;
        self.inodes.insert(ino, Inode { ino, content });
        Ok(ino)
    }

    pub fn create_file(&mut self, path: &str, data: &[u8]) -> Result<Ino, VfsError> {
        self.insert_child(path, InodeContent::File(data.to_vec()))
    }

    pub fn create_dir(&mut self, path: &str) -> Result<Ino, VfsError> {
        self.insert_child(path, InodeContent::Directory(BTreeMap::new()))
    }

    // ── File I/O ────────────────────────────────────────────

    fn file_ino(&self, path: &str) -> Result<Ino, VfsError> {
        let ino = self.resolve_any(path).ok_or(VfsError::NotFound)?;
        match self.inodes.get(&ino) {
            Some(node) if !node.is_dir() => Ok(ino),
            Some(_) => Err(VfsError::IsADirectory),
            None => Err(VfsError::NotFound),
        }
    }

    pub fn read_file(&self, path: &str) -> Result<Vec<u8>, VfsError> {
        let ino = self.file_ino(path)?;
        match &self.inodes[&ino].content {
            InodeContent::File(data) => Ok(data.clone()),
            InodeContent::Directory(_) => Err(VfsError::IsADirectory),
        }
    }

    /// Copy up to `dst.len()` bytes starting at `offset`; returns the
    /// number copied (0 at or past EOF).
    pub fn read_at(&self, path: &str, offset: usize, dst: &mut [u8]) -> Result<usize, VfsError> {
        let ino = self.file_ino(path)?;
        let data = match &self.inodes[&ino].content {
            InodeContent::File(data) => data,
            InodeContent::Directory(_) => return Err(VfsError::IsADirectory),
        };
        if offset >= data.len() {
            return Ok(0);
        }
        let n = dst.len().min(data.len() - offset);
        dst[..n].copy_from_slice(&data[offset..offset + n]);
        Ok(n)
    }

    pub fn file_size(&self, path: &str) -> Result<usize, VfsError> {
        let ino = self.file_ino(path)?;
        Ok(self.inodes[&ino].size())
    }

    /// Create the file or replace its contents.
    pub fn write_file(&mut self, path: &str, data: &[u8]) -> Result<(), VfsError> {
        if let Ok(ino) = self.file_ino(path) {
            if let Some(node) = self.inodes.get_mut(&ino) {
                node.content = InodeContent::File(data.to_vec());
            }
            return Ok(());
        }
        self.create_file(path, data).map(|_| ())
    }

    // ── Removal / rename / copy ─────────────────────────────

    pub fn remove(&mut self, path: &str, recursive: bool) -> Result<(), VfsError> {
        let ino = self.resolve_any(path).ok_or(VfsError::NotFound)?;
        if ino == ROOT_INO {
            return Err(VfsError::InvalidPath);
        }
        if let Some(node) = self.inodes.get(&ino) {
            if let InodeContent::Directory(entries) = &node.content {
                if !entries.is_empty() && !recursive {
                    return Err(VfsError::NotEmpty);
                }
            }
        }

        self.drop_subtree(ino);

        // Unlink from the parent that referenced it.
        let target = ino;
        for node in self.inodes.values_mut() {
            if let InodeContent::Directory(entries) = &mut node.content {
                entries.retain(|_, child| *child != target);
            }
        }
        Ok(())
    }

    fn drop_subtree(&mut self, ino: Ino) {
        let children: Vec<Ino> = match self.inodes.get(&ino) {
            Some(Inode {
                content: InodeContent::Directory(entries),
                ..
            }) => entries.values().copied().collect(),
            _ => Vec::new(),
        };
        for child in children {
            self.drop_subtree(child);
        }
        self.inodes.remove(&ino);
    }

    pub fn rename(&mut self, src: &str, dst: &str) -> Result<(), VfsError> {
        self.copy(src, dst)?;
        self.remove(src, true)
    }

    pub fn copy(&mut self, src: &str, dst: &str) -> Result<(), VfsError> {
        let data = self.read_file(src)?;
        if self.exists(dst) {
            return Err(VfsError::AlreadyExists);
        }
        self.create_file(dst, &data).map(|_| ())
    }

    // ── Listing ─────────────────────────────────────────────

    pub fn list(&self, path: &str) -> Result<Vec<DirEntry>, VfsError> {
        let ino = self.resolve_any(path).ok_or(VfsError::NotFound)?;
        let node = self.inodes.get(&ino).ok_or(VfsError::NotFound)?;
        match &node.content {
            InodeContent::Directory(entries) => Ok(entries
                .iter()
                .filter_map(|(name, child)| {
                    self.inodes.get(child).map(|node| DirEntry {
                        name: name.clone(),
                        is_dir: node.is_dir(),
                        size: node.size(),
                    })
                })
                .collect()),
            InodeContent::File(_) => Err(VfsError::NotADirectory),
        }
    }

    /// Every path in the tree, depth-first.
    pub fn list_all(&self) -> Vec<(String, bool, usize)> {
        let mut out = Vec::new();
        self.walk(ROOT_INO, "", &mut out);
        out
    }

    fn walk(&self, ino: Ino, prefix: &str, out: &mut Vec<(String, bool, usize)>) {
        let node = match self.inodes.get(&ino) {
            Some(node) => node,
            None => return,
        };
        if let InodeContent::Directory(entries) = &node.content {
            for (name, child) in entries {
                let path = alloc::format!("{}/{}", prefix, name);
                if let Some(child_node) = self.inodes.get(child) {
                    out.push((path.clone(), child_node.is_dir(), child_node.size()));
                    if child_node.is_dir() {
                        self.walk(*child, &path, out);
                    }
                }
            }
        }
    }

    // ── Serialization ───────────────────────────────────────

    /// Serialize the tree: a `{magic, total_len, count}` superblock
    /// followed by `{path_len, is_dir, size, path, data}` records in
    /// parent-before-child order.
    pub fn serialize(&self) -> Vec<u8> {
        let entries = self.list_all();
        let mut out = Vec::new();
        out.extend_from_slice(&FS_MAGIC.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes()); // total_len backpatched below
        out.extend_from_slice(&(entries.len() as u32).to_le_bytes());

        for (path, is_dir, _) in &entries {
            let data = if *is_dir {
                Vec::new()
            } else {
                self.read_file(path).unwrap_or_default()
            };
            out.extend_from_slice(&(path.len() as u16).to_le_bytes());
            out.push(u8::from(*is_dir));
            out.push(0);
            out.extend_from_slice(&(data.len() as u32).to_le_bytes());
            out.extend_from_slice(path.as_bytes());
            out.extend_from_slice(&data);
        }

        let total = out.len() as u32;
        out[4..8].copy_from_slice(&total.to_le_bytes());
        out
    }

    /// Rebuild a tree from a serialized image. None on any corruption.
    pub fn from_image(image: &[u8]) -> Option<MemFs> {
        let magic = u32::from_le_bytes(image.get(0..4)?.try_into().ok()?);
        if magic != FS_MAGIC {
            return None;
        }
        let count = u32::from_le_bytes(image.get(8..12)?.try_into().ok()?);

        let mut fs = MemFs::new();
        let mut cursor = 12usize;
        for _ in 0..count {
            let path_len = u16::from_le_bytes(image.get(cursor..cursor + 2)?.try_into().ok()?)
                as usize;
            let is_dir = *image.get(cursor + 2)? != 0;
            let size =
                u32::from_le_bytes(image.get(cursor + 4..cursor + 8)?.try_into().ok()?) as usize;
            cursor += 8;

            let path = core::str::from_utf8(image.get(cursor..cursor + path_len)?).ok()?;
            cursor += path_len;
            let data = image.get(cursor..cursor + size)?;
            cursor += size;

            if is_dir {
                fs.create_dir(path).ok()?;
            } else {
                fs.create_file(path, data).ok()?;
            }
        }
        Some(fs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> MemFs {
        let mut fs = MemFs::new();
        fs.seed_defaults();
        fs
    }

    #[test]
    fn test_resolve_and_read() {
        let fs = fresh();
        assert!(fs.exists("/ETC/MOTD"));
        let data = fs.read_file("/ETC/MOTD").unwrap();
        assert!(data.starts_with(b"Welcome"));
        assert_eq!(fs.read_file("/NOPE"), Err(VfsError::NotFound));
    }

    #[test]
    fn test_uppercase_fallback() {
        let fs = fresh();
        assert!(fs.exists("/etc/motd"));
        assert!(fs.exists("/etc/motd..."));
        assert!(fs.read_file("/etc/motd").is_ok());
    }

    #[test]
    fn test_create_remove() {
        let mut fs = fresh();
        fs.create_dir("/TMP").unwrap();
        fs.create_file("/TMP/A", b"a").unwrap();
        assert_eq!(fs.remove("/TMP", false), Err(VfsError::NotEmpty));
        fs.remove("/TMP", true).unwrap();
        assert!(!fs.exists("/TMP"));
        assert!(!fs.exists("/TMP/A"));
    }

    #[test]
    fn test_duplicate_create_fails() {
        let mut fs = fresh();
        assert_eq!(
            fs.create_dir("/BIN").unwrap_err(),
            VfsError::AlreadyExists
        );
    }

    #[test]
    fn test_read_at_offsets() {
        let mut fs = fresh();
        fs.create_file("/F", b"0123456789").unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(fs.read_at("/F", 2, &mut buf).unwrap(), 4);
        assert_eq!(&buf, b"2345");
        assert_eq!(fs.read_at("/F", 8, &mut buf).unwrap(), 2);
        assert_eq!(fs.read_at("/F", 10, &mut buf).unwrap(), 0);
    }

    #[test]
    fn test_copy_and_rename() {
        let mut fs = fresh();
        fs.create_file("/A", b"abc").unwrap();
        fs.copy("/A", "/B").unwrap();
        assert_eq!(fs.read_file("/B").unwrap(), b"abc");
        fs.rename("/B", "/C").unwrap();
        assert!(!fs.exists("/B"));
        assert_eq!(fs.read_file("/C").unwrap(), b"abc");
    }

    #[test]
    fn test_serialize_roundtrip() {
        let mut fs = fresh();
        fs.create_dir("/D").unwrap();
        fs.create_file("/D/X", b"payload").unwrap();
        let image = fs.serialize();
        let restored = MemFs::from_image(&image).unwrap();
        assert_eq!(restored.read_file("/D/X").unwrap(), b"payload");
        assert_eq!(restored.list_all().len(), fs.list_all().len());
        assert!(MemFs::from_image(b"garbage").is_none());
    }

    #[test]
    fn test_listing_sorted() {
        let mut fs = fresh();
        fs.create_file("/BIN/Z", b"").unwrap();
        fs.create_file("/BIN/A", b"").unwrap();
        let names: Vec<_> = fs
            .list("/BIN")
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, ["A", "Z"]);
    }
}
