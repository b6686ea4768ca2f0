//! Inode bookkeeping for the FUSE adapter.
//!
//! The kernel speaks in inode numbers while the resolver speaks in
//! conceptual paths, so the adapter keeps a bidirectional map between the
//! two. Inodes are assigned lazily the first time a conceptual path is
//! seen (during lookup or readdir) and are stable for the lifetime of the
//! mount. Inode 1 is reserved for the virtual root `/`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use fuser::FUSE_ROOT_ID;

/// Bidirectional conceptual-path <-> inode map.
pub struct InodeTable {
    inner: Mutex<Inner>,
}

struct Inner {
    path_to_ino: HashMap<PathBuf, u64>,
    ino_to_path: HashMap<u64, PathBuf>,
    next_ino: u64,
}

impl InodeTable {
    /// Create a table with the virtual root pre-assigned to inode 1.
    pub fn new() -> Self {
        let root = PathBuf::from("/");
        let mut path_to_ino = HashMap::new();
        let mut ino_to_path = HashMap::new();
        path_to_ino.insert(root.clone(), FUSE_ROOT_ID);
        ino_to_path.insert(FUSE_ROOT_ID, root);

        Self {
            inner: Mutex::new(Inner {
                path_to_ino,
                ino_to_path,
                next_ino: FUSE_ROOT_ID + 1,
            }),
        }
    }

    /// Get the inode for a conceptual path, assigning a fresh one if the
    /// path has not been seen before.
    pub fn get_or_assign(&self, path: &Path) -> u64 {
        let mut inner = self.inner.lock().unwrap();

        if let Some(&ino) = inner.path_to_ino.get(path) {
            return ino;
        }

        let ino = inner.next_ino;
        inner.next_ino += 1;
        inner.path_to_ino.insert(path.to_path_buf(), ino);
        inner.ino_to_path.insert(ino, path.to_path_buf());
        ino
    }

    /// Conceptual path for an inode, if one was ever assigned.
    pub fn path(&self, ino: u64) -> Option<PathBuf> {
        self.inner.lock().unwrap().ino_to_path.get(&ino).cloned()
    }

    /// Inode for a conceptual path, if one was ever assigned.
    pub fn ino(&self, path: &Path) -> Option<u64> {
        self.inner.lock().unwrap().path_to_ino.get(path).copied()
    }
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_is_preassigned() {
        let table = InodeTable::new();
        assert_eq!(table.ino(Path::new("/")), Some(FUSE_ROOT_ID));
        assert_eq!(table.path(FUSE_ROOT_ID), Some(PathBuf::from("/")));
    }

    #[test]
    fn assignment_is_stable() {
        let table = InodeTable::new();
        let first = table.get_or_assign(Path::new("/Users/alice"));
        let second = table.get_or_assign(Path::new("/Users/alice"));
        assert_eq!(first, second);
    }

    #[test]
    fn distinct_paths_get_distinct_inodes() {
        let table = InodeTable::new();
        let a = table.get_or_assign(Path::new("/a"));
        let b = table.get_or_assign(Path::new("/b"));
        assert_ne!(a, b);
        assert_eq!(table.path(a), Some(PathBuf::from("/a")));
        assert_eq!(table.path(b), Some(PathBuf::from("/b")));
    }

    #[test]
    fn unknown_inode_has_no_path() {
        let table = InodeTable::new();
        assert_eq!(table.path(9999), None);
    }
}
