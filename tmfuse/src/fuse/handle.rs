//! Open-file handle bookkeeping.
//!
//! Each successful open allocates a handle id and records the stream it
//! opened; read and release take that id explicitly. Handles are read-only
//! by construction: the table only ever holds files opened for reading.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// An active read-only stream on a resolved real path.
pub struct OpenFile {
    /// Conceptual path the open was issued against.
    pub conceptual: PathBuf,
    /// Real path the stream was opened on.
    pub real: PathBuf,
    file: Mutex<File>,
}

impl OpenFile {
    pub fn new(conceptual: PathBuf, real: PathBuf, file: File) -> Self {
        Self {
            conceptual,
            real,
            file: Mutex::new(file),
        }
    }

    /// Read up to `size` bytes at `offset`. Short reads at end-of-file are
    /// returned as-is.
    pub fn read_at(&self, offset: u64, size: usize) -> io::Result<Vec<u8>> {
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(offset))?;

        let mut buffer = vec![0u8; size];
        let n = file.read(&mut buffer)?;
        buffer.truncate(n);
        Ok(buffer)
    }
}

/// Table of open handles, keyed by a monotonically allocated id.
///
/// Insert and remove are serialized behind one mutex so a release racing
/// an open can never corrupt the map.
pub struct HandleTable {
    inner: Mutex<Inner>,
}

struct Inner {
    handles: HashMap<u64, Arc<OpenFile>>,
    next_fh: u64,
}

impl HandleTable {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                handles: HashMap::new(),
                next_fh: 1,
            }),
        }
    }

    /// Register an open file and return its handle id.
    pub fn insert(&self, open: OpenFile) -> u64 {
        let mut inner = self.inner.lock().unwrap();
        let fh = inner.next_fh;
        inner.next_fh += 1;
        inner.handles.insert(fh, Arc::new(open));
        fh
    }

    /// Look up a handle without removing it.
    pub fn get(&self, fh: u64) -> Option<Arc<OpenFile>> {
        self.inner.lock().unwrap().handles.get(&fh).cloned()
    }

    /// Remove a handle; dropping the returned value closes the stream.
    pub fn remove(&self, fh: u64) -> Option<Arc<OpenFile>> {
        self.inner.lock().unwrap().handles.remove(&fh)
    }

    /// Number of currently open handles.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn open_fixture(contents: &[u8]) -> (tempfile::TempDir, OpenFile) {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("data.bin");
        fs::write(&path, contents).unwrap();
        let file = File::open(&path).unwrap();
        let open = OpenFile::new(PathBuf::from("/data.bin"), path, file);
        (tmp, open)
    }

    #[test]
    fn handle_ids_are_unique() {
        let table = HandleTable::new();
        let (_tmp_a, a) = open_fixture(b"a");
        let (_tmp_b, b) = open_fixture(b"b");

        let fh_a = table.insert(a);
        let fh_b = table.insert(b);
        assert_ne!(fh_a, fh_b);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn read_at_offset() {
        let (_tmp, open) = open_fixture(b"hello world");
        assert_eq!(open.read_at(6, 5).unwrap(), b"world");
    }

    #[test]
    fn read_past_eof_is_short() {
        let (_tmp, open) = open_fixture(b"abc");
        assert_eq!(open.read_at(1, 100).unwrap(), b"bc");
        assert_eq!(open.read_at(10, 4).unwrap(), b"");
    }

    #[test]
    fn remove_discards_the_entry() {
        let table = HandleTable::new();
        let (_tmp, open) = open_fixture(b"x");
        let fh = table.insert(open);

        assert!(table.get(fh).is_some());
        assert!(table.remove(fh).is_some());
        assert!(table.get(fh).is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn reads_through_a_shared_handle_are_consistent() {
        let table = HandleTable::new();
        let (_tmp, open) = open_fixture(b"0123456789");
        let fh = table.insert(open);

        let handle = table.get(fh).unwrap();
        assert_eq!(handle.read_at(0, 4).unwrap(), b"0123");
        assert_eq!(handle.read_at(4, 4).unwrap(), b"4567");
    }
}
