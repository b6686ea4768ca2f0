//! End-to-end tests over a synthetic backup store.
//!
//! Each test lays out a complete store fixture on disk (private directory,
//! Backups.backupdb tree, Latest pointer) and drives resolution and reads
//! through the public API, the same way the FUSE adapter does.

use std::fs::{self, File};
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use tmfuse::fuse::{HandleTable, OpenFile};
use tmfuse::store::{BackupStore, BACKUPS_DIR, PRIVATE_DIR_PREFIX, SNAPSHOT_POINTER};

/// Build a complete store for `host1` and return the (root, base) pair.
fn build_store(snapshot: &str) -> (TempDir, PathBuf) {
    let tmp = tempfile::tempdir().unwrap();
    fs::create_dir(tmp.path().join(PRIVATE_DIR_PREFIX)).unwrap();
    let host_dir = tmp.path().join(BACKUPS_DIR).join("host1");
    fs::create_dir_all(&host_dir).unwrap();
    let base = host_dir.join(snapshot);
    fs::create_dir(&base).unwrap();
    symlink(snapshot, host_dir.join(SNAPSHOT_POINTER)).unwrap();
    (tmp, base)
}

/// Create a zero-length disguised-directory marker with the given link
/// count by spreading hard links into a scratch directory.
fn make_marker(path: &Path, scratch: &Path, nlink: u64) {
    fs::write(path, b"").unwrap();
    fs::create_dir_all(scratch).unwrap();
    for i in 1..nlink {
        fs::hard_link(path, scratch.join(format!("link_{}", i))).unwrap();
    }
}

#[test]
fn latest_pointer_selects_the_snapshot_root() {
    let (tmp, base) = build_store("2024-01-01-000000");

    let store = BackupStore::open(tmp.path(), "host1").unwrap();

    assert_eq!(store.base_dir(), base);
    assert_eq!(store.resolve("/").unwrap(), base);
    assert_eq!(
        store.base_dir(),
        tmp.path()
            .join(BACKUPS_DIR)
            .join("host1")
            .join("2024-01-01-000000")
    );
}

#[test]
fn disguised_directory_contents_are_reachable() {
    let (tmp, base) = build_store("2024-02-02-000000");
    make_marker(&base.join("foo"), &tmp.path().join("scratch"), 150);
    let payload = tmp.path().join(PRIVATE_DIR_PREFIX).join("dir_150");
    fs::create_dir(&payload).unwrap();
    fs::write(payload.join("bar.txt"), b"hidden contents").unwrap();

    let store = BackupStore::open(tmp.path(), "host1").unwrap();

    let resolved = store.resolve("/foo/bar.txt").unwrap();
    assert_eq!(resolved, payload.join("bar.txt"));

    // Round-trip: the resolved path is readable iff the entry exists.
    assert_eq!(fs::read(&resolved).unwrap(), b"hidden contents");
    let absent = store.resolve("/foo/absent.txt").unwrap();
    assert!(fs::metadata(&absent).is_err());
}

#[test]
fn relative_symlink_matches_direct_resolution() {
    let (tmp, base) = build_store("2024-03-03-000000");
    fs::create_dir(base.join("Pictures")).unwrap();
    fs::write(base.join("Pictures/img.jpg"), b"jpeg bytes").unwrap();
    symlink("Pictures/img.jpg", base.join("latest_photo")).unwrap();

    let store = BackupStore::open(tmp.path(), "host1").unwrap();

    assert_eq!(
        store.resolve("/latest_photo").unwrap(),
        store.resolve("/Pictures/img.jpg").unwrap()
    );
}

#[test]
fn symlink_to_disguised_directory_entry_resolves() {
    let (tmp, base) = build_store("2024-04-04-000000");
    make_marker(&base.join("Documents"), &tmp.path().join("scratch"), 180);
    let payload = tmp.path().join(PRIVATE_DIR_PREFIX).join("dir_180");
    fs::create_dir(&payload).unwrap();
    fs::write(payload.join("thesis.tex"), b"\\documentclass{article}").unwrap();
    symlink("Documents/thesis.tex", base.join("current_work")).unwrap();

    let store = BackupStore::open(tmp.path(), "host1").unwrap();

    assert_eq!(
        store.resolve("/current_work").unwrap(),
        payload.join("thesis.tex")
    );
}

#[test]
fn resolution_is_idempotent_across_repeated_calls() {
    let (tmp, base) = build_store("2024-05-05-000000");
    fs::create_dir_all(base.join("a/b/c")).unwrap();

    let store = BackupStore::open(tmp.path(), "host1").unwrap();

    let first = store.resolve("/a/b/c").unwrap();
    let second = store.resolve("/a/b/c").unwrap();
    assert_eq!(first, second);
    assert_eq!(first, base.join("a/b/c"));
}

#[test]
fn reads_through_the_handle_table() {
    let (tmp, base) = build_store("2024-06-06-000000");
    fs::write(base.join("song.mp3"), b"ID3 and then some audio data").unwrap();

    let store = BackupStore::open(tmp.path(), "host1").unwrap();
    let real = store.resolve("/song.mp3").unwrap();

    let handles = HandleTable::new();
    let fh = handles.insert(OpenFile::new(
        PathBuf::from("/song.mp3"),
        real.clone(),
        File::open(&real).unwrap(),
    ));

    let handle = handles.get(fh).unwrap();
    assert_eq!(handle.read_at(0, 3).unwrap(), b"ID3");
    assert_eq!(handle.read_at(4, 3).unwrap(), b"and");

    handles.remove(fh);
    assert!(handles.get(fh).is_none());
}

#[test]
fn deep_paths_mixing_links_and_disguises_resolve() {
    let (tmp, base) = build_store("2024-07-07-000000");

    // /Users -> disguised directory whose payload holds a relative symlink
    // back into the conceptual tree.
    make_marker(&base.join("Users"), &tmp.path().join("scratch"), 123);
    let payload = tmp.path().join(PRIVATE_DIR_PREFIX).join("dir_123");
    fs::create_dir(&payload).unwrap();
    symlink("../shared/readme.md", payload.join("readme.md")).unwrap();
    fs::create_dir(base.join("shared")).unwrap();
    fs::write(base.join("shared/readme.md"), b"# shared").unwrap();

    let store = BackupStore::open(tmp.path(), "host1").unwrap();

    assert_eq!(
        store.resolve("/Users/readme.md").unwrap(),
        base.join("shared/readme.md")
    );
}
