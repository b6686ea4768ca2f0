//! Backup store validation and layout.
//!
//! A Time Machine volume has a well-known shape:
//!
//! ```text
//! <root>/
//! ├── .HFS+ Private Directory Data␍/     disguised-directory payloads (dir_<nlink>)
//! └── Backups.backupdb/
//!     └── <host>/
//!         ├── Latest -> 2024-01-01-000000    snapshot pointer (symlink)
//!         └── 2024-01-01-000000/             snapshot root (the "base directory")
//! ```
//!
//! [`BackupStore::open`] validates this shape once at startup and captures the
//! private directory and base directory. The resulting value is immutable for
//! the lifetime of the mount; all path resolution happens against it.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Name prefix of the hidden directory holding directory-hard-link payloads.
///
/// Real volumes suffix this with a carriage return and the volume name, so
/// only the prefix is matched.
pub const PRIVATE_DIR_PREFIX: &str = ".HFS+ Private Directory Data";

/// Directory under the store root containing per-host backup sets.
pub const BACKUPS_DIR: &str = "Backups.backupdb";

/// Name of the per-host symlink pointing at the most recent snapshot.
pub const SNAPSHOT_POINTER: &str = "Latest";

/// Hard-link count at which a zero-length file is treated as a directory
/// hard link.
///
/// This is an empirical heuristic tied to how HFS+ encodes directory hard
/// links, observed rather than documented. It is configurable via
/// [`BackupStore::with_link_threshold`].
pub const DEFAULT_LINK_THRESHOLD: u64 = 100;

/// Errors that can occur while opening a backup store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Store root missing or unreadable.
    #[error("cannot read store root {path}: {source}")]
    Unreadable { path: PathBuf, source: io::Error },

    /// No private directory entry under the store root.
    #[error("no '.HFS+ Private Directory Data' entry under {path}: not a Time Machine volume")]
    PrivateDirMissing { path: PathBuf },

    /// The requested host has no snapshot pointer.
    #[error("host '{host}' has no snapshot pointer at {path}")]
    UnknownHost { host: String, path: PathBuf },

    /// The snapshot pointer exists but is not a symlink.
    #[error("snapshot pointer {path} is not a symlink: {source}")]
    SnapshotPointerInvalid { path: PathBuf, source: io::Error },

    /// The snapshot pointer targets something that is not a directory.
    #[error("snapshot pointer {pointer} targets {target}, which is not a directory")]
    SnapshotMissing { pointer: PathBuf, target: PathBuf },
}

/// A validated backup store.
///
/// Produced once by [`BackupStore::open`] and never mutated afterwards. The
/// resolver and the FUSE adapter both borrow it; concurrent use is safe
/// because every field is read-only.
#[derive(Debug, Clone)]
pub struct BackupStore {
    root: PathBuf,
    private_dir: PathBuf,
    base_dir: PathBuf,
    link_threshold: u64,
}

impl BackupStore {
    /// Open and validate a backup store for the given host.
    ///
    /// # Arguments
    ///
    /// * `root` - Path to the backup volume root
    /// * `host` - Host name whose latest snapshot should be exposed
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the root is unreadable, the private
    /// directory is missing, the host has no snapshot pointer, or the
    /// pointer does not lead to a directory. All of these are fatal at
    /// startup; a mount must not proceed past them.
    pub fn open(root: impl AsRef<Path>, host: &str) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();

        let entries = fs::read_dir(&root).map_err(|source| StoreError::Unreadable {
            path: root.clone(),
            source,
        })?;

        let private_dir = entries
            .flatten()
            .find(|e| e.file_name().to_string_lossy().starts_with(PRIVATE_DIR_PREFIX))
            .map(|e| e.path())
            .ok_or_else(|| StoreError::PrivateDirMissing { path: root.clone() })?;
        debug!("private directory: {}", private_dir.display());

        let pointer = root.join(BACKUPS_DIR).join(host).join(SNAPSHOT_POINTER);
        if fs::symlink_metadata(&pointer).is_err() {
            return Err(StoreError::UnknownHost {
                host: host.to_string(),
                path: pointer,
            });
        }

        let target = fs::read_link(&pointer).map_err(|source| StoreError::SnapshotPointerInvalid {
            path: pointer.clone(),
            source,
        })?;

        // Relative pointer targets are relative to the pointer's own
        // directory (the per-host directory).
        let base_dir = if target.is_absolute() {
            target.clone()
        } else {
            pointer.parent().unwrap_or(Path::new("/")).join(&target)
        };

        if !base_dir.is_dir() {
            return Err(StoreError::SnapshotMissing {
                pointer,
                target: base_dir,
            });
        }

        info!(
            "opened backup store for host '{}': latest snapshot at {}",
            host,
            base_dir.display()
        );

        Ok(Self {
            root,
            private_dir,
            base_dir,
            link_threshold: DEFAULT_LINK_THRESHOLD,
        })
    }

    /// Override the disguised-directory link-count threshold.
    pub fn with_link_threshold(mut self, threshold: u64) -> Self {
        self.link_threshold = threshold;
        self
    }

    /// Store root the volume was opened from.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The hidden directory holding directory-hard-link payloads.
    pub fn private_dir(&self) -> &Path {
        &self.private_dir
    }

    /// Root of the latest snapshot; all conceptual paths resolve against it.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Hard-link count at which a zero-length file is treated as a
    /// directory hard link.
    pub fn link_threshold(&self) -> u64 {
        self.link_threshold
    }

    /// Real location of a disguised directory's payload, named by the
    /// marker's hard-link count.
    pub fn disguised_dir(&self, nlink: u64) -> PathBuf {
        self.private_dir.join(format!("dir_{}", nlink))
    }
}
