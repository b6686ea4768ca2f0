//! Conceptual-to-real path translation.
//!
//! The virtual tree presented to the consumer does not match the on-disk
//! layout in two ways:
//!
//! - Directory hard links are stored as zero-length files with a high
//!   hard-link count; their real contents live in the store's private
//!   directory under `dir_<nlink>`.
//! - Symlinks inside a snapshot are frequently relative to their
//!   *conceptual* location, so their targets must themselves be translated
//!   rather than followed by the kernel.
//!
//! [`BackupStore::resolve`] walks a conceptual path one component at a time
//! and produces the corresponding real path. It is deterministic, performs
//! no caching, and never fails on a missing entry: the best-computed path
//! is returned and the caller's subsequent filesystem call surfaces the
//! absence. The only error is a symlink cycle, bounded by a fixed
//! recursion depth.

use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tracing::trace;

use crate::store::BackupStore;

/// Maximum symlink indirections before resolution is abandoned.
///
/// Matches the conventional kernel symlink limit. A healthy snapshot never
/// comes close; hitting it means the store carries a link cycle.
const MAX_LINK_DEPTH: u32 = 40;

/// Errors that can occur during path resolution.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// Symlink indirection exceeded the maximum depth.
    #[error("symlink cycle detected while resolving {path}")]
    LinkCycle { path: PathBuf },
}

impl BackupStore {
    /// Translate a conceptual path into its real on-disk path.
    ///
    /// `/` and the empty path resolve to the base directory unchanged.
    /// Missing intermediate components are carried forward literally; only
    /// a symlink cycle is an error.
    pub fn resolve(&self, conceptual: impl AsRef<Path>) -> Result<PathBuf, ResolveError> {
        let conceptual = normalize(conceptual.as_ref());
        self.resolve_depth(&conceptual, 0)
    }

    fn resolve_depth(&self, conceptual: &Path, depth: u32) -> Result<PathBuf, ResolveError> {
        if depth > MAX_LINK_DEPTH {
            return Err(ResolveError::LinkCycle {
                path: conceptual.to_path_buf(),
            });
        }

        let mut real = self.base_dir().to_path_buf();
        // Conceptual location of the components consumed so far. Relative
        // symlink targets are joined against this, not against `real`.
        let mut seen = PathBuf::from("/");

        for component in conceptual.components() {
            let name = match component {
                Component::Normal(name) => name,
                _ => continue,
            };

            let mut candidate = real.join(name);

            match fs::read_link(&candidate) {
                Ok(target) => {
                    let link_conceptual = if target.is_absolute() {
                        normalize(&target)
                    } else {
                        normalize(&seen.join(&target))
                    };
                    trace!(
                        "symlink {} -> {}, re-resolving {}",
                        candidate.display(),
                        target.display(),
                        link_conceptual.display()
                    );
                    candidate = self.resolve_depth(&link_conceptual, depth + 1)?;
                    seen = link_conceptual;
                }
                Err(_) => seen.push(name),
            }

            if candidate.is_dir() {
                real = candidate;
                continue;
            }

            real = match fs::symlink_metadata(&candidate) {
                Ok(meta)
                    if meta.is_file()
                        && meta.len() == 0
                        && meta.nlink() >= self.link_threshold() =>
                {
                    // Directory hard link: the payload lives in the private
                    // directory, named by the marker's link count.
                    let payload = self.disguised_dir(meta.nlink());
                    trace!(
                        "disguised directory {} -> {}",
                        candidate.display(),
                        payload.display()
                    );
                    payload
                }
                _ => candidate,
            };
        }

        Ok(real)
    }
}

/// Lexically normalize a conceptual path: root it, drop `.` segments, and
/// resolve `..` against the accumulated prefix.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::from("/");
    for component in path.components() {
        match component {
            Component::Normal(name) => out.push(name),
            Component::ParentDir => {
                out.pop();
            }
            _ => {}
        }
    }
    out
}
