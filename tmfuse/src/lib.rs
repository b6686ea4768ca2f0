//! tmfuse - browse Time Machine backups as an ordinary directory tree.
//!
//! This library exposes a read-only virtual filesystem view over an
//! HFS+-formatted Time Machine volume. The interesting part is path
//! resolution: the store represents directory hard links as zero-length
//! files with high link counts, with the real contents hidden in a private
//! directory, and stores relative symlinks that only make sense at their
//! virtual location. The [`resolver`] translates both; the [`fuse`]
//! adapter is plain delegation on the resolved paths.
//!
//! # Usage
//!
//! ```ignore
//! use tmfuse::fuse::TimeMachineFS;
//! use tmfuse::store::BackupStore;
//!
//! let store = BackupStore::open("/mnt/backup-volume", "my-mac")?;
//! TimeMachineFS::new(store).mount("/mnt/latest".as_ref(), &[])?;
//! ```

pub mod fuse;
pub mod logging;
pub mod resolver;
pub mod store;

/// Version of the tmfuse library and CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
