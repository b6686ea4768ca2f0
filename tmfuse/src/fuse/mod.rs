//! FUSE adapter for browsing backup snapshots.
//!
//! [`TimeMachineFS`] exposes the latest snapshot of a [`BackupStore`] as an
//! ordinary read-only directory tree. Inode and open-handle bookkeeping
//! live in their own submodules; the resolver does the actual path work.
//!
//! [`BackupStore`]: crate::store::BackupStore

mod filesystem;
mod handle;
mod inode;

pub use filesystem::TimeMachineFS;
pub use handle::{HandleTable, OpenFile};
