//! Read-only FUSE filesystem over a backup store.
//!
//! Every operation follows the same shape: translate the inode back to its
//! conceptual path, resolve that to a real path, and delegate to an
//! ordinary filesystem call on the result. Attribute queries never follow
//! symlinks; the resolver is the only place link targets are interpreted.
//! All mutating operations fail with `ENOSYS` and have no side effects.

use std::ffi::{CString, OsStr};
use std::fs::{self, File};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fuser::{
    BackgroundSession, FileAttr, FileType, Filesystem, MountOption, ReplyAttr, ReplyCreate,
    ReplyData, ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyWrite, Request, TimeOrNow,
    FUSE_ROOT_ID,
};
use libc::{EACCES, EBADF, EIO, ENOENT, ENOSYS, ENOTDIR};
use tracing::{debug, info, warn};

use super::handle::{HandleTable, OpenFile};
use super::inode::InodeTable;
use crate::store::BackupStore;

/// Time-to-live for FUSE attribute caching.
const TTL: Duration = Duration::from_secs(1);

/// Read-only view over the latest snapshot of a backup store.
pub struct TimeMachineFS {
    store: BackupStore,
    inodes: InodeTable,
    handles: HandleTable,
    /// Invert the access() success mapping. One observed consumer of this
    /// store layout expected the opposite polarity; neither is documented,
    /// so the mapping is explicit and selectable.
    invert_access: bool,
}

impl TimeMachineFS {
    pub fn new(store: BackupStore) -> Self {
        Self {
            store,
            inodes: InodeTable::new(),
            handles: HandleTable::new(),
            invert_access: false,
        }
    }

    /// Select the inverted access() truth-value mapping.
    pub fn with_inverted_access(mut self, invert: bool) -> Self {
        self.invert_access = invert;
        self
    }

    pub fn store(&self) -> &BackupStore {
        &self.store
    }

    /// Mount the filesystem and serve requests until unmounted.
    ///
    /// `MountOption::RO` and the filesystem name are always applied;
    /// `extra` options are appended.
    pub fn mount(self, mountpoint: &Path, extra: &[MountOption]) -> std::io::Result<()> {
        let options = Self::mount_options(extra);
        info!("mounting backup store at {}", mountpoint.display());
        fuser::mount2(self, mountpoint, &options)
    }

    /// Mount in the background, returning a session handle that unmounts
    /// on drop. Used by tooling and tests.
    pub fn spawn_mount(
        self,
        mountpoint: &Path,
        extra: &[MountOption],
    ) -> std::io::Result<BackgroundSession> {
        let options = Self::mount_options(extra);
        info!(
            "mounting backup store (background) at {}",
            mountpoint.display()
        );
        fuser::spawn_mount2(self, mountpoint, &options)
    }

    fn mount_options(extra: &[MountOption]) -> Vec<MountOption> {
        let mut options = vec![MountOption::RO, MountOption::FSName("tmfuse".to_string())];
        options.extend_from_slice(extra);
        options
    }

    /// Conceptual and real path for an inode, or the errno to reply with.
    fn resolve_ino(&self, ino: u64) -> Result<(PathBuf, PathBuf), i32> {
        let conceptual = self.inodes.path(ino).ok_or(ENOENT)?;
        let real = self.store.resolve(&conceptual).map_err(|err| {
            warn!("resolution failed for {}: {}", conceptual.display(), err);
            EIO
        })?;
        Ok((conceptual, real))
    }

    /// Convert filesystem metadata to FUSE file attributes.
    fn metadata_to_attr(&self, ino: u64, metadata: &fs::Metadata) -> FileAttr {
        let kind = self.entry_kind(metadata);

        let mtime = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        let atime = metadata.accessed().unwrap_or(SystemTime::UNIX_EPOCH);
        let ctime = UNIX_EPOCH + Duration::from_secs(metadata.ctime().max(0) as u64);

        FileAttr {
            ino,
            size: metadata.size(),
            blocks: metadata.blocks(),
            atime,
            mtime,
            ctime,
            // No creation time on Linux; mtime is the closest stand-in.
            crtime: mtime,
            kind,
            perm: (metadata.mode() & 0o7777) as u16,
            nlink: metadata.nlink() as u32,
            uid: metadata.uid(),
            gid: metadata.gid(),
            rdev: metadata.rdev() as u32,
            blksize: metadata.blksize() as u32,
            flags: 0,
        }
    }

    /// File type from non-following metadata, counting disguised-directory
    /// markers as directories.
    fn entry_kind(&self, metadata: &fs::Metadata) -> FileType {
        if metadata.is_dir() {
            FileType::Directory
        } else if metadata.is_symlink() {
            FileType::Symlink
        } else if metadata.len() == 0 && metadata.nlink() >= self.store.link_threshold() {
            FileType::Directory
        } else {
            FileType::RegularFile
        }
    }

    /// File type for a directory entry at the given conceptual path.
    ///
    /// Symlink children are classified by what they resolve to, so the
    /// dirent type agrees with what a subsequent lookup reports (lookup
    /// resolves through the link). A link whose target does not exist is
    /// still reported as a symlink.
    fn child_kind(&self, child: &Path, metadata: &fs::Metadata) -> FileType {
        if !metadata.is_symlink() {
            return self.entry_kind(metadata);
        }
        match self.store.resolve(child) {
            Ok(real) => match fs::symlink_metadata(&real) {
                Ok(resolved) => self.entry_kind(&resolved),
                Err(_) => FileType::Symlink,
            },
            Err(_) => FileType::Symlink,
        }
    }

    /// Probe access on a real path, applying the configured polarity.
    fn check_access(&self, real: &Path, mask: i32) -> bool {
        let Ok(path) = CString::new(real.as_os_str().as_bytes()) else {
            return self.invert_access;
        };
        let accessible = unsafe { libc::access(path.as_ptr(), mask) } == 0;
        accessible != self.invert_access
    }

    /// Translate a delegation failure into the errno to reply with,
    /// preserving the kinds the protocol distinguishes.
    fn errno_for(err: &std::io::Error) -> i32 {
        match err.kind() {
            std::io::ErrorKind::NotFound => ENOENT,
            std::io::ErrorKind::PermissionDenied => EACCES,
            _ => err.raw_os_error().unwrap_or(EIO),
        }
    }
}

impl Filesystem for TimeMachineFS {
    fn lookup(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
        debug!("lookup: parent={}, name={:?}", parent, name);

        let parent_path = match self.inodes.path(parent) {
            Some(p) => p,
            None => {
                reply.error(ENOENT);
                return;
            }
        };

        let conceptual = parent_path.join(name);
        let real = match self.store.resolve(&conceptual) {
            Ok(p) => p,
            Err(err) => {
                warn!(
                    "lookup resolution failed for {}: {}",
                    conceptual.display(),
                    err
                );
                reply.error(EIO);
                return;
            }
        };

        match fs::symlink_metadata(&real) {
            Ok(metadata) => {
                let ino = self.inodes.get_or_assign(&conceptual);
                let attr = self.metadata_to_attr(ino, &metadata);
                reply.entry(&TTL, &attr, 0);
            }
            Err(err) => reply.error(Self::errno_for(&err)),
        }
    }

    fn getattr(&mut self, _req: &Request, ino: u64, reply: ReplyAttr) {
        debug!("getattr: ino={}", ino);

        let (_, real) = match self.resolve_ino(ino) {
            Ok(paths) => paths,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };

        match fs::symlink_metadata(&real) {
            Ok(metadata) => {
                let attr = self.metadata_to_attr(ino, &metadata);
                reply.attr(&TTL, &attr);
            }
            Err(err) => reply.error(Self::errno_for(&err)),
        }
    }

    fn readlink(&mut self, _req: &Request, ino: u64, reply: ReplyData) {
        debug!("readlink: ino={}", ino);

        let (_, real) = match self.resolve_ino(ino) {
            Ok(paths) => paths,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };

        match fs::read_link(&real) {
            Ok(target) => reply.data(target.as_os_str().as_bytes()),
            Err(err) => reply.error(Self::errno_for(&err)),
        }
    }

    fn open(&mut self, _req: &Request, ino: u64, flags: i32, reply: ReplyOpen) {
        debug!("open: ino={}, flags={:#o}", ino, flags);

        let (conceptual, real) = match self.resolve_ino(ino) {
            Ok(paths) => paths,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };

        // The store is immutable; requested flags are ignored and the
        // stream is always opened read-only.
        match File::open(&real) {
            Ok(file) => {
                let fh = self.handles.insert(OpenFile::new(conceptual, real, file));
                reply.opened(fh, 0);
            }
            Err(err) => reply.error(Self::errno_for(&err)),
        }
    }

    fn read(
        &mut self,
        _req: &Request,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        debug!(
            "read: ino={}, fh={}, offset={}, size={}",
            ino, fh, offset, size
        );

        let handle = match self.handles.get(fh) {
            Some(h) => h,
            None => {
                reply.error(EBADF);
                return;
            }
        };

        match handle.read_at(offset.max(0) as u64, size as usize) {
            Ok(data) => reply.data(&data),
            Err(err) => {
                warn!("read failed on {}: {}", handle.real.display(), err);
                reply.error(Self::errno_for(&err));
            }
        }
    }

    fn release(
        &mut self,
        _req: &Request,
        ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        debug!("release: ino={}, fh={}", ino, fh);
        self.handles.remove(fh);
        reply.ok();
    }

    fn readdir(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        debug!("readdir: ino={}, offset={}", ino, offset);

        let (conceptual, real) = match self.resolve_ino(ino) {
            Ok(paths) => paths,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };

        if !real.is_dir() {
            reply.error(ENOTDIR);
            return;
        }

        let mut entries: Vec<(u64, FileType, std::ffi::OsString)> = Vec::new();
        entries.push((ino, FileType::Directory, ".".into()));

        let parent_ino = if ino == FUSE_ROOT_ID {
            FUSE_ROOT_ID
        } else {
            conceptual
                .parent()
                .and_then(|p| self.inodes.ino(p))
                .unwrap_or(FUSE_ROOT_ID)
        };
        entries.push((parent_ino, FileType::Directory, "..".into()));

        let dir_entries = match fs::read_dir(&real) {
            Ok(iter) => iter,
            Err(err) => {
                warn!("readdir failed on {}: {}", real.display(), err);
                reply.error(Self::errno_for(&err));
                return;
            }
        };

        for entry in dir_entries.flatten() {
            // DirEntry::metadata does not traverse symlinks, matching the
            // non-following attribute policy.
            if let Ok(metadata) = entry.metadata() {
                let child = conceptual.join(entry.file_name());
                let child_ino = self.inodes.get_or_assign(&child);
                let kind = self.child_kind(&child, &metadata);
                entries.push((child_ino, kind, entry.file_name()));
            }
        }

        for (i, (entry_ino, kind, name)) in entries.into_iter().enumerate().skip(offset as usize) {
            if reply.add(entry_ino, (i + 1) as i64, kind, &name) {
                break;
            }
        }
        reply.ok();
    }

    fn access(&mut self, _req: &Request, ino: u64, mask: i32, reply: ReplyEmpty) {
        debug!("access: ino={}, mask={:#o}", ino, mask);

        let (_, real) = match self.resolve_ino(ino) {
            Ok(paths) => paths,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };

        if self.check_access(&real, mask) {
            reply.ok();
        } else {
            reply.error(EACCES);
        }
    }

    // The store is immutable: every mutating operation fails without side
    // effects.

    fn setattr(
        &mut self,
        _req: &Request,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        _size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        debug!("setattr rejected: ino={}", ino);
        reply.error(ENOSYS);
    }

    fn mknod(
        &mut self,
        _req: &Request,
        _parent: u64,
        _name: &OsStr,
        _mode: u32,
        _umask: u32,
        _rdev: u32,
        reply: ReplyEntry,
    ) {
        reply.error(ENOSYS);
    }

    fn mkdir(
        &mut self,
        _req: &Request,
        _parent: u64,
        _name: &OsStr,
        _mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        reply.error(ENOSYS);
    }

    fn unlink(&mut self, _req: &Request, _parent: u64, _name: &OsStr, reply: ReplyEmpty) {
        reply.error(ENOSYS);
    }

    fn rmdir(&mut self, _req: &Request, _parent: u64, _name: &OsStr, reply: ReplyEmpty) {
        reply.error(ENOSYS);
    }

    fn symlink(
        &mut self,
        _req: &Request,
        _parent: u64,
        _link_name: &OsStr,
        _target: &Path,
        reply: ReplyEntry,
    ) {
        reply.error(ENOSYS);
    }

    fn rename(
        &mut self,
        _req: &Request,
        _parent: u64,
        _name: &OsStr,
        _newparent: u64,
        _newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        reply.error(ENOSYS);
    }

    fn link(
        &mut self,
        _req: &Request,
        _ino: u64,
        _newparent: u64,
        _newname: &OsStr,
        reply: ReplyEntry,
    ) {
        reply.error(ENOSYS);
    }

    fn write(
        &mut self,
        _req: &Request,
        _ino: u64,
        _fh: u64,
        _offset: i64,
        _data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        reply.error(ENOSYS);
    }

    fn create(
        &mut self,
        _req: &Request,
        _parent: u64,
        _name: &OsStr,
        _mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        reply.error(ENOSYS);
    }

    fn fsync(&mut self, _req: &Request, _ino: u64, _fh: u64, _datasync: bool, reply: ReplyEmpty) {
        reply.error(ENOSYS);
    }
}
