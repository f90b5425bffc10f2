//! One method per filesystem call, each taking a logical path.
//!
//! Every call asks the resolver for its backing path first. Read-class calls
//! see the live source tree for anything never promoted; write-class calls
//! promote before touching anything, so the source tree is never mutated.

use nix::sys::stat::{mknod, utimensat, Mode, SFlag, UtimensatFlags};
use nix::sys::statvfs::{statvfs, Statvfs};
use nix::sys::time::TimeSpec;
use nix::unistd::AccessFlags;
use std::ffi::OsString;
use std::fs::{self, DirBuilder, Metadata, OpenOptions};
use std::io;
use std::os::unix::fs::{DirBuilderExt, FileExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{FsError, FsResult};
use crate::overlay::file_handle::OpenParams;
use crate::overlay::{namer, LayerFs};

/// Flags that make `open` a write-class call.
const WRITE_INTENT_FLAGS: i32 = libc::O_WRONLY
    | libc::O_RDWR
    | libc::O_CREAT
    | libc::O_APPEND
    | libc::O_TRUNC
    | libc::O_EXCL;

/// The capability interface the dispatch layer drives.
pub trait Operations: Send + Sync + 'static {
    fn getattr(&self, path: &Path) -> FsResult<Metadata>;
    fn access(&self, path: &Path, mask: i32) -> FsResult<()>;
    fn statfs(&self, path: &Path) -> FsResult<Statvfs>;
    fn readdir(&self, path: &Path) -> FsResult<Vec<OsString>>;
    fn readlink(&self, path: &Path) -> FsResult<PathBuf>;
    fn mknod(&self, path: &Path, mode: u32, rdev: u64) -> FsResult<()>;
    fn mkdir(&self, path: &Path, mode: u32) -> FsResult<()>;
    fn rmdir(&self, path: &Path) -> FsResult<()>;
    fn unlink(&self, path: &Path) -> FsResult<()>;
    fn rename(&self, from: &Path, to: &Path) -> FsResult<()>;
    fn symlink(&self, path: &Path, target: &Path) -> FsResult<()>;
    fn link(&self, existing: &Path, new: &Path) -> FsResult<()>;
    fn chmod(&self, path: &Path, mode: u32) -> FsResult<()>;
    fn chown(&self, path: &Path, uid: Option<u32>, gid: Option<u32>) -> FsResult<()>;
    fn utimens(
        &self,
        path: &Path,
        atime: Option<SystemTime>,
        mtime: Option<SystemTime>,
    ) -> FsResult<()>;
    fn truncate(&self, path: &Path, size: u64, fh: Option<u64>) -> FsResult<()>;
    fn open(&self, path: &Path, flags: i32) -> FsResult<u64>;
    fn create(&self, path: &Path, mode: u32, flags: i32) -> FsResult<u64>;
    fn read(&self, path: &Path, fh: u64, offset: u64, size: u32) -> FsResult<Vec<u8>>;
    fn write(&self, path: &Path, fh: u64, offset: u64, data: &[u8]) -> FsResult<usize>;
    fn flush(&self, path: &Path, fh: u64) -> FsResult<()>;
    fn fsync(&self, path: &Path, fh: u64, datasync: bool) -> FsResult<()>;
    fn release(&self, path: &Path, fh: u64) -> FsResult<()>;
}

impl LayerFs {
    /// Entries are only created inside an existing directory. Checked before
    /// promotion so a bad parent never leaves anything behind.
    fn require_parent_dir(&self, logical: &Path) -> FsResult<()> {
        let Some(parent) = namer::parent(logical) else {
            return Err(errno_at(logical, libc::EEXIST));
        };
        let backing = self.resolve(parent, false)?;
        match fs::metadata(&backing) {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(FsError::NotADirectory(parent.to_path_buf())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(FsError::NotFound(parent.to_path_buf()))
            }
            Err(e) => Err(FsError::io(backing, e)),
        }
    }

    /// Write-class calls on an existing entry check it before promoting, so a
    /// missing path is not recorded in the ledger.
    fn require_exists(&self, logical: &Path) -> FsResult<Metadata> {
        let backing = self.resolve(logical, false)?;
        fs::symlink_metadata(&backing).map_err(|e| FsError::io(backing, e))
    }

    /// Current entry at `logical`, if any, without promoting it.
    fn existing(&self, logical: &Path) -> FsResult<Option<Metadata>> {
        let backing = self.resolve(logical, false)?;
        match fs::symlink_metadata(&backing) {
            Ok(meta) => Ok(Some(meta)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(FsError::io(backing, e)),
        }
    }

    /// Creating calls refuse an occupied name before anything is copied up.
    fn require_absent(&self, logical: &Path) -> FsResult<()> {
        match self.existing(logical)? {
            Some(_) => Err(errno_at(logical, libc::EEXIST)),
            None => Ok(()),
        }
    }

    fn require_empty_dir(&self, logical: &Path) -> FsResult<()> {
        if self.list_entries(logical)?.is_empty() {
            Ok(())
        } else {
            Err(errno_at(logical, libc::ENOTEMPTY))
        }
    }

    /// The checks `rename(2)` makes on its destination, done up front.
    fn check_rename_target(&self, from: &Metadata, to: &Path) -> FsResult<()> {
        let Some(target) = self.existing(to)? else {
            return Ok(());
        };
        match (from.is_dir(), target.is_dir()) {
            (true, true) => self.require_empty_dir(to),
            (true, false) => Err(FsError::NotADirectory(to.to_path_buf())),
            (false, true) => Err(errno_at(to, libc::EISDIR)),
            (false, false) => Ok(()),
        }
    }

    /// What `open(2)` would refuse for these flags, decided before promotion.
    fn check_open_for_write(&self, logical: &Path, flags: i32) -> FsResult<()> {
        if flags & libc::O_CREAT != 0 {
            self.require_parent_dir(logical)?;
        }
        match self.existing(logical)? {
            None if flags & libc::O_CREAT == 0 => Err(FsError::NotFound(logical.to_path_buf())),
            None => Ok(()),
            Some(_) if flags & libc::O_CREAT != 0 && flags & libc::O_EXCL != 0 => {
                Err(errno_at(logical, libc::EEXIST))
            }
            Some(meta) if meta.is_dir() => Err(errno_at(logical, libc::EISDIR)),
            Some(_) => Ok(()),
        }
    }

    fn link_dir(&self, logical: &Path) -> PathBuf {
        self.mount_path(namer::parent(logical).unwrap_or(logical))
    }
}

fn errno_at(logical: &Path, code: i32) -> FsError {
    FsError::io(logical, io::Error::from_raw_os_error(code))
}

fn timespec(time: Option<SystemTime>) -> TimeSpec {
    match time {
        Some(t) => TimeSpec::from_duration(t.duration_since(UNIX_EPOCH).unwrap_or_default()),
        None => TimeSpec::new(0, libc::UTIME_OMIT as _),
    }
}

impl Operations for LayerFs {
    fn getattr(&self, path: &Path) -> FsResult<Metadata> {
        tracing::trace!("getattr({})", path.display());
        let backing = self.resolve(path, false)?;
        fs::symlink_metadata(&backing).map_err(|e| FsError::io(backing, e))
    }

    fn access(&self, path: &Path, mask: i32) -> FsResult<()> {
        let backing = self.resolve(path, false)?;
        match nix::unistd::access(&backing, AccessFlags::from_bits_truncate(mask)) {
            Ok(()) => Ok(()),
            Err(nix::errno::Errno::EACCES) => Err(FsError::PermissionDenied(path.to_path_buf())),
            Err(errno) => Err(FsError::io(backing, io::Error::from(errno))),
        }
    }

    fn statfs(&self, path: &Path) -> FsResult<Statvfs> {
        let backing = self.resolve(path, false)?;
        statvfs(&backing).map_err(|errno| FsError::io(backing, io::Error::from(errno)))
    }

    fn readdir(&self, path: &Path) -> FsResult<Vec<OsString>> {
        tracing::debug!("readdir({})", path.display());
        self.list_entries(path)
    }

    fn readlink(&self, path: &Path) -> FsResult<PathBuf> {
        let backing = self.resolve(path, false)?;
        let raw = fs::read_link(&backing).map_err(|e| FsError::io(&backing, e))?;
        self.link_context()
            .rewrite_symlink_target(&raw, &self.link_dir(path))
    }

    fn mknod(&self, path: &Path, mode: u32, rdev: u64) -> FsResult<()> {
        tracing::debug!("mknod({}, mode={:o})", path.display(), mode);
        self.require_parent_dir(path)?;
        self.require_absent(path)?;
        let backing = self.resolve(path, true)?;

        let kind = mode & libc::S_IFMT as u32;
        if kind == 0 || kind == libc::S_IFREG as u32 {
            OpenOptions::new()
                .write(true)
                .create_new(true)
                .mode(mode & 0o7777)
                .open(&backing)
                .map_err(|e| FsError::io(&backing, e))?;
            return Ok(());
        }

        mknod(
            &backing,
            SFlag::from_bits_truncate(kind as libc::mode_t),
            Mode::from_bits_truncate((mode & 0o7777) as libc::mode_t),
            rdev as libc::dev_t,
        )
        .map_err(|errno| FsError::io(backing, io::Error::from(errno)))
    }

    fn mkdir(&self, path: &Path, mode: u32) -> FsResult<()> {
        tracing::debug!("mkdir({}, mode={:o})", path.display(), mode);
        self.require_parent_dir(path)?;
        self.require_absent(path)?;
        let backing = self.resolve(path, true)?;
        DirBuilder::new()
            .mode(mode & 0o7777)
            .create(&backing)
            .map_err(|e| FsError::io(backing, e))
    }

    fn rmdir(&self, path: &Path) -> FsResult<()> {
        tracing::debug!("rmdir({})", path.display());
        let meta = self.require_exists(path)?;
        if !meta.is_dir() {
            return Err(FsError::NotADirectory(path.to_path_buf()));
        }
        self.require_empty_dir(path)?;
        let backing = self.resolve(path, true)?;
        fs::remove_dir(&backing).map_err(|e| FsError::io(backing, e))
    }

    fn unlink(&self, path: &Path) -> FsResult<()> {
        tracing::debug!("unlink({})", path.display());
        if self.require_exists(path)?.is_dir() {
            return Err(errno_at(path, libc::EISDIR));
        }
        let backing = self.resolve(path, true)?;
        fs::remove_file(&backing).map_err(|e| FsError::io(backing, e))
    }

    fn rename(&self, from: &Path, to: &Path) -> FsResult<()> {
        tracing::debug!("rename({} -> {})", from.display(), to.display());
        let source = self.require_exists(from)?;
        self.require_parent_dir(to)?;
        self.check_rename_target(&source, to)?;
        let old = self.resolve(from, true)?;
        let new = self.resolve(to, true)?;
        fs::rename(&old, &new).map_err(|e| FsError::io(old, e))
    }

    fn symlink(&self, path: &Path, target: &Path) -> FsResult<()> {
        tracing::debug!("symlink({} -> {})", path.display(), target.display());
        self.link_context()
            .validate_symlink_creation(target, &self.link_dir(path))?;
        self.require_parent_dir(path)?;
        self.require_absent(path)?;
        let backing = self.resolve(path, true)?;
        std::os::unix::fs::symlink(target, &backing).map_err(|e| FsError::io(backing, e))
    }

    fn link(&self, existing: &Path, new: &Path) -> FsResult<()> {
        tracing::debug!("link({} -> {})", new.display(), existing.display());
        if !self.options.allow_hardlinks {
            return Err(FsError::HardlinksDisabled(new.to_path_buf()));
        }
        if self.require_exists(existing)?.is_dir() {
            return Err(errno_at(existing, libc::EPERM));
        }
        self.require_parent_dir(new)?;
        self.require_absent(new)?;
        let original = self.resolve(existing, true)?;
        let link = self.resolve(new, true)?;
        fs::hard_link(&original, &link).map_err(|e| FsError::io(link, e))
    }

    fn chmod(&self, path: &Path, mode: u32) -> FsResult<()> {
        tracing::debug!("chmod({}, {:o})", path.display(), mode);
        self.require_exists(path)?;
        let backing = self.resolve(path, true)?;
        fs::set_permissions(&backing, fs::Permissions::from_mode(mode & 0o7777))
            .map_err(|e| FsError::io(backing, e))
    }

    fn chown(&self, path: &Path, uid: Option<u32>, gid: Option<u32>) -> FsResult<()> {
        tracing::debug!("chown({}, {:?}, {:?})", path.display(), uid, gid);
        self.require_exists(path)?;
        let backing = self.resolve(path, true)?;
        std::os::unix::fs::lchown(&backing, uid, gid).map_err(|e| FsError::io(backing, e))
    }

    fn utimens(
        &self,
        path: &Path,
        atime: Option<SystemTime>,
        mtime: Option<SystemTime>,
    ) -> FsResult<()> {
        tracing::debug!("utimens({})", path.display());
        self.require_exists(path)?;
        let backing = self.resolve(path, true)?;
        utimensat(
            None,
            &backing,
            &timespec(atime),
            &timespec(mtime),
            UtimensatFlags::NoFollowSymlink,
        )
        .map_err(|errno| FsError::io(backing, io::Error::from(errno)))
    }

    fn truncate(&self, path: &Path, size: u64, fh: Option<u64>) -> FsResult<()> {
        tracing::debug!("truncate({}, size={}, fh={:?})", path.display(), size, fh);
        if self.require_exists(path)?.is_dir() {
            return Err(errno_at(path, libc::EISDIR));
        }
        let backing = self.resolve(path, true)?;
        let file = match fh {
            Some(fh) => self.handles.descriptor_for(fh, &backing)?,
            None => std::sync::Arc::new(
                OpenOptions::new()
                    .write(true)
                    .open(&backing)
                    .map_err(|e| FsError::io(&backing, e))?,
            ),
        };
        file.set_len(size).map_err(|e| FsError::io(backing, e))
    }

    fn open(&self, path: &Path, flags: i32) -> FsResult<u64> {
        let intends_write = flags & WRITE_INTENT_FLAGS != 0;
        tracing::debug!(
            "open({}, flags={:#x}, write={})",
            path.display(),
            flags,
            intends_write
        );
        if intends_write {
            self.check_open_for_write(path, flags)?;
        }
        let backing = self.resolve(path, intends_write)?;
        self.handles.open_handle(&backing, OpenParams::new(flags))
    }

    fn create(&self, path: &Path, mode: u32, flags: i32) -> FsResult<u64> {
        tracing::debug!("create({}, mode={:o})", path.display(), mode);
        self.check_open_for_write(path, flags | libc::O_CREAT)?;
        let backing = self.resolve(path, true)?;

        let access = if flags & libc::O_ACCMODE == libc::O_RDWR {
            libc::O_RDWR
        } else {
            libc::O_WRONLY
        };
        let flags = (flags & !libc::O_ACCMODE) | access | libc::O_CREAT;
        self.handles
            .open_handle(&backing, OpenParams::with_mode(flags, mode & 0o7777))
    }

    fn read(&self, path: &Path, fh: u64, offset: u64, size: u32) -> FsResult<Vec<u8>> {
        tracing::trace!("read({}, fh={}, offset={}, size={})", path.display(), fh, offset, size);
        let backing = self.resolve(path, false)?;
        let file = self.handles.descriptor_for(fh, &backing)?;

        let mut buf = vec![0u8; size as usize];
        let mut filled = 0;
        while filled < buf.len() {
            match file.read_at(&mut buf[filled..], offset + filled as u64) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(FsError::io(backing, e)),
            }
        }
        buf.truncate(filled);
        Ok(buf)
    }

    fn write(&self, path: &Path, fh: u64, offset: u64, data: &[u8]) -> FsResult<usize> {
        tracing::trace!("write({}, fh={}, offset={}, len={})", path.display(), fh, offset, data.len());
        let backing = self.resolve(path, true)?;
        let file = self.handles.descriptor_for(fh, &backing)?;
        file.write_all_at(data, offset)
            .map_err(|e| FsError::io(backing, e))?;
        Ok(data.len())
    }

    fn flush(&self, _path: &Path, _fh: u64) -> FsResult<()> {
        Ok(())
    }

    fn fsync(&self, path: &Path, fh: u64, datasync: bool) -> FsResult<()> {
        tracing::debug!("fsync({}, fh={}, datasync={})", path.display(), fh, datasync);
        let backing = self.resolve(path, false)?;
        let file = self.handles.descriptor_for(fh, &backing)?;
        let result = if datasync {
            file.sync_data()
        } else {
            file.sync_all()
        };
        result.map_err(|e| FsError::io(backing, e))
    }

    fn release(&self, path: &Path, fh: u64) -> FsResult<()> {
        tracing::trace!("release({}, fh={})", path.display(), fh);
        self.handles.release(fh);
        Ok(())
    }
}
