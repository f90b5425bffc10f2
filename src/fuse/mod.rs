//! Kernel-facing side of the overlay.
//!
//! The kernel speaks in inode numbers; the overlay speaks in logical paths.
//! `LayerFuse` keeps the mapping between the two and forwards every request
//! to an [`Operations`] implementation.

mod inodes;
pub mod mount;

pub use mount::{mount_fuse, unmount_fuse, MountHandle, MountSettings};

use fuser::{
    FileType, Filesystem, KernelConfig, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory,
    ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, Request, TimeOrNow,
    FUSE_ROOT_ID,
};
use fxhash::hash64;
use std::ffi::{OsStr, OsString};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::error::FsError;
use crate::overlay::convert::{metadata_to_fileattr, metadata_to_filetype};
use crate::overlay::{namer, Operations};
use inodes::InodeTable;

pub struct LayerFuse<O: Operations> {
    ops: Arc<O>,
    inodes: InodeTable,
    /// Attribute and entry cache timeout. Zero keeps source-tree changes
    /// visible on the very next call.
    ttl: Duration,
}

impl<O: Operations> LayerFuse<O> {
    pub fn new(ops: Arc<O>, ttl_secs: u64) -> Self {
        LayerFuse {
            ops,
            inodes: InodeTable::new(),
            ttl: Duration::from_secs(ttl_secs),
        }
    }

    fn path(&self, ino: u64) -> Result<PathBuf, i32> {
        match self.inodes.path_of(ino) {
            Some(path) => Ok(path.to_path_buf()),
            None => {
                tracing::warn!("inode {} not found", ino);
                Err(libc::ENOENT)
            }
        }
    }

    fn child_path(&self, parent: u64, name: &OsStr) -> Result<PathBuf, i32> {
        let parent_path = self.path(parent)?;
        Ok(namer::child(&parent_path, name))
    }

    /// Reply with a fresh entry for `path`, counting one kernel reference.
    fn reply_entry(&mut self, path: &Path, reply: ReplyEntry) {
        match self.ops.getattr(path) {
            Ok(meta) => {
                let ino = self.inodes.lookup(path);
                reply.entry(&self.ttl, &metadata_to_fileattr(&meta, ino), 0);
            }
            Err(e) => reply.error(errno("lookup", path, &e)),
        }
    }

    fn reply_attr(&self, ino: u64, path: &Path, reply: ReplyAttr) {
        match self.ops.getattr(path) {
            Ok(meta) => reply.attr(&self.ttl, &metadata_to_fileattr(&meta, ino)),
            Err(e) => reply.error(errno("getattr", path, &e)),
        }
    }
}

fn errno(op: &str, path: &Path, err: &FsError) -> i32 {
    let code = err.errno();
    if code == libc::ENOENT {
        tracing::trace!("{}({}): {}", op, path.display(), err);
    } else {
        tracing::debug!("{}({}): {}", op, path.display(), err);
    }
    code
}

/// Release a handle the kernel will never hear about.
fn discard_handle<O: Operations>(ops: &O, path: &Path, fh: u64) {
    if let Err(e) = ops.release(path, fh) {
        tracing::debug!("release({}, fh={}) of unreplied handle: {}", path.display(), fh, e);
    }
}

fn system_time(time: Option<TimeOrNow>) -> Option<SystemTime> {
    time.map(|t| match t {
        TimeOrNow::SpecificTime(t) => t,
        TimeOrNow::Now => SystemTime::now(),
    })
}

macro_rules! try_reply {
    ($reply:expr, $result:expr) => {
        match $result {
            Ok(value) => value,
            Err(code) => {
                $reply.error(code);
                return;
            }
        }
    };
}

impl<O: Operations> Filesystem for LayerFuse<O> {
    fn init(
        &mut self,
        _req: &Request,
        _config: &mut KernelConfig,
    ) -> std::result::Result<(), libc::c_int> {
        tracing::info!("LayerFS FUSE filesystem initialized");
        Ok(())
    }

    fn destroy(&mut self) {
        tracing::info!("LayerFS FUSE filesystem destroyed");
    }

    fn lookup(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
        tracing::trace!("lookup(parent={}, name={:?})", parent, name);
        let path = try_reply!(reply, self.child_path(parent, name));
        self.reply_entry(&path, reply);
    }

    fn forget(&mut self, _req: &Request, ino: u64, nlookup: u64) {
        self.inodes.forget(ino, nlookup);
    }

    fn getattr(&mut self, _req: &Request, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        let path = try_reply!(reply, self.path(ino));
        self.reply_attr(ino, &path, reply);
    }

    fn setattr(
        &mut self,
        _req: &Request,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let path = try_reply!(reply, self.path(ino));

        if let Some(mode) = mode {
            try_reply!(
                reply,
                self.ops.chmod(&path, mode).map_err(|e| errno("chmod", &path, &e))
            );
        }
        if uid.is_some() || gid.is_some() {
            try_reply!(
                reply,
                self.ops
                    .chown(&path, uid, gid)
                    .map_err(|e| errno("chown", &path, &e))
            );
        }
        if let Some(size) = size {
            try_reply!(
                reply,
                self.ops
                    .truncate(&path, size, fh)
                    .map_err(|e| errno("truncate", &path, &e))
            );
        }
        if atime.is_some() || mtime.is_some() {
            try_reply!(
                reply,
                self.ops
                    .utimens(&path, system_time(atime), system_time(mtime))
                    .map_err(|e| errno("utimens", &path, &e))
            );
        }

        self.reply_attr(ino, &path, reply);
    }

    fn readlink(&mut self, _req: &Request, ino: u64, reply: ReplyData) {
        let path = try_reply!(reply, self.path(ino));
        match self.ops.readlink(&path) {
            Ok(target) => reply.data(target.as_os_str().as_bytes()),
            Err(e) => reply.error(errno("readlink", &path, &e)),
        }
    }

    fn mknod(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        rdev: u32,
        reply: ReplyEntry,
    ) {
        let path = try_reply!(reply, self.child_path(parent, name));
        try_reply!(
            reply,
            self.ops
                .mknod(&path, mode, rdev as u64)
                .map_err(|e| errno("mknod", &path, &e))
        );
        self.reply_entry(&path, reply);
    }

    fn mkdir(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let path = try_reply!(reply, self.child_path(parent, name));
        try_reply!(
            reply,
            self.ops.mkdir(&path, mode).map_err(|e| errno("mkdir", &path, &e))
        );
        self.reply_entry(&path, reply);
    }

    fn unlink(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let path = try_reply!(reply, self.child_path(parent, name));
        match self.ops.unlink(&path) {
            Ok(()) => {
                self.inodes.remove(&path);
                reply.ok();
            }
            Err(e) => reply.error(errno("unlink", &path, &e)),
        }
    }

    fn rmdir(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let path = try_reply!(reply, self.child_path(parent, name));
        match self.ops.rmdir(&path) {
            Ok(()) => {
                self.inodes.remove(&path);
                reply.ok();
            }
            Err(e) => reply.error(errno("rmdir", &path, &e)),
        }
    }

    fn symlink(
        &mut self,
        _req: &Request,
        parent: u64,
        link_name: &OsStr,
        target: &Path,
        reply: ReplyEntry,
    ) {
        let path = try_reply!(reply, self.child_path(parent, link_name));
        try_reply!(
            reply,
            self.ops
                .symlink(&path, target)
                .map_err(|e| errno("symlink", &path, &e))
        );
        self.reply_entry(&path, reply);
    }

    fn rename(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        flags: u32,
        reply: ReplyEmpty,
    ) {
        // RENAME_NOREPLACE and RENAME_EXCHANGE are not offered
        if flags != 0 {
            reply.error(libc::EINVAL);
            return;
        }
        let from = try_reply!(reply, self.child_path(parent, name));
        let to = try_reply!(reply, self.child_path(newparent, newname));
        match self.ops.rename(&from, &to) {
            Ok(()) => {
                self.inodes.rename(&from, &to);
                reply.ok();
            }
            Err(e) => reply.error(errno("rename", &from, &e)),
        }
    }

    fn link(
        &mut self,
        _req: &Request,
        ino: u64,
        newparent: u64,
        newname: &OsStr,
        reply: ReplyEntry,
    ) {
        let existing = try_reply!(reply, self.path(ino));
        let path = try_reply!(reply, self.child_path(newparent, newname));
        try_reply!(
            reply,
            self.ops
                .link(&existing, &path)
                .map_err(|e| errno("link", &path, &e))
        );
        self.reply_entry(&path, reply);
    }

    fn open(&mut self, _req: &Request, ino: u64, flags: i32, reply: ReplyOpen) {
        let path = try_reply!(reply, self.path(ino));
        match self.ops.open(&path, flags) {
            Ok(fh) => reply.opened(fh, 0),
            Err(e) => reply.error(errno("open", &path, &e)),
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
        let path = try_reply!(reply, self.path(ino));
        match self.ops.read(&path, fh, offset.max(0) as u64, size) {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(errno("read", &path, &e)),
        }
    }

    fn write(
        &mut self,
        _req: &Request,
        ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let path = try_reply!(reply, self.path(ino));
        match self.ops.write(&path, fh, offset.max(0) as u64, data) {
            Ok(n) => reply.written(n as u32),
            Err(e) => reply.error(errno("write", &path, &e)),
        }
    }

    fn flush(&mut self, _req: &Request, ino: u64, fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        let path = try_reply!(reply, self.path(ino));
        match self.ops.flush(&path, fh) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(errno("flush", &path, &e)),
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
        let path = self.path(ino).unwrap_or_default();
        match self.ops.release(&path, fh) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(errno("release", &path, &e)),
        }
    }

    fn fsync(&mut self, _req: &Request, ino: u64, fh: u64, datasync: bool, reply: ReplyEmpty) {
        let path = try_reply!(reply, self.path(ino));
        match self.ops.fsync(&path, fh, datasync) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(errno("fsync", &path, &e)),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        tracing::debug!("readdir(ino={}, offset={})", ino, offset);
        let path = try_reply!(reply, self.path(ino));
        let names = match self.ops.readdir(&path) {
            Ok(names) => names,
            Err(e) => {
                reply.error(errno("readdir", &path, &e));
                return;
            }
        };

        let parent_ino = namer::parent(&path)
            .and_then(|parent| self.inodes.peek(parent))
            .unwrap_or(FUSE_ROOT_ID);
        let mut entries: Vec<(u64, FileType, OsString)> = vec![
            (ino, FileType::Directory, OsString::from(".")),
            (parent_ino, FileType::Directory, OsString::from("..")),
        ];
        for name in names {
            let child = namer::child(&path, &name);
            // The entry may have vanished since it was listed
            let Ok(meta) = self.ops.getattr(&child) else {
                continue;
            };
            let child_ino = self
                .inodes
                .peek(&child)
                .unwrap_or_else(|| hash64(child.as_os_str().as_bytes()));
            entries.push((child_ino, metadata_to_filetype(&meta), name));
        }

        for (idx, (child_ino, kind, name)) in entries.into_iter().enumerate().skip(offset.max(0) as usize) {
            if reply.add(child_ino, (idx + 1) as i64, kind, &name) {
                break;
            }
        }
        reply.ok();
    }

    fn statfs(&mut self, _req: &Request, ino: u64, reply: ReplyStatfs) {
        let path = try_reply!(reply, self.path(ino));
        match self.ops.statfs(&path) {
            Ok(st) => reply.statfs(
                st.blocks() as u64,
                st.blocks_free() as u64,
                st.blocks_available() as u64,
                st.files() as u64,
                st.files_free() as u64,
                st.block_size() as u32,
                st.name_max() as u32,
                st.fragment_size() as u32,
            ),
            Err(e) => reply.error(errno("statfs", &path, &e)),
        }
    }

    fn access(&mut self, _req: &Request, ino: u64, mask: i32, reply: ReplyEmpty) {
        let path = try_reply!(reply, self.path(ino));
        match self.ops.access(&path, mask) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(errno("access", &path, &e)),
        }
    }

    fn create(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        flags: i32,
        reply: ReplyCreate,
    ) {
        let path = try_reply!(reply, self.child_path(parent, name));
        let fh = try_reply!(
            reply,
            self.ops
                .create(&path, mode, flags)
                .map_err(|e| errno("create", &path, &e))
        );
        match self.ops.getattr(&path) {
            Ok(meta) => {
                let ino = self.inodes.lookup(&path);
                reply.created(&self.ttl, &metadata_to_fileattr(&meta, ino), 0, fh, 0);
            }
            Err(e) => {
                discard_handle(self.ops.as_ref(), &path, fh);
                reply.error(errno("create", &path, &e));
            }
        }
    }
}
