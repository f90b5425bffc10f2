use nix::sys::stat::{mknod, utimensat, Mode, SFlag, UtimensatFlags};
use nix::sys::time::TimeSpec;
use std::fs::{self, Metadata};
use std::io;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::{FsError, FsResult};
use crate::overlay::LayerFs;

impl LayerFs {
    #[cfg(target_os = "macos")]
    pub(crate) fn clone_file_optimized(src: &Path, dest: &Path) -> io::Result<()> {
        use std::ffi::CString;
        use std::os::unix::ffi::OsStrExt;

        let src_cstr = CString::new(src.as_os_str().as_bytes())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains null byte"))?;
        let dest_cstr = CString::new(dest.as_os_str().as_bytes())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains null byte"))?;

        // clonefile refuses to overwrite, and a retried promotion may find a
        // partial copy left behind
        let _ = fs::remove_file(dest);

        // SAFETY: Both paths are properly null-terminated CStrings that outlive the call.
        unsafe {
            if libc::clonefile(src_cstr.as_ptr(), dest_cstr.as_ptr(), 0) == 0 {
                return Ok(());
            }
        }
        fs::copy(src, dest)?;
        Ok(())
    }

    #[cfg(not(target_os = "macos"))]
    pub(crate) fn clone_file_optimized(src: &Path, dest: &Path) -> io::Result<()> {
        fs::copy(src, dest)?;
        Ok(())
    }

    /// Promote `logical` into the upper storage and return its upper path.
    ///
    /// Callers hold the copy-up lock and have checked the path is not yet
    /// shadowed. Ancestor directories are created empty. A directory brings its
    /// whole subtree except descendants that were promoted on their own. The
    /// ledger entry is written last, so a failed copy leaves the path
    /// unpromoted and still served from the source.
    pub(crate) fn copy_up(&self, logical: &Path) -> FsResult<PathBuf> {
        let upper = self.namer.upper_path(logical);
        let source = self.namer.source_path(logical);

        if let Some(parent) = upper.parent() {
            if parent.starts_with(self.namer.upper_root()) {
                fs::create_dir_all(parent).map_err(|e| FsError::io(parent, e))?;
            }
        }

        match fs::symlink_metadata(&source) {
            Ok(meta) if meta.is_dir() => {
                tracing::debug!("copy_up: directory {}", logical.display());
                self.copy_tree(logical, &source, &upper)?;
            }
            Ok(meta) => {
                tracing::debug!("copy_up: entry {}", logical.display());
                copy_entry(&source, &upper, &meta)?;
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!("copy_up: {} has no source, marking only", logical.display());
            }
            Err(e) => return Err(FsError::io(source, e)),
        }

        self.ledger.promote(logical)?;
        Ok(upper)
    }

    /// Copy the directory `source` to `dest`, skipping every descendant that is
    /// already shadowed: its upper copy is authoritative.
    fn copy_tree(&self, logical: &Path, source: &Path, dest: &Path) -> FsResult<()> {
        let mut directories: Vec<(PathBuf, PathBuf, Metadata)> = Vec::new();

        let walker = WalkDir::new(source)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| {
                entry.depth() == 0 || {
                    let rel = entry.path().strip_prefix(source).unwrap_or(entry.path());
                    !self.ledger.is_shadowed(&logical.join(rel))
                }
            });

        for entry in walker {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(source).to_path_buf();
                FsError::io(path, io::Error::from(e))
            })?;
            let rel = entry.path().strip_prefix(source).unwrap_or(entry.path());
            let target = if rel.as_os_str().is_empty() {
                dest.to_path_buf()
            } else {
                dest.join(rel)
            };
            let meta = entry
                .metadata()
                .map_err(|e| FsError::io(entry.path(), io::Error::from(e)))?;

            if meta.is_dir() {
                match fs::create_dir(&target) {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
                    Err(e) => return Err(FsError::io(target, e)),
                }
                directories.push((entry.path().to_path_buf(), target, meta));
            } else {
                copy_entry(entry.path(), &target, &meta)?;
            }
        }

        // Directory metadata last: adding children bumps mtime, and a read-only
        // directory could not receive them
        for (src, dir, meta) in directories.iter().rev() {
            preserve_metadata(src, dir, meta)?;
        }
        Ok(())
    }
}

/// Copy a single non-directory entry without following symlinks.
fn copy_entry(source: &Path, dest: &Path, meta: &Metadata) -> FsResult<()> {
    let file_type = meta.file_type();

    if file_type.is_file() {
        LayerFs::clone_file_optimized(source, dest).map_err(|e| FsError::io(source, e))?;
    } else if file_type.is_symlink() {
        let target = fs::read_link(source).map_err(|e| FsError::io(source, e))?;
        match fs::remove_file(dest) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(FsError::io(dest, e)),
        }
        std::os::unix::fs::symlink(&target, dest).map_err(|e| FsError::io(dest, e))?;
    } else {
        let kind = SFlag::from_bits_truncate((meta.mode() & libc::S_IFMT as u32) as libc::mode_t);
        let perm = Mode::from_bits_truncate((meta.mode() & 0o7777) as libc::mode_t);
        match fs::remove_file(dest) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(FsError::io(dest, e)),
        }
        mknod(dest, kind, perm, meta.rdev() as libc::dev_t)
            .map_err(|e| FsError::io(dest, io::Error::from(e)))?;
    }

    preserve_metadata(source, dest, meta)
}

/// Apply mode, timestamps and extended attributes of `source` to `dest`.
/// Symlinks only get their timestamps.
fn preserve_metadata(source: &Path, dest: &Path, meta: &Metadata) -> FsResult<()> {
    if !meta.file_type().is_symlink() {
        copy_xattrs(source, dest);
        fs::set_permissions(dest, fs::Permissions::from_mode(meta.mode() & 0o7777))
            .map_err(|e| FsError::io(dest, e))?;
    }

    let atime = TimeSpec::new(meta.atime() as _, meta.atime_nsec() as _);
    let mtime = TimeSpec::new(meta.mtime() as _, meta.mtime_nsec() as _);
    utimensat(None, dest, &atime, &mtime, UtimensatFlags::NoFollowSymlink)
        .map_err(|e| FsError::io(dest, io::Error::from(e)))?;

    Ok(())
}

/// Best-effort extended attribute copy; filesystems without xattr support
/// are not an error.
fn copy_xattrs(source: &Path, dest: &Path) {
    let names = match xattr::list(source) {
        Ok(names) => names,
        Err(e) => {
            tracing::trace!("xattr list failed for {}: {}", source.display(), e);
            return;
        }
    };
    for name in names {
        match xattr::get(source, &name) {
            Ok(Some(value)) => {
                if let Err(e) = xattr::set(dest, &name, &value) {
                    tracing::debug!(
                        "Could not copy xattr {:?} to {}: {}",
                        name,
                        dest.display(),
                        e
                    );
                }
            }
            Ok(None) => {}
            Err(e) => tracing::debug!("Could not read xattr {:?}: {}", name, e),
        }
    }
}
