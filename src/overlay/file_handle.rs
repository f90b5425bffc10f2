use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{FsError, FsResult};

/// Flags that only make sense the first time a file is opened. They are
/// dropped when a handle is rebound to a new backing path.
const CREATION_FLAGS: i32 = libc::O_CREAT | libc::O_EXCL | libc::O_TRUNC;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenParams {
    pub flags: i32,
    pub mode: u32,
}

impl OpenParams {
    pub fn new(flags: i32) -> Self {
        OpenParams { flags, mode: 0o666 }
    }

    pub fn with_mode(flags: i32, mode: u32) -> Self {
        OpenParams { flags, mode }
    }

    fn options(&self) -> OpenOptions {
        let mut options = OpenOptions::new();
        match self.flags & libc::O_ACCMODE {
            libc::O_WRONLY => options.write(true),
            libc::O_RDWR => options.read(true).write(true),
            _ => options.read(true),
        };
        options
            .custom_flags(self.flags & !libc::O_ACCMODE)
            .mode(self.mode);
        options
    }

    fn for_reopen(&self) -> Self {
        OpenParams {
            flags: self.flags & !CREATION_FLAGS,
            mode: self.mode,
        }
    }
}

#[derive(Debug)]
struct OpenFile {
    file: Arc<File>,
    path: PathBuf,
    params: OpenParams,
}

/// Caller-facing file handles backed by live descriptors.
///
/// A handle remembers the path it was opened at. When the logical file has
/// since been promoted elsewhere, the next access closes the stale descriptor
/// and reopens at the new location with the original parameters.
#[derive(Debug, Default)]
pub struct HandleTable {
    entries: Mutex<BTreeMap<u64, OpenFile>>,
}

impl HandleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open `path` and bind it to the smallest unused handle number.
    pub fn open_handle(&self, path: &Path, params: OpenParams) -> FsResult<u64> {
        let file = params
            .options()
            .open(path)
            .map_err(|e| FsError::io(path, e))?;

        let mut entries = self.entries.lock();
        let fh = smallest_free(&entries);
        entries.insert(
            fh,
            OpenFile {
                file: Arc::new(file),
                path: path.to_path_buf(),
                params,
            },
        );
        tracing::trace!("open_handle: fh={} -> {}", fh, path.display());
        Ok(fh)
    }

    /// Descriptor for `fh`, rebound to `current` if the backing path moved.
    ///
    /// # Panics
    /// If `fh` was never handed out or has been released.
    pub fn descriptor_for(&self, fh: u64, current: &Path) -> FsResult<Arc<File>> {
        let mut entries = self.entries.lock();
        let Some(entry) = entries.get_mut(&fh) else {
            panic!("file handle {} is not open", fh);
        };

        if entry.path == current {
            return Ok(Arc::clone(&entry.file));
        }

        tracing::debug!(
            "Rebinding fh={} from {} to {}",
            fh,
            entry.path.display(),
            current.display()
        );
        let params = entry.params.for_reopen();
        let file = params
            .options()
            .open(current)
            .map_err(|e| FsError::io(current, e))?;
        entry.file = Arc::new(file);
        entry.path = current.to_path_buf();
        Ok(Arc::clone(&entry.file))
    }

    /// Close the descriptor behind `fh` and forget the handle.
    ///
    /// # Panics
    /// If `fh` is not open.
    pub fn release(&self, fh: u64) {
        if self.entries.lock().remove(&fh).is_none() {
            panic!("release of unknown file handle {}", fh);
        }
    }

    pub fn path_of(&self, fh: u64) -> Option<PathBuf> {
        self.entries.lock().get(&fh).map(|e| e.path.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn smallest_free(entries: &BTreeMap<u64, OpenFile>) -> u64 {
    let mut candidate = 0;
    for &fh in entries.keys() {
        if fh != candidate {
            break;
        }
        candidate += 1;
    }
    candidate
}
