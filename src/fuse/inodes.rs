use fuser::FUSE_ROOT_ID;
use fxhash::FxHashMap;
use std::path::{Path, PathBuf};

#[derive(Debug)]
struct InodeEntry {
    path: PathBuf,
    lookups: u64,
}

/// Kernel inode numbers for logical paths.
///
/// An inode lives from the first `lookup` reply naming it until the kernel
/// forgets every reference. The root is pinned. A path removed through the
/// overlay loses its name mapping right away, but its inode stays until
/// forgotten so open files keep answering.
#[derive(Debug)]
pub(crate) struct InodeTable {
    by_ino: FxHashMap<u64, InodeEntry>,
    by_path: FxHashMap<PathBuf, u64>,
    next_ino: u64,
}

impl InodeTable {
    pub fn new() -> Self {
        let mut by_ino = FxHashMap::default();
        let mut by_path = FxHashMap::default();
        by_ino.insert(
            FUSE_ROOT_ID,
            InodeEntry {
                path: PathBuf::from("/"),
                lookups: 1,
            },
        );
        by_path.insert(PathBuf::from("/"), FUSE_ROOT_ID);
        InodeTable {
            by_ino,
            by_path,
            // FUSE reserves 1 for the root
            next_ino: FUSE_ROOT_ID + 1,
        }
    }

    pub fn path_of(&self, ino: u64) -> Option<&Path> {
        self.by_ino.get(&ino).map(|e| e.path.as_path())
    }

    /// Known inode for `path`, without taking a reference.
    pub fn peek(&self, path: &Path) -> Option<u64> {
        self.by_path.get(path).copied()
    }

    /// Inode for `path`, allocating one if needed, with one more kernel
    /// reference counted against it.
    pub fn lookup(&mut self, path: &Path) -> u64 {
        if let Some(&ino) = self.by_path.get(path) {
            if let Some(entry) = self.by_ino.get_mut(&ino) {
                entry.lookups += 1;
            }
            return ino;
        }

        let ino = self.next_ino;
        self.next_ino += 1;
        self.by_ino.insert(
            ino,
            InodeEntry {
                path: path.to_path_buf(),
                lookups: 1,
            },
        );
        self.by_path.insert(path.to_path_buf(), ino);
        ino
    }

    /// Drop `nlookup` kernel references; the inode is freed at zero.
    pub fn forget(&mut self, ino: u64, nlookup: u64) {
        if ino == FUSE_ROOT_ID {
            return;
        }
        let Some(entry) = self.by_ino.get_mut(&ino) else {
            return;
        };
        entry.lookups = entry.lookups.saturating_sub(nlookup);
        if entry.lookups > 0 {
            return;
        }
        if let Some(entry) = self.by_ino.remove(&ino) {
            if self.by_path.get(&entry.path) == Some(&ino) {
                self.by_path.remove(&entry.path);
            }
        }
    }

    /// The name `path` no longer exists.
    pub fn remove(&mut self, path: &Path) {
        self.by_path.remove(path);
    }

    /// Move `from` and everything below it to `to`.
    pub fn rename(&mut self, from: &Path, to: &Path) {
        // Whatever `to` named before is replaced
        let stale: Vec<PathBuf> = self
            .by_path
            .keys()
            .filter(|p| p.starts_with(to))
            .cloned()
            .collect();
        for path in stale {
            self.by_path.remove(&path);
        }

        let moved: Vec<(PathBuf, u64)> = self
            .by_path
            .iter()
            .filter(|(p, _)| p.starts_with(from))
            .map(|(p, &ino)| (p.clone(), ino))
            .collect();
        for (old, ino) in moved {
            let Ok(rest) = old.strip_prefix(from) else {
                continue;
            };
            let new = if rest.as_os_str().is_empty() {
                to.to_path_buf()
            } else {
                to.join(rest)
            };
            self.by_path.remove(&old);
            self.by_path.insert(new.clone(), ino);
            if let Some(entry) = self.by_ino.get_mut(&ino) {
                entry.path = new;
            }
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.by_ino.len()
    }
}
