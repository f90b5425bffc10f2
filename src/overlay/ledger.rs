//! The shadow ledger: the durable record of every logical path that has been
//! promoted into the upper storage.
//!
//! Entries are only ever added. A promoted path that is later deleted stays in
//! the ledger; its absence from the upper storage is what hides it. Membership
//! is inherited: a path is shadowed when it or any ancestor is recorded.

use fxhash::FxHashSet;
use parking_lot::Mutex;
use std::ffi::OsStr;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use crate::error::{FsError, FsResult};
use crate::overlay::namer;

struct LedgerState {
    entries: FxHashSet<PathBuf>,
    log: File,
}

pub struct ShadowLedger {
    path: PathBuf,
    state: Mutex<LedgerState>,
}

impl std::fmt::Debug for ShadowLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShadowLedger")
            .field("path", &self.path)
            .field("entries", &self.state.lock().entries.len())
            .finish()
    }
}

impl ShadowLedger {
    /// Open the ledger at `path`, replaying every recorded promotion.
    /// A missing file means a fresh overlay.
    pub fn load(path: &Path) -> io::Result<Self> {
        let entries: FxHashSet<PathBuf> = read_entries(path)?.into_iter().collect();
        let log = OpenOptions::new().create(true).append(true).open(path)?;

        tracing::debug!(
            "Loaded {} shadow entries from {}",
            entries.len(),
            path.display()
        );

        Ok(ShadowLedger {
            path: path.to_path_buf(),
            state: Mutex::new(LedgerState { entries, log }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True if `logical` or any of its ancestors has been promoted.
    /// The root is only shadowed when it was promoted itself.
    pub fn is_shadowed(&self, logical: &Path) -> bool {
        let state = self.state.lock();
        is_shadowed_in(&state.entries, logical)
    }

    /// Record `logical` as promoted.
    ///
    /// The entry reaches the in-memory set only after the append has been
    /// flushed to disk, so memory never claims a promotion a restart would lose.
    pub fn promote(&self, logical: &Path) -> FsResult<()> {
        if logical.as_os_str().as_bytes().contains(&b'\n') {
            return Err(FsError::InvalidPath(logical.to_path_buf()));
        }

        let mut state = self.state.lock();
        if is_shadowed_in(&state.entries, logical) {
            return Ok(());
        }

        let mut line = logical.as_os_str().as_bytes().to_vec();
        line.push(b'\n');
        state
            .log
            .write_all(&line)
            .and_then(|_| state.log.sync_data())
            .map_err(|source| FsError::Ledger {
                path: logical.to_path_buf(),
                source,
            })?;

        tracing::debug!("Promoted {}", logical.display());
        state.entries.insert(logical.to_path_buf());
        Ok(())
    }

    /// Individually promoted paths whose immediate parent is `logical`.
    pub fn children_of(&self, logical: &Path) -> Vec<PathBuf> {
        let state = self.state.lock();
        state
            .entries
            .iter()
            .filter(|entry| namer::parent(entry) == Some(logical))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn is_shadowed_in(entries: &FxHashSet<PathBuf>, logical: &Path) -> bool {
    let mut current = Some(logical);
    while let Some(path) = current {
        if entries.contains(path) {
            return true;
        }
        current = namer::parent(path);
    }
    false
}

/// Read the raw ledger, dropping empty lines and duplicates. Order of first
/// appearance is preserved.
pub fn read_entries(path: &Path) -> io::Result<Vec<PathBuf>> {
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut seen = FxHashSet::default();
    Ok(data
        .split(|b| *b == b'\n')
        .filter(|line| !line.is_empty())
        .map(|line| PathBuf::from(OsStr::from_bytes(line)))
        .filter(|entry| seen.insert(entry.clone()))
        .collect())
}
