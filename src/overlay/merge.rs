use fxhash::FxHashSet;
use std::ffi::OsString;
use std::fs;
use std::path::Path;

use crate::error::{FsError, FsResult};
use crate::overlay::{namer, LayerFs};

impl LayerFs {
    /// Names visible in the directory `logical`, without `.` and `..`.
    ///
    /// A directory that is wholly shadowed is listed straight from the upper
    /// storage. Otherwise every source child and every individually promoted
    /// child is resolved on its own, and only names whose backing path still
    /// exists survive: a promoted entry that was deleted is hidden by its
    /// absence from the upper storage.
    pub(crate) fn list_entries(&self, logical: &Path) -> FsResult<Vec<OsString>> {
        let resolved = self.resolve(logical, false)?;

        if resolved == self.namer.upper_path(logical) {
            tracing::trace!("list_entries: {} is shadowed", logical.display());
            return read_names(&resolved);
        }

        // A source directory that is gone is gone for getattr too, whatever
        // promoted children it left behind
        let mut candidates: FxHashSet<OsString> = read_names(&resolved)?.into_iter().collect();
        let promoted = self.ledger.children_of(logical);
        candidates.extend(
            promoted
                .iter()
                .filter_map(|p| p.file_name())
                .map(|name| name.to_os_string()),
        );

        let mut visible = Vec::with_capacity(candidates.len());
        for name in candidates {
            let child = namer::child(logical, &name);
            let backing = self.resolve(&child, false)?;
            if fs::symlink_metadata(&backing).is_ok() {
                visible.push(name);
            } else {
                tracing::trace!("list_entries: {} is hidden", child.display());
            }
        }
        visible.sort();
        Ok(visible)
    }
}

fn read_names(dir: &Path) -> FsResult<Vec<OsString>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| FsError::io(dir, e))? {
        let entry = entry.map_err(|e| FsError::io(dir, e))?;
        names.push(entry.file_name());
    }
    names.sort();
    Ok(names)
}
