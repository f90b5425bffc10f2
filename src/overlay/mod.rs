pub(crate) mod convert;
mod copy_up;
pub mod file_handle;
pub mod ledger;
pub mod links;
mod merge;
pub mod namer;
pub mod ops;

pub use file_handle::{HandleTable, OpenParams};
pub use ledger::ShadowLedger;
pub use links::LinkContext;
pub use namer::PathNamer;
pub use ops::Operations;

use fs2::FileExt;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{FsResult, LayerFsError, Result};

/// Directory under the layer storage that mirrors promoted logical paths.
pub const UPPER_DIR: &str = "upper";
/// Append-only list of promoted logical paths.
pub const LEDGER_FILE: &str = "shadow";
/// Held with an exclusive advisory lock while an overlay owns the storage.
pub const LOCK_FILE: &str = "lock";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OverlayOptions {
    pub allow_hardlinks: bool,
    pub allow_cross_device_symlinks: bool,
}

/// One overlay instance: a live source tree, the private upper storage that
/// shadows it, and the bookkeeping that decides which of the two serves a path.
pub struct LayerFs {
    pub(crate) namer: PathNamer,
    pub(crate) ledger: ShadowLedger,
    pub(crate) handles: HandleTable,
    pub(crate) mountpoint: PathBuf,
    pub(crate) options: OverlayOptions,
    /// Serializes promotions so two writers never copy the same subtree over
    /// each other's edits.
    copy_up_lock: Mutex<()>,
    _storage_lock: File,
}

impl LayerFs {
    pub fn new(
        source_root: PathBuf,
        layer_storage: PathBuf,
        mountpoint: PathBuf,
        options: OverlayOptions,
    ) -> Result<Self> {
        match fs::create_dir(&layer_storage) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(e) => {
                return Err(LayerFsError::Config(format!(
                    "Failed to create layer storage {}: {}",
                    layer_storage.display(),
                    e
                )))
            }
        }

        let storage_lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(layer_storage.join(LOCK_FILE))?;
        storage_lock.try_lock_exclusive().map_err(|e| {
            LayerFsError::Config(format!(
                "Layer storage {} is in use by another overlay: {}",
                layer_storage.display(),
                e
            ))
        })?;

        let upper_root = layer_storage.join(UPPER_DIR);
        fs::create_dir_all(&upper_root).map_err(|e| {
            LayerFsError::Config(format!(
                "Failed to create upper directory {}: {}",
                upper_root.display(),
                e
            ))
        })?;

        let ledger_path = layer_storage.join(LEDGER_FILE);
        let ledger = ShadowLedger::load(&ledger_path).map_err(|e| {
            LayerFsError::Ledger(format!("Failed to load {}: {}", ledger_path.display(), e))
        })?;

        tracing::info!(
            "Overlay of {} ready ({} promoted paths)",
            source_root.display(),
            ledger.len()
        );

        Ok(LayerFs {
            namer: PathNamer::new(source_root, upper_root),
            ledger,
            handles: HandleTable::new(),
            mountpoint,
            options,
            copy_up_lock: Mutex::new(()),
            _storage_lock: storage_lock,
        })
    }

    pub fn namer(&self) -> &PathNamer {
        &self.namer
    }

    pub fn ledger(&self) -> &ShadowLedger {
        &self.ledger
    }

    pub fn handles(&self) -> &HandleTable {
        &self.handles
    }

    pub fn mountpoint(&self) -> &Path {
        &self.mountpoint
    }

    pub fn options(&self) -> OverlayOptions {
        self.options
    }

    pub fn is_shadowed(&self, logical: &Path) -> bool {
        self.ledger.is_shadowed(logical)
    }

    /// The absolute path currently backing `logical`.
    ///
    /// Shadowed paths are served from the upper storage. Anything else is a
    /// live passthrough to the source tree, unless the caller intends to
    /// write, in which case the path is promoted first.
    pub fn resolve(&self, logical: &Path, intends_write: bool) -> FsResult<PathBuf> {
        if self.ledger.is_shadowed(logical) {
            return Ok(self.namer.upper_path(logical));
        }
        if !intends_write {
            return Ok(self.namer.source_path(logical));
        }

        let _guard = self.copy_up_lock.lock();
        // Another writer may have promoted it while we waited
        if self.ledger.is_shadowed(logical) {
            return Ok(self.namer.upper_path(logical));
        }
        self.copy_up(logical)
    }

    /// Where `logical` appears to callers outside the overlay.
    pub fn mount_path(&self, logical: &Path) -> PathBuf {
        namer::join_under(&self.mountpoint, logical)
    }

    pub(crate) fn link_context(&self) -> LinkContext<'_> {
        LinkContext {
            source_root: self.namer.source_root(),
            upper_root: self.namer.upper_root(),
            mountpoint: &self.mountpoint,
            allow_cross_device: self.options.allow_cross_device_symlinks,
        }
    }
}

impl std::fmt::Debug for LayerFs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayerFs")
            .field("namer", &self.namer)
            .field("ledger", &self.ledger)
            .field("mountpoint", &self.mountpoint)
            .field("options", &self.options)
            .finish()
    }
}
