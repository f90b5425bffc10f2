use crate::cli::validate_mount_paths;
use crate::config::{load_config, Config};
use crate::error::{LayerFsError, Result};
use crate::fuse::{mount_fuse, unmount_fuse, LayerFuse, MountSettings};
use crate::overlay::LayerFs;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;

#[derive(Debug, Clone, Default)]
pub struct MountRequest {
    pub source: PathBuf,
    pub layer_storage: PathBuf,
    pub mountpoint: PathBuf,
    pub config: Option<PathBuf>,
    pub allow_hardlinks: bool,
    pub allow_cross_device_symlinks: bool,
    pub allow_other: bool,
}

impl MountRequest {
    /// Command-line flags only ever switch a setting on.
    fn apply_overrides(&self, config: &mut Config) {
        if self.allow_hardlinks {
            config.overlay.allow_hardlinks = true;
        }
        if self.allow_cross_device_symlinks {
            config.overlay.allow_cross_device_symlinks = true;
        }
        if self.allow_other {
            config.fuse.allow_other = true;
        }
    }
}

/// Mount the overlay and serve it until it is unmounted or the process is
/// interrupted.
pub async fn mount_overlay(request: MountRequest) -> Result<()> {
    let (source, layer_storage, mountpoint) =
        validate_mount_paths(&request.source, &request.layer_storage, &request.mountpoint)?;

    let mut config = load_config(request.config.as_deref())?;
    request.apply_overrides(&mut config);

    let layer = LayerFs::new(
        source.clone(),
        layer_storage,
        mountpoint.clone(),
        config.overlay_options(),
    )?;
    let fs = LayerFuse::new(Arc::new(layer), config.fuse.get_ttl_secs());
    let settings = MountSettings {
        fs_name: config.fuse.get_fs_name(),
        allow_other: config.fuse.allow_other,
    };

    let handle = mount_fuse(fs, &mountpoint, &settings)?;
    println!(
        "Overlay of {} mounted at {} (Ctrl+C to unmount)",
        source.display(),
        mountpoint.display()
    );

    let mut session = tokio::task::spawn_blocking(move || handle.wait());

    tokio::select! {
        joined = &mut session => finish(joined),
        interrupted = signal::ctrl_c() => {
            interrupted.map_err(|e| {
                LayerFsError::Fuse(format!("Failed to wait for Ctrl+C: {}", e))
            })?;
            eprintln!("\nInterrupted");
            if !unmount_fuse(&mountpoint)? {
                return Err(LayerFsError::Fuse(format!(
                    "Failed to unmount {}",
                    mountpoint.display()
                )));
            }
            finish(session.await)
        }
    }
}

fn finish(joined: std::result::Result<Result<()>, tokio::task::JoinError>) -> Result<()> {
    match joined {
        Ok(result) => result,
        Err(e) => Err(LayerFsError::Fuse(format!("FUSE session task failed: {}", e))),
    }
}
