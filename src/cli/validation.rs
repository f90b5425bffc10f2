use crate::error::{LayerFsError, Result};
use std::fs;
use std::path::{Path, PathBuf};

fn existing_dir(path: &Path, role: &str) -> Result<PathBuf> {
    let meta = fs::metadata(path).map_err(|e| {
        LayerFsError::InvalidArgument(format!("{} {}: {}", role, path.display(), e))
    })?;
    if !meta.is_dir() {
        return Err(LayerFsError::InvalidArgument(format!(
            "{} {} is not a directory",
            role,
            path.display()
        )));
    }
    path.canonicalize().map_err(|e| {
        LayerFsError::InvalidArgument(format!(
            "Failed to resolve {} {}: {}",
            role,
            path.display(),
            e
        ))
    })
}

/// Check the three mount paths and return them canonicalized as
/// (source, layer storage, mountpoint).
///
/// Layer storage is created when missing, but only one level deep.
pub fn validate_mount_paths(
    source: &Path,
    layer_storage: &Path,
    mountpoint: &Path,
) -> Result<(PathBuf, PathBuf, PathBuf)> {
    let source = existing_dir(source, "Source")?;
    let mountpoint = existing_dir(mountpoint, "Mountpoint")?;

    if !layer_storage.exists() {
        fs::create_dir(layer_storage).map_err(|e| {
            LayerFsError::InvalidArgument(format!(
                "Failed to create layer storage {}: {}",
                layer_storage.display(),
                e
            ))
        })?;
        tracing::info!("Created layer storage {}", layer_storage.display());
    }
    let layer_storage = existing_dir(layer_storage, "Layer storage")?;

    if mountpoint.starts_with(&source) {
        return Err(LayerFsError::InvalidArgument(format!(
            "Mountpoint {} must not be inside source {}",
            mountpoint.display(),
            source.display()
        )));
    }
    if mountpoint.starts_with(&layer_storage) {
        return Err(LayerFsError::InvalidArgument(format!(
            "Mountpoint {} must not be inside layer storage {}",
            mountpoint.display(),
            layer_storage.display()
        )));
    }
    if layer_storage.starts_with(&source) {
        return Err(LayerFsError::InvalidArgument(format!(
            "Layer storage {} must not be inside source {}",
            layer_storage.display(),
            source.display()
        )));
    }

    Ok((source, layer_storage, mountpoint))
}
