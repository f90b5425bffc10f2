//! Symlink targets as seen from outside the overlay.
//!
//! Absolute links that point into either backing tree are rewritten so they
//! point back through the mountpoint. Anything that would still leave the
//! mount afterwards is refused with `EXDEV` unless cross-device links are
//! allowed.
//!
//! Relative targets are resolved against the directory holding the link
//! (expressed under the mountpoint) and reported as that absolute path, so
//! every target handed back either starts with the mountpoint or is refused.

use std::path::{Component, Path, PathBuf};

use crate::error::{FsError, FsResult};

/// Lexical normalization: collapses `.`, `..` and repeated separators without
/// touching the filesystem. Relative paths stay relative.
pub fn normalize_target(raw: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in raw.components() {
        match component {
            Component::ParentDir => {
                let popped = match out.components().next_back() {
                    Some(Component::Normal(_)) => out.pop(),
                    _ => false,
                };
                if !popped && !out.has_root() {
                    out.push("..");
                }
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

pub struct LinkContext<'a> {
    pub source_root: &'a Path,
    pub upper_root: &'a Path,
    pub mountpoint: &'a Path,
    pub allow_cross_device: bool,
}

impl LinkContext<'_> {
    /// Target to report for an existing link whose raw target is `raw`.
    /// `link_dir` is the directory holding the link, under the mountpoint.
    pub fn rewrite_symlink_target(&self, raw: &Path, link_dir: &Path) -> FsResult<PathBuf> {
        let normalized = normalize_target(raw);

        if normalized.is_relative() {
            return self.check_relative(raw, &normalized, link_dir);
        }

        let rewritten = if let Ok(rest) = normalized.strip_prefix(self.source_root) {
            self.mountpoint.join(rest)
        } else if let Ok(rest) = normalized.strip_prefix(self.upper_root) {
            self.mountpoint.join(rest)
        } else {
            normalized
        };

        if rewritten.starts_with(self.mountpoint) {
            Ok(rewritten)
        } else if self.allow_cross_device {
            Ok(raw.to_path_buf())
        } else {
            tracing::debug!("readlink: {} leaves the overlay", raw.display());
            Err(FsError::CrossDevice(raw.to_path_buf()))
        }
    }

    /// Refuse creation of a link whose target would leave the mount.
    pub fn validate_symlink_creation(&self, target: &Path, link_dir: &Path) -> FsResult<()> {
        if self.allow_cross_device {
            return Ok(());
        }
        let normalized = normalize_target(target);
        let resolved = if normalized.is_relative() {
            normalize_target(&link_dir.join(&normalized))
        } else {
            normalized
        };

        if resolved.starts_with(self.mountpoint) {
            Ok(())
        } else {
            Err(FsError::CrossDevice(target.to_path_buf()))
        }
    }

    fn check_relative(&self, raw: &Path, normalized: &Path, link_dir: &Path) -> FsResult<PathBuf> {
        let resolved = normalize_target(&link_dir.join(normalized));
        if resolved.starts_with(self.mountpoint) {
            Ok(resolved)
        } else if self.allow_cross_device {
            Ok(raw.to_path_buf())
        } else {
            tracing::debug!("readlink: {} leaves the overlay", raw.display());
            Err(FsError::CrossDevice(raw.to_path_buf()))
        }
    }
}
