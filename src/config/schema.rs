use crate::error::{LayerFsError, Result};
use crate::overlay::OverlayOptions;
use serde::{Deserialize, Serialize};

/// Longest attribute cache the overlay accepts. Anything longer hides
/// source-tree edits from callers for too long to be useful.
const MAX_TTL_SECS: u64 = 3600;

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct OverlayConfig {
    #[serde(default)]
    pub allow_hardlinks: bool,
    #[serde(default)]
    pub allow_cross_device_symlinks: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct FuseConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_secs: Option<u64>,
    #[serde(default)]
    pub allow_other: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fs_name: Option<String>,
}

impl FuseConfig {
    pub fn get_ttl_secs(&self) -> u64 {
        self.ttl_secs.unwrap_or_else(super::default_fuse_ttl_secs)
    }

    pub fn get_fs_name(&self) -> String {
        self.fs_name.clone().unwrap_or_else(super::default_fs_name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub overlay: OverlayConfig,
    #[serde(default)]
    pub fuse: FuseConfig,
}

impl Config {
    pub fn overlay_options(&self) -> OverlayOptions {
        OverlayOptions {
            allow_hardlinks: self.overlay.allow_hardlinks,
            allow_cross_device_symlinks: self.overlay.allow_cross_device_symlinks,
        }
    }
}

pub fn validate_config(config: &Config) -> Result<()> {
    let ttl = config.fuse.get_ttl_secs();
    if ttl > MAX_TTL_SECS {
        return Err(LayerFsError::Config(format!(
            "fuse.ttl_secs ({}) exceeds the maximum of {} seconds",
            ttl, MAX_TTL_SECS
        )));
    }

    let fs_name = config.fuse.get_fs_name();
    if fs_name.is_empty() {
        return Err(LayerFsError::Config(
            "fuse.fs_name cannot be empty".to_string(),
        ));
    }
    // Mount options are passed to the kernel as a comma-separated list
    if fs_name.contains(',') || fs_name.chars().any(|c| c.is_control() || c.is_whitespace()) {
        return Err(LayerFsError::Config(format!(
            "fuse.fs_name '{}' may not contain commas, whitespace or control characters",
            fs_name
        )));
    }

    Ok(())
}
