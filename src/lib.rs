pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod fuse;
pub mod overlay;

pub use config::get_config_path;
pub use config::load_config;
pub use config::Config;
pub use config::FuseConfig;
pub use config::OverlayConfig;

pub use error::{FsError, FsResult, LayerFsError, Result};

pub use fuse::{mount_fuse, unmount_fuse, LayerFuse, MountHandle, MountSettings};

pub use overlay::{LayerFs, Operations, OverlayOptions};
