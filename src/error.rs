use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::overlay::convert::io_error_to_libc;

pub type Result<T> = std::result::Result<T, LayerFsError>;

/// Failures outside of an individual filesystem call: startup, configuration
/// and mount lifecycle.
#[derive(Error, Debug)]
pub enum LayerFsError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("FUSE error: {0}")]
    Fuse(String),

    #[error("Shadow ledger error: {0}")]
    Ledger(String),

    #[error("TOML error: {0}")]
    Toml(String),

    #[error("JSON error: {0}")]
    Json(String),
}

impl From<serde_json::Error> for LayerFsError {
    fn from(err: serde_json::Error) -> Self {
        LayerFsError::Json(err.to_string())
    }
}

impl From<toml::de::Error> for LayerFsError {
    fn from(err: toml::de::Error) -> Self {
        LayerFsError::Toml(err.to_string())
    }
}

pub type FsResult<T> = std::result::Result<T, FsError>;

/// Failure of a single overlay operation. Every variant carries exactly one
/// errno, which is what the dispatch layer hands back to the kernel.
#[derive(Error, Debug)]
pub enum FsError {
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    #[error("permission denied: {}", .0.display())]
    PermissionDenied(PathBuf),

    #[error("symlink target leaves the overlay: {}", .0.display())]
    CrossDevice(PathBuf),

    #[error("invalid path: {}", .0.display())]
    InvalidPath(PathBuf),

    #[error("failed to record promotion of {} in the shadow ledger: {source}", path.display())]
    Ledger {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("hard links are disabled: {}", .0.display())]
    HardlinksDisabled(PathBuf),
}

impl FsError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        FsError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn errno(&self) -> i32 {
        match self {
            FsError::Io { source, .. } => io_error_to_libc(source),
            FsError::NotFound(_) => libc::ENOENT,
            FsError::NotADirectory(_) => libc::ENOTDIR,
            FsError::PermissionDenied(_) => libc::EACCES,
            FsError::CrossDevice(_) => libc::EXDEV,
            FsError::InvalidPath(_) => libc::EINVAL,
            FsError::Ledger { source, .. } => io_error_to_libc(source),
            FsError::HardlinksDisabled(_) => libc::EPERM,
        }
    }
}
