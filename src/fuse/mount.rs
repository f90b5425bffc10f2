use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::error::{LayerFsError, Result};
use crate::fuse::LayerFuse;
use crate::overlay::Operations;

const MOUNT_TIMEOUT: Duration = Duration::from_millis(2000);
const CHECK_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountSettings {
    pub fs_name: String,
    pub allow_other: bool,
}

impl MountSettings {
    fn mount_options(&self) -> Vec<fuser::MountOption> {
        let mut options = vec![
            fuser::MountOption::FSName(self.fs_name.clone()),
            fuser::MountOption::RW,
        ];
        if self.allow_other {
            options.push(fuser::MountOption::AllowOther);
        }
        options
    }
}

/// A mounted overlay served from a background thread.
#[derive(Debug)]
pub struct MountHandle {
    mountpoint: PathBuf,
    session: JoinHandle<std::io::Result<()>>,
}

impl MountHandle {
    pub fn mountpoint(&self) -> &Path {
        &self.mountpoint
    }

    pub fn is_finished(&self) -> bool {
        self.session.is_finished()
    }

    /// Block until the filesystem is unmounted.
    pub fn wait(self) -> Result<()> {
        match self.session.join() {
            Ok(Ok(())) => {
                tracing::info!("Unmounted {}", self.mountpoint.display());
                Ok(())
            }
            Ok(Err(e)) => Err(LayerFsError::Fuse(format!("FUSE session failed: {}", e))),
            Err(_) => Err(LayerFsError::Fuse("FUSE session thread panicked".to_string())),
        }
    }
}

/// True once a different filesystem is mounted on `path` than on its parent.
pub fn is_mounted(path: &Path) -> bool {
    let Some(parent) = path.parent() else {
        return false;
    };
    match (fs::metadata(path), fs::metadata(parent)) {
        (Ok(here), Ok(above)) => here.dev() != above.dev(),
        _ => false,
    }
}

/// Mount `fs` at `mountpoint` in a background thread and wait until the
/// kernel serves it, or the session reports an error.
pub fn mount_fuse<O: Operations>(
    fs: LayerFuse<O>,
    mountpoint: &Path,
    settings: &MountSettings,
) -> Result<MountHandle> {
    let options = settings.mount_options();
    let target = mountpoint.to_path_buf();

    // Lets the caller tell a failed mount apart from one that is still coming up
    let (status_tx, status_rx) = mpsc::channel::<String>();

    let session = std::thread::spawn(move || {
        tracing::info!("Mounting FUSE filesystem at {}", target.display());
        let result = fuser::mount2(fs, &target, &options);
        if let Err(ref e) = result {
            tracing::error!("FUSE mount error: {}", e);
            let _ = status_tx.send(e.to_string());
        }
        result
    });

    let start = Instant::now();
    loop {
        if let Ok(e) = status_rx.try_recv() {
            return Err(LayerFsError::Fuse(format!("FUSE mount failed: {}", e)));
        }

        if is_mounted(mountpoint) {
            tracing::debug!("FUSE mount verified at {}", mountpoint.display());
            break;
        }

        if start.elapsed() >= MOUNT_TIMEOUT {
            return Err(LayerFsError::Fuse(format!(
                "FUSE mount timed out - {} not mounted after {} ms",
                mountpoint.display(),
                MOUNT_TIMEOUT.as_millis()
            )));
        }

        std::thread::sleep(CHECK_INTERVAL);
    }

    Ok(MountHandle {
        mountpoint: mountpoint.to_path_buf(),
        session,
    })
}

/// Ask the system to unmount `mountpoint`. Returns Ok(false) when every
/// unmount helper failed, which usually means it was not mounted.
pub fn unmount_fuse(mountpoint: &Path) -> Result<bool> {
    let commands: &[(&str, &[&str])] = if cfg!(target_os = "macos") {
        &[("umount", &[])]
    } else {
        &[("fusermount", &["-u"]), ("fusermount3", &["-u"]), ("umount", &[])]
    };

    for (program, args) in commands {
        match std::process::Command::new(program)
            .args(*args)
            .arg(mountpoint)
            .status()
        {
            Ok(status) if status.success() => {
                tracing::info!("Unmounted {} with {}", mountpoint.display(), program);
                return Ok(true);
            }
            Ok(status) => {
                tracing::debug!("{} exited with {}", program, status);
            }
            Err(e) => {
                tracing::debug!("Failed to run {}: {}", program, e);
            }
        }
    }

    tracing::warn!(
        "Failed to unmount {} (may already be unmounted)",
        mountpoint.display()
    );
    Ok(false)
}
