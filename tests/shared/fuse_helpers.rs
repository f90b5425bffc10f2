use std::path::Path;
use std::process::Command;

/// Real mounts need the kernel device and one of the unmount helpers.
pub fn fuse_available() -> bool {
    if cfg!(target_os = "macos") {
        return Path::new("/Library/Filesystems/macfuse.fs").exists();
    }
    if !Path::new("/dev/fuse").exists() {
        return false;
    }
    ["fusermount", "fusermount3"].iter().any(|program| {
        Command::new(program)
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    })
}
