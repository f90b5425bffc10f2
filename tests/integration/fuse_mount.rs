//! Real kernel mounts. Skipped when FUSE is not usable on this machine.

use crate::shared::fuse_helpers::fuse_available;
use crate::shared::TestLayout;

use std::fs;
use std::os::unix::fs::symlink;
use std::sync::Arc;

use layerfs::fuse::mount::is_mounted;
use layerfs::{mount_fuse, unmount_fuse, LayerFuse, MountSettings};

fn settings() -> MountSettings {
    MountSettings {
        fs_name: "layerfs-test".to_string(),
        allow_other: false,
    }
}

#[test]
fn test_mounted_overlay_end_to_end() {
    if !fuse_available() {
        eprintln!("Skipping real FUSE test - FUSE not available");
        return;
    }

    let layout = TestLayout::new();
    layout.seed("docs/readme", "original");
    layout.seed("docs/keep", "keep");
    symlink(layout.source_file("docs/keep"), layout.source_file("alias")).unwrap();

    let layer = layout.open();
    let handle = match mount_fuse(
        LayerFuse::new(Arc::new(layer), 0),
        &layout.mountpoint,
        &settings(),
    ) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Skipping real FUSE test - mount failed: {}", e);
            return;
        }
    };
    let mnt = handle.mountpoint().to_path_buf();
    assert!(is_mounted(&mnt));

    // Passthrough reads
    assert_eq!(
        fs::read_to_string(mnt.join("docs/readme")).unwrap(),
        "original"
    );
    assert_eq!(fs::read_link(mnt.join("alias")).unwrap(), mnt.join("docs/keep"));

    // Writes land in the upper storage only
    fs::write(mnt.join("docs/readme"), "rewritten").unwrap();
    fs::write(mnt.join("docs/new"), "fresh").unwrap();
    fs::remove_file(mnt.join("docs/keep")).unwrap();
    fs::create_dir(mnt.join("made")).unwrap();

    assert_eq!(
        fs::read_to_string(mnt.join("docs/readme")).unwrap(),
        "rewritten"
    );
    let mut listed: Vec<_> = fs::read_dir(mnt.join("docs"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    listed.sort();
    assert_eq!(listed, vec!["new", "readme"]);

    assert_eq!(
        fs::read_to_string(layout.source_file("docs/readme")).unwrap(),
        "original"
    );
    assert!(layout.source_file("docs/keep").exists());
    assert!(!layout.source_file("docs/new").exists());
    assert!(!layout.source_file("made").exists());

    // Hard links are refused by default
    let err = fs::hard_link(mnt.join("docs/new"), mnt.join("docs/twin")).unwrap_err();
    assert_eq!(err.raw_os_error(), Some(libc::EPERM));

    assert!(unmount_fuse(&mnt).unwrap());
    handle.wait().unwrap();
    assert!(!is_mounted(&mnt));

    // Everything survives a remount from the persisted ledger
    let layer = layout.open();
    let handle = match mount_fuse(LayerFuse::new(Arc::new(layer), 0), &mnt, &settings()) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Skipping remount check - mount failed: {}", e);
            return;
        }
    };
    assert_eq!(fs::read_to_string(mnt.join("docs/new")).unwrap(), "fresh");
    assert!(!mnt.join("docs/keep").exists());
    assert!(mnt.join("made").is_dir());

    assert!(unmount_fuse(&mnt).unwrap());
    handle.wait().unwrap();
}
