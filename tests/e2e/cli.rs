//! Command-line behavior that does not need a kernel mount.

use crate::shared::{get_layerfs_path, TestLayout};

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

use layerfs::overlay::LEDGER_FILE;

fn layerfs() -> Command {
    let mut cmd = Command::new(get_layerfs_path());
    cmd.env_remove("LAYERFS_LOG");
    cmd
}

#[test]
fn test_help_lists_subcommands() {
    layerfs()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("mount"))
        .stdout(predicate::str::contains("shadow"));
}

#[test]
fn test_shadow_lists_sorted_entries() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join(LEDGER_FILE), "/src/main.rs\n/docs\n/src/main.rs\n").unwrap();

    layerfs()
        .arg("shadow")
        .arg(temp.path())
        .assert()
        .success()
        .stdout("/docs\n/src/main.rs\n");
}

#[test]
fn test_shadow_json_output() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join(LEDGER_FILE), "/b\n/a\n").unwrap();

    let output = layerfs()
        .args(["shadow", "--json"])
        .arg(temp.path())
        .output()
        .expect("Failed to run shadow command");
    assert!(output.status.success());

    let parsed: Vec<String> = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(parsed, vec!["/a", "/b"]);
}

#[test]
fn test_shadow_on_fresh_storage_prints_nothing() {
    let temp = TempDir::new().unwrap();
    layerfs()
        .arg("shadow")
        .arg(temp.path())
        .assert()
        .success()
        .stdout("");
}

#[test]
fn test_shadow_reflects_overlay_writes() {
    let layout = TestLayout::new();
    layout.seed("a/x", "hi");
    {
        use layerfs::Operations;
        let layer = layout.open();
        layer.chmod(std::path::Path::new("/a/x"), 0o600).unwrap();
        layer
            .mkdir(std::path::Path::new("/made"), 0o755)
            .unwrap();
    }

    layerfs()
        .arg("shadow")
        .arg(&layout.storage)
        .assert()
        .success()
        .stdout("/a/x\n/made\n");
}

#[test]
fn test_shadow_missing_storage_fails() {
    let temp = TempDir::new().unwrap();
    layerfs()
        .arg("shadow")
        .arg(temp.path().join("missing"))
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Error:"));
}

#[test]
fn test_mount_rejects_missing_source() {
    let layout = TestLayout::new();
    layerfs()
        .arg("mount")
        .arg(layout.source.join("missing"))
        .arg(&layout.storage)
        .arg(&layout.mountpoint)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Error: Invalid argument"));
    assert!(!layout.storage.exists());
}

#[test]
fn test_mount_rejects_nested_mountpoint() {
    let layout = TestLayout::new();
    fs::create_dir(layout.source.join("inside")).unwrap();
    layerfs()
        .arg("mount")
        .arg(&layout.source)
        .arg(&layout.storage)
        .arg(layout.source.join("inside"))
        .assert()
        .code(1)
        .stderr(predicate::str::contains("must not be inside source"));
}

#[test]
fn test_mount_reports_bad_config_from_config_dir() {
    let layout = TestLayout::new();
    let config_dir = TempDir::new().unwrap();
    fs::write(
        config_dir.path().join("config.toml"),
        "[fuse]\nttl_secs = 99999\n",
    )
    .unwrap();

    layerfs()
        .env("LAYERFS_CONFIG_DIR", config_dir.path())
        .arg("mount")
        .arg(&layout.source)
        .arg(&layout.storage)
        .arg(&layout.mountpoint)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Config error"));
}

#[test]
fn test_mount_requires_explicit_config_to_exist() {
    let layout = TestLayout::new();
    layerfs()
        .arg("mount")
        .arg(&layout.source)
        .arg(&layout.storage)
        .arg(&layout.mountpoint)
        .arg("--config")
        .arg(layout.source.join("absent.toml"))
        .assert()
        .code(1)
        .stderr(predicate::str::contains("does not exist"));
}
