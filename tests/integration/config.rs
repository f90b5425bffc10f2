use std::fs;
use tempfile::TempDir;

use layerfs::config::validate_config;
use layerfs::{load_config, Config, LayerFsError, OverlayOptions};

#[test]
fn test_full_config_file() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("config.toml");
    fs::write(
        &path,
        r#"
[overlay]
allow_hardlinks = true
allow_cross_device_symlinks = false

[fuse]
ttl_secs = 1
allow_other = true
fs_name = "project-overlay"
"#,
    )
    .unwrap();

    let config = load_config(Some(&path)).expect("Failed to load config");

    assert_eq!(
        config.overlay_options(),
        OverlayOptions {
            allow_hardlinks: true,
            allow_cross_device_symlinks: false,
        }
    );
    assert_eq!(config.fuse.get_ttl_secs(), 1);
    assert!(config.fuse.allow_other);
    assert_eq!(config.fuse.get_fs_name(), "project-overlay");
}

#[test]
fn test_saved_config_loads_back() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("config.toml");

    let mut config = Config::default();
    config.overlay.allow_cross_device_symlinks = true;
    config.fuse.ttl_secs = Some(30);
    fs::write(&path, toml::to_string_pretty(&config).unwrap()).unwrap();

    assert_eq!(load_config(Some(&path)).unwrap(), config);
}

#[test]
fn test_unknown_sections_are_ignored() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("config.toml");
    fs::write(&path, "[future]\nsetting = 1\n").unwrap();

    assert_eq!(load_config(Some(&path)).unwrap(), Config::default());
}

#[test]
fn test_wrong_types_are_config_errors() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("config.toml");
    fs::write(&path, "[overlay]\nallow_hardlinks = \"yes\"\n").unwrap();

    match load_config(Some(&path)) {
        Err(LayerFsError::Config(message)) => {
            assert!(message.contains("config.toml"), "{}", message)
        }
        other => panic!("expected a config error, got {:?}", other),
    }
}

#[test]
fn test_default_config_is_valid() {
    assert!(validate_config(&Config::default()).is_ok());
}
