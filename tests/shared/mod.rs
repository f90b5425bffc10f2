#![allow(dead_code)]

pub mod fuse_helpers;

use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use layerfs::{LayerFs, OverlayOptions};

pub fn get_layerfs_path() -> PathBuf {
    assert_cmd::cargo::cargo_bin!("layerfs").to_path_buf()
}

/// A source tree, layer storage and mountpoint under one temporary root.
pub struct TestLayout {
    _temp: TempDir,
    pub source: PathBuf,
    pub storage: PathBuf,
    pub mountpoint: PathBuf,
}

impl TestLayout {
    pub fn new() -> Self {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let root = temp.path().canonicalize().expect("Failed to resolve temp dir");
        let source = root.join("source");
        let storage = root.join("layer");
        let mountpoint = root.join("mnt");
        fs::create_dir(&source).expect("Failed to create source");
        fs::create_dir(&mountpoint).expect("Failed to create mountpoint");
        TestLayout {
            _temp: temp,
            source,
            storage,
            mountpoint,
        }
    }

    pub fn open(&self) -> LayerFs {
        self.open_with(OverlayOptions::default())
    }

    pub fn open_with(&self, options: OverlayOptions) -> LayerFs {
        LayerFs::new(
            self.source.clone(),
            self.storage.clone(),
            self.mountpoint.clone(),
            options,
        )
        .expect("Failed to open overlay")
    }

    /// Write `content` at `rel` under the source tree, creating parents.
    pub fn seed(&self, rel: &str, content: &str) {
        let path = self.source.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create source parent");
        }
        fs::write(path, content).expect("Failed to seed source file");
    }

    pub fn source_file(&self, rel: &str) -> PathBuf {
        self.source.join(rel)
    }

    pub fn upper_file(&self, rel: &str) -> PathBuf {
        self.storage.join(layerfs::overlay::UPPER_DIR).join(rel)
    }

    /// Every file and directory under the source tree with its content,
    /// for checking the overlay never wrote there.
    pub fn snapshot_source(&self) -> Vec<(PathBuf, Option<Vec<u8>>)> {
        let mut entries = Vec::new();
        collect(&self.source, &mut entries);
        entries.sort();
        entries
    }
}

fn collect(dir: &Path, out: &mut Vec<(PathBuf, Option<Vec<u8>>)>) {
    for entry in fs::read_dir(dir).expect("Failed to read dir") {
        let path = entry.expect("Failed to read entry").path();
        let meta = fs::symlink_metadata(&path).expect("Failed to stat entry");
        if meta.is_dir() {
            out.push((path.clone(), None));
            collect(&path, out);
        } else if meta.is_file() {
            let content = fs::read(&path).expect("Failed to read file");
            out.push((path, Some(content)));
        } else {
            out.push((path, None));
        }
    }
}

pub fn p(path: &str) -> &Path {
    Path::new(path)
}
