//! End-to-end behavior of the overlay core, driven through the `Operations`
//! trait against real temporary trees.

use crate::shared::{p, TestLayout};

use std::ffi::OsString;
use std::fs;
use std::os::unix::fs::symlink;
use std::path::PathBuf;

use layerfs::{LayerFs, Operations};

fn names(entries: &[&str]) -> Vec<OsString> {
    entries.iter().map(OsString::from).collect()
}

fn read_all(layer: &LayerFs, path: &str, fh: u64) -> Vec<u8> {
    layer.read(p(path), fh, 0, 1 << 16).unwrap()
}

fn write_file(layer: &LayerFs, path: &str, content: &[u8]) {
    let fh = layer
        .open(p(path), libc::O_WRONLY | libc::O_TRUNC)
        .unwrap();
    layer.truncate(p(path), 0, Some(fh)).unwrap();
    assert_eq!(layer.write(p(path), fh, 0, content).unwrap(), content.len());
    layer.release(p(path), fh).unwrap();
}

#[test]
fn test_write_is_visible_through_overlay_only() {
    let layout = TestLayout::new();
    layout.seed("a/x", "hi");
    let layer = layout.open();

    write_file(&layer, "/a/x", b"bye");

    let fh = layer.open(p("/a/x"), libc::O_RDONLY).unwrap();
    assert_eq!(read_all(&layer, "/a/x", fh), b"bye");
    layer.release(p("/a/x"), fh).unwrap();

    assert_eq!(fs::read_to_string(layout.source_file("a/x")).unwrap(), "hi");
    assert_eq!(fs::read_to_string(layout.upper_file("a/x")).unwrap(), "bye");
}

#[test]
fn test_promoted_directory_merges_and_hides_deletions() {
    let layout = TestLayout::new();
    layout.seed("d/1", "one");
    layout.seed("d/2", "two");
    let layer = layout.open();

    let fh = layer
        .create(p("/d/3"), 0o644, libc::O_WRONLY | libc::O_CREAT)
        .unwrap();
    layer.release(p("/d/3"), fh).unwrap();

    assert!(layer.is_shadowed(p("/d/3")));
    assert_eq!(layer.readdir(p("/d")).unwrap(), names(&["1", "2", "3"]));

    layer.unlink(p("/d/1")).unwrap();
    assert_eq!(layer.readdir(p("/d")).unwrap(), names(&["2", "3"]));
    assert!(layout.source_file("d/1").exists());
}

#[test]
fn test_created_file_survives_reload() {
    let layout = TestLayout::new();

    {
        let layer = layout.open();
        let fh = layer
            .create(p("/new"), 0o644, libc::O_RDWR | libc::O_CREAT)
            .unwrap();
        layer.write(p("/new"), fh, 0, b"persisted").unwrap();
        layer.release(p("/new"), fh).unwrap();
    }

    let layer = layout.open();
    assert!(layer.is_shadowed(p("/new")));
    let fh = layer.open(p("/new"), libc::O_RDONLY).unwrap();
    assert_eq!(read_all(&layer, "/new", fh), b"persisted");
    layer.release(p("/new"), fh).unwrap();
    assert!(!layout.source_file("new").exists());
}

#[test]
fn test_symlink_into_source_reads_back_under_mountpoint() {
    let layout = TestLayout::new();
    layout.seed("a/x", "hi");
    symlink(layout.source_file("a/x"), layout.source_file("link")).unwrap();
    let layer = layout.open();

    assert_eq!(
        layer.readlink(p("/link")).unwrap(),
        layout.mountpoint.join("a/x")
    );
}

#[test]
fn test_source_edits_show_through_until_promotion() {
    let layout = TestLayout::new();
    layout.seed("f", "v1");
    let layer = layout.open();

    let fh = layer.open(p("/f"), libc::O_RDONLY).unwrap();
    assert_eq!(read_all(&layer, "/f", fh), b"v1");
    layer.release(p("/f"), fh).unwrap();

    layout.seed("f", "v2");
    layout.seed("late", "new in source");

    let fh = layer.open(p("/f"), libc::O_RDONLY).unwrap();
    assert_eq!(read_all(&layer, "/f", fh), b"v2");
    layer.release(p("/f"), fh).unwrap();
    assert_eq!(layer.readdir(p("/")).unwrap(), names(&["f", "late"]));
    assert!(layer.ledger().is_empty());

    write_file(&layer, "/f", b"mine");
    layout.seed("f", "v3");

    let fh = layer.open(p("/f"), libc::O_RDONLY).unwrap();
    assert_eq!(read_all(&layer, "/f", fh), b"mine");
    layer.release(p("/f"), fh).unwrap();
}

#[test]
fn test_write_class_operations_never_touch_source() {
    let layout = TestLayout::new();
    layout.seed("dir/a", "a");
    layout.seed("dir/sub/b", "b");
    layout.seed("top", "top");
    let before = layout.snapshot_source();
    let layer = layout.open();

    write_file(&layer, "/dir/a", b"changed");
    layer.mkdir(p("/dir/new"), 0o755).unwrap();
    layer.rename(p("/dir/sub/b"), p("/dir/new/b")).unwrap();
    layer.rmdir(p("/dir/sub")).unwrap();
    layer.chmod(p("/top"), 0o600).unwrap();
    layer.truncate(p("/top"), 1, None).unwrap();
    layer.unlink(p("/top")).unwrap();
    layer.symlink(p("/dir/l"), p("a")).unwrap();

    assert_eq!(layout.snapshot_source(), before);
    assert_eq!(layer.readdir(p("/")).unwrap(), names(&["dir"]));
    assert_eq!(
        layer.readdir(p("/dir")).unwrap(),
        names(&["a", "l", "new"])
    );
}

#[test]
fn test_repeated_promotion_records_once_and_keeps_edits() {
    let layout = TestLayout::new();
    layout.seed("d/f", "orig");
    let layer = layout.open();

    layer.chmod(p("/d"), 0o755).unwrap();
    write_file(&layer, "/d/f", b"edited");
    layer.mkdir(p("/d/n"), 0o755).unwrap();
    layer.chmod(p("/d"), 0o700).unwrap();

    assert_eq!(layer.ledger().len(), 1);
    assert_eq!(
        fs::read_to_string(layout.upper_file("d/f")).unwrap(),
        "edited"
    );

    drop(layer);
    let entries = layerfs::overlay::ledger::read_entries(
        &layout.storage.join(layerfs::overlay::LEDGER_FILE),
    )
    .unwrap();
    assert_eq!(entries, vec![PathBuf::from("/d")]);
}

#[test]
fn test_descendants_of_promoted_directory_are_shadowed() {
    let layout = TestLayout::new();
    layout.seed("d/x/y", "deep");
    let layer = layout.open();

    layer.chmod(p("/d"), 0o755).unwrap();

    assert!(layer.is_shadowed(p("/d/x")));
    assert!(layer.is_shadowed(p("/d/x/y")));
    assert!(!layer.is_shadowed(p("/")));

    // The source changing afterwards no longer reaches the promoted copy
    layout.seed("d/x/y", "changed upstream");
    let fh = layer.open(p("/d/x/y"), libc::O_RDONLY).unwrap();
    assert_eq!(read_all(&layer, "/d/x/y", fh), b"deep");
    layer.release(p("/d/x/y"), fh).unwrap();
}

#[test]
fn test_promoting_parent_keeps_earlier_child_edits() {
    let layout = TestLayout::new();
    layout.seed("d/c", "source");
    layout.seed("d/other", "other");
    let layer = layout.open();

    write_file(&layer, "/d/c", b"child edit");
    assert!(!layer.is_shadowed(p("/d")));

    layer.chmod(p("/d"), 0o755).unwrap();
    layer.mkdir(p("/d/trigger"), 0o755).unwrap();
    assert!(layer.is_shadowed(p("/d")));

    let fh = layer.open(p("/d/c"), libc::O_RDONLY).unwrap();
    assert_eq!(read_all(&layer, "/d/c", fh), b"child edit");
    layer.release(p("/d/c"), fh).unwrap();
    assert_eq!(
        layer.readdir(p("/d")).unwrap(),
        names(&["c", "other", "trigger"])
    );
}

#[test]
fn test_deleted_file_disappears_everywhere() {
    let layout = TestLayout::new();
    layout.seed("gone", "still in source");
    let layer = layout.open();

    layer.unlink(p("/gone")).unwrap();

    assert!(layer.readdir(p("/")).unwrap().is_empty());
    assert_eq!(
        layer.getattr(p("/gone")).unwrap_err().errno(),
        libc::ENOENT
    );
    assert_eq!(
        layer.open(p("/gone"), libc::O_RDONLY).unwrap_err().errno(),
        libc::ENOENT
    );
    assert!(layout.source_file("gone").exists());

    // And it stays gone after a reload
    drop(layer);
    let layer = layout.open();
    assert_eq!(
        layer.getattr(p("/gone")).unwrap_err().errno(),
        libc::ENOENT
    );
}

#[test]
fn test_read_handle_follows_promotion_by_another_handle() {
    let layout = TestLayout::new();
    layout.seed("f", "0123456789");
    let layer = layout.open();

    let reader = layer.open(p("/f"), libc::O_RDONLY).unwrap();
    assert_eq!(layer.read(p("/f"), reader, 0, 4).unwrap(), b"0123");

    let writer = layer.open(p("/f"), libc::O_WRONLY).unwrap();
    layer.write(p("/f"), writer, 0, b"abcd").unwrap();
    layer.release(p("/f"), writer).unwrap();

    assert_eq!(layer.read(p("/f"), reader, 0, 10).unwrap(), b"abcd456789");
    layer.release(p("/f"), reader).unwrap();
    assert_eq!(
        fs::read_to_string(layout.source_file("f")).unwrap(),
        "0123456789"
    );
}

#[test]
fn test_storage_cannot_be_shared_by_two_overlays() {
    let layout = TestLayout::new();
    let _first = layout.open();

    let second = LayerFs::new(
        layout.source.clone(),
        layout.storage.clone(),
        layout.mountpoint.clone(),
        Default::default(),
    );
    assert!(matches!(second, Err(layerfs::LayerFsError::Config(_))));
}
