use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};

/// Maps logical overlay paths onto the two backing trees.
///
/// A logical path is rooted at `/` (the overlay root), has no trailing
/// separator and contains no `.` or `..` components. Both mapping functions
/// are pure: no I/O is performed.
#[derive(Debug, Clone)]
pub struct PathNamer {
    source_root: PathBuf,
    upper_root: PathBuf,
}

impl PathNamer {
    pub fn new(source_root: PathBuf, upper_root: PathBuf) -> Self {
        PathNamer {
            source_root,
            upper_root,
        }
    }

    pub fn source_root(&self) -> &Path {
        &self.source_root
    }

    pub fn upper_root(&self) -> &Path {
        &self.upper_root
    }

    /// Absolute path of `logical` inside the source tree.
    pub fn source_path(&self, logical: &Path) -> PathBuf {
        join_under(&self.source_root, logical)
    }

    /// Absolute path of `logical` inside the upper storage.
    pub fn upper_path(&self, logical: &Path) -> PathBuf {
        join_under(&self.upper_root, logical)
    }
}

/// Joins a logical path onto `base` without ever producing a trailing separator.
pub(crate) fn join_under(base: &Path, logical: &Path) -> PathBuf {
    let mut out = base.to_path_buf();
    for component in normalize(logical).components() {
        if let Component::Normal(name) = component {
            out.push(name);
        }
    }
    out
}

/// Canonical form of a logical path: rooted at `/`, `.` dropped, `..`
/// resolved lexically and never climbing above the root.
pub fn normalize(logical: &Path) -> PathBuf {
    let mut out = PathBuf::from("/");
    for component in logical.components() {
        match component {
            Component::Normal(name) => out.push(name),
            Component::ParentDir => {
                out.pop();
            }
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
        }
    }
    out
}

/// Parent of a logical path, `None` for the root.
pub fn parent(logical: &Path) -> Option<&Path> {
    if is_root(logical) {
        None
    } else {
        logical.parent()
    }
}

pub fn is_root(logical: &Path) -> bool {
    logical == Path::new("/")
}

pub fn child(logical: &Path, name: &OsStr) -> PathBuf {
    logical.join(name)
}
