//! Validated path handles.

use std::fs::Metadata;
use std::path::{Path, PathBuf};

/// A validated, absolute path together with the stat taken at resolution
/// time.
///
/// The cached metadata is the "first stat" the staging protocol builds its
/// snapshot from; callers that need a fresh view re-stat through the
/// provider.
#[derive(Debug, Clone)]
pub struct ResolvedPath {
    path: PathBuf,
    is_dir: bool,
    metadata: Metadata,
}

impl ResolvedPath {
    /// Creates a resolved path from its parts. Callers are expected to have
    /// validated that `path` is absolute and refers to a regular file or
    /// directory.
    pub fn new(path: PathBuf, is_dir: bool, metadata: Metadata) -> Self {
        Self {
            path,
            is_dir,
            metadata,
        }
    }

    /// The absolute path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the entry is a directory.
    pub fn is_dir(&self) -> bool {
        self.is_dir
    }

    /// The stat captured when this path was resolved.
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// The final path component, if any.
    pub fn file_name(&self) -> Option<&std::ffi::OsStr> {
        self.path.file_name()
    }

    /// This path relative to `root`, or `None` when it is not under `root`.
    pub fn relative_to(&self, root: &Path) -> Option<PathBuf> {
        self.path.strip_prefix(root).ok().map(Path::to_path_buf)
    }
}

impl std::fmt::Display for ResolvedPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.path.display())
    }
}
