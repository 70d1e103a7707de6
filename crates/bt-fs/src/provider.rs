//! The filesystem capability trait and its local implementation.

use std::fs::{File, Metadata};
use std::io::Read;
use std::os::unix::fs::FileTypeExt;
use std::path::Path;

use tracing::debug;
use walkdir::WalkDir;

use crate::error::{FsError, FsResult};
use crate::ignore::matcher_for_root;
use crate::path::ResolvedPath;
use crate::stat::{extract_stat_data, StatData};

/// Capability set the backup engine needs from the local filesystem.
///
/// The engine is written against this trait only; [`LocalFilesystem`] is the
/// production implementation and tests substitute fixture directories
/// through the same surface.
pub trait Filesystem: Send + Sync {
    /// Validates a raw path and returns a handle carrying the absolute path,
    /// directory flag, and the stat taken at resolution time.
    ///
    /// Symlinks, devices, named pipes, and sockets fail with
    /// [`FsError::UnsupportedEntry`].
    fn resolve(&self, raw: &Path) -> FsResult<ResolvedPath>;

    /// Opens a streaming reader over a regular file.
    fn open(&self, path: &ResolvedPath) -> FsResult<Box<dyn Read + Send>>;

    /// Takes a fresh stat of the path.
    fn stat(&self, path: &ResolvedPath) -> FsResult<Metadata>;

    /// Extracts ownership and timestamp data from a stat.
    fn extract_stat(&self, path: &Path, metadata: &Metadata) -> FsResult<StatData>;

    /// Enumerates regular files within a directory, honouring ignore rules.
    ///
    /// Non-recursive enumeration lists direct children only. Entries that
    /// are not regular files are skipped silently, as are ignored files.
    /// The result is sorted by path.
    fn find_files(&self, path: &ResolvedPath, recursive: bool) -> FsResult<Vec<ResolvedPath>>;

    /// Evaluates the ignore rules for one file relative to a tracked
    /// directory root.
    fn is_ignored(&self, path: &Path, root: &Path) -> FsResult<bool>;
}

/// Production [`Filesystem`] over the host OS.
pub struct LocalFilesystem {
    config_patterns: Vec<String>,
}

impl LocalFilesystem {
    /// Creates a provider with ignore patterns supplied by configuration.
    pub fn new(config_patterns: Vec<String>) -> Self {
        Self { config_patterns }
    }

    fn classify(path: &Path, metadata: &Metadata) -> FsResult<()> {
        let ft = metadata.file_type();
        let kind = if ft.is_symlink() {
            "symlink"
        } else if ft.is_block_device() {
            "block device"
        } else if ft.is_char_device() {
            "character device"
        } else if ft.is_fifo() {
            "named pipe"
        } else if ft.is_socket() {
            "socket"
        } else {
            return Ok(());
        };
        Err(FsError::UnsupportedEntry {
            path: path.to_path_buf(),
            kind,
        })
    }
}

impl Default for LocalFilesystem {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl Filesystem for LocalFilesystem {
    fn resolve(&self, raw: &Path) -> FsResult<ResolvedPath> {
        let absolute = std::path::absolute(raw).map_err(|err| FsError::InvalidPath {
            path: raw.to_path_buf(),
            reason: err.to_string(),
        })?;

        // symlink_metadata so a symlink is seen as itself, not its target.
        let metadata = std::fs::symlink_metadata(&absolute)?;
        Self::classify(&absolute, &metadata)?;

        let is_dir = metadata.is_dir();
        debug!(path = %absolute.display(), is_dir, "resolved path");
        Ok(ResolvedPath::new(absolute, is_dir, metadata))
    }

    fn open(&self, path: &ResolvedPath) -> FsResult<Box<dyn Read + Send>> {
        if path.is_dir() {
            return Err(FsError::NotAFile {
                path: path.path().to_path_buf(),
            });
        }
        let file = File::open(path.path())?;
        Ok(Box::new(file))
    }

    fn stat(&self, path: &ResolvedPath) -> FsResult<Metadata> {
        Ok(std::fs::symlink_metadata(path.path())?)
    }

    fn extract_stat(&self, path: &Path, metadata: &Metadata) -> FsResult<StatData> {
        extract_stat_data(path, metadata)
    }

    fn find_files(&self, path: &ResolvedPath, recursive: bool) -> FsResult<Vec<ResolvedPath>> {
        if !path.is_dir() {
            return Err(FsError::NotADirectory {
                path: path.path().to_path_buf(),
            });
        }

        let root = path.path();
        let matcher = matcher_for_root(root, &self.config_patterns)?;

        let max_depth = if recursive { usize::MAX } else { 1 };
        let mut files = Vec::new();
        for entry in WalkDir::new(root)
            .max_depth(max_depth)
            .sort_by_file_name()
            .into_iter()
        {
            let entry = entry.map_err(|err| {
                FsError::Io(err.into_io_error().unwrap_or_else(|| {
                    std::io::Error::other("directory walk failed")
                }))
            })?;
            if !entry.file_type().is_file() {
                // Directories descend; symlinks, devices, sockets are skipped.
                continue;
            }
            let file_path = entry.path();
            let Ok(relative) = file_path.strip_prefix(root) else {
                continue;
            };
            if matcher.matches(relative) {
                debug!(path = %file_path.display(), "skipping ignored file");
                continue;
            }
            let metadata = entry.metadata().map_err(|err| {
                FsError::Io(err.into_io_error().unwrap_or_else(|| {
                    std::io::Error::other("stat during walk failed")
                }))
            })?;
            files.push(ResolvedPath::new(file_path.to_path_buf(), false, metadata));
        }

        debug!(root = %root.display(), count = files.len(), recursive, "found files");
        Ok(files)
    }

    fn is_ignored(&self, path: &Path, root: &Path) -> FsResult<bool> {
        let relative = path.strip_prefix(root).unwrap_or(path);
        let matcher = matcher_for_root(root, &self.config_patterns)?;
        Ok(matcher.matches(relative))
    }
}
