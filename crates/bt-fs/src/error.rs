//! Error types for the filesystem provider.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for filesystem operations.
pub type FsResult<T> = Result<T, FsError>;

/// Error variants for filesystem operations.
#[derive(Debug, Error)]
pub enum FsError {
    /// Wraps standard I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The entry is a symlink, device, named pipe, or socket.
    #[error("unsupported entry {path}: {kind}")]
    UnsupportedEntry {
        /// The offending path.
        path: PathBuf,
        /// Human-readable entry kind (symlink, block device, ...).
        kind: &'static str,
    },

    /// A directory was required but the path is not one.
    #[error("not a directory: {path}")]
    NotADirectory {
        /// The offending path.
        path: PathBuf,
    },

    /// A regular file was required but the path is not one.
    #[error("not a regular file: {path}")]
    NotAFile {
        /// The offending path.
        path: PathBuf,
    },

    /// The path could not be made absolute or does not exist.
    #[error("cannot resolve path {path}: {reason}")]
    InvalidPath {
        /// The raw path as given.
        path: PathBuf,
        /// Why resolution failed.
        reason: String,
    },

    /// A timestamp on the file is outside the representable range.
    #[error("timestamp out of range on {path}")]
    TimestampOutOfRange {
        /// The file carrying the bad timestamp.
        path: PathBuf,
    },
}
