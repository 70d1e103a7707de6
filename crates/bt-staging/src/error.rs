//! Error types for the staging subsystem.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for staging operations.
pub type StagingResult<T> = Result<T, StagingError>;

/// Error variants for staging operations.
#[derive(Debug, Error)]
pub enum StagingError {
    /// Wraps standard I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Wraps filesystem-provider errors.
    #[error(transparent)]
    Fs(#[from] bt_fs::FsError),

    /// The source file changed between the pre-read and post-read stats.
    #[error("file changed during staging: {path}")]
    FileChanged {
        /// The file that changed.
        path: PathBuf,
    },

    /// Staging the file would exceed the byte-size budget.
    #[error("staging area full: {total} bytes staged exceeds budget of {budget}")]
    StagingFull {
        /// Total staged bytes including the rejected content.
        total: u64,
        /// The configured budget.
        budget: u64,
    },

    /// A queue entry references content bytes that are not in the store.
    #[error("staged content missing: {checksum}")]
    ContentMissing {
        /// The referenced checksum.
        checksum: String,
    },

    /// The durable queue document failed to parse.
    #[error("corrupt staging queue at {path}: {reason}")]
    CorruptQueue {
        /// The queue document path.
        path: PathBuf,
        /// Why parsing failed.
        reason: String,
    },
}
