//! Error types for vault operations.

use thiserror::Error;

/// Result type alias for vault operations.
pub type VaultResult<T> = Result<T, VaultError>;

/// Error variants for vault operations.
#[derive(Debug, Error)]
pub enum VaultError {
    /// Wraps standard I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No content object exists under the checksum.
    #[error("content not found: {checksum}")]
    ContentNotFound {
        /// The missing content checksum.
        checksum: String,
    },

    /// No metadata slot exists for the host and name.
    #[error("metadata not found for host {host_id}: {name}")]
    MetadataNotFound {
        /// The host the slot is scoped to.
        host_id: String,
        /// The slot name.
        name: String,
    },

    /// The reader yielded a different number of bytes than declared.
    #[error("size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        /// Declared byte count.
        expected: u64,
        /// Observed byte count.
        actual: u64,
    },

    /// A stored version marker could not be parsed.
    #[error("corrupt version marker for host {host_id}, name {name}: {reason}")]
    CorruptVersion {
        /// The host the slot is scoped to.
        host_id: String,
        /// The slot name.
        name: String,
        /// Why parsing failed.
        reason: String,
    },

    /// The backing store is unreachable or mis-structured.
    #[error("vault setup invalid: {0}")]
    InvalidSetup(String),

    /// A remote backend failure that is not an I/O error.
    #[error("object store error: {0}")]
    Backend(String),
}
