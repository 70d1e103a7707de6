//! Error types for the encryption subsystem.

use thiserror::Error;

/// Result type alias for encryption operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Error variants for encryption operations.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Wraps standard I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The passphrase does not unlock the private key.
    #[error("invalid passphrase")]
    InvalidPassphrase,

    /// Key files are absent; `setup` has not been run.
    #[error("encryption is not configured")]
    NotConfigured,

    /// A stored key file could not be parsed.
    #[error("malformed key file {path}: {reason}")]
    MalformedKey {
        /// The key file path.
        path: std::path::PathBuf,
        /// Why parsing failed.
        reason: String,
    },

    /// The age envelope could not be produced.
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    /// The age envelope could not be consumed.
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),
}
