//! Error types for the orchestration engine.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Error variants for engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The path is not inside any tracked directory.
    #[error("not inside a tracked directory: {path}")]
    NotTracked {
        /// The offending path.
        path: PathBuf,
    },

    /// A directly-staged file matches the ignore rules.
    #[error("file is ignored: {path}")]
    Ignored {
        /// The ignored path.
        path: PathBuf,
    },

    /// The file is not known to the metadata store.
    #[error("file has never been backed up: {path}")]
    UnknownFile {
        /// The unknown path.
        path: PathBuf,
    },

    /// No snapshot matches the requested checksum.
    #[error("no snapshot of {path} with checksum {checksum}")]
    SnapshotNotFound {
        /// The file path.
        path: PathBuf,
        /// The requested checksum.
        checksum: String,
    },

    /// The file has no current snapshot to restore.
    #[error("file has no backed-up version: {path}")]
    NoCurrentSnapshot {
        /// The file path.
        path: PathBuf,
    },

    /// A snapshot references a content record that is absent.
    #[error("content record missing: {checksum}")]
    ContentMissing {
        /// The missing checksum.
        checksum: String,
    },

    /// An encrypted restore was attempted without an unlocked key.
    #[error("content is encrypted; restore requires the passphrase: {path}")]
    NeedsDecryption {
        /// The file path.
        path: PathBuf,
    },

    /// The restore target already exists; restore never overwrites.
    #[error("restore target already exists: {path}")]
    OutputExists {
        /// The existing target path.
        path: PathBuf,
    },

    /// The vault has seen a newer database than the local one.
    #[error(
        "local metadata (version {local}) is behind the vault (version {remote}); \
         restore the database from the vault or re-initialise"
    )]
    LocalBehind {
        /// The local max operation id.
        local: i64,
        /// The vault's stored version.
        remote: i64,
    },

    /// The caller combined arguments that make no sense together.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// Wraps filesystem-provider errors.
    #[error(transparent)]
    Fs(#[from] bt_fs::FsError),

    /// Wraps metadata-store errors.
    #[error(transparent)]
    Meta(#[from] bt_meta::MetaError),

    /// Wraps vault errors.
    #[error(transparent)]
    Vault(#[from] bt_vault::VaultError),

    /// Wraps encryption errors.
    #[error(transparent)]
    Crypto(#[from] bt_crypto::CryptoError),

    /// Wraps staging errors.
    #[error(transparent)]
    Staging(#[from] bt_staging::StagingError),

    /// Wraps standard I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file problems.
    #[error("configuration error: {0}")]
    Config(String),
}
