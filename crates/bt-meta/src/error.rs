//! Error types for the metadata store.

use thiserror::Error;

/// Result type alias for metadata operations.
pub type MetaResult<T> = Result<T, MetaError>;

/// Error variants for metadata operations.
#[derive(Debug, Error)]
pub enum MetaError {
    /// Wraps SQLite errors.
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Wraps standard I/O errors (database snapshot copies).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The database schema is newer than this binary understands.
    #[error("schema version {found} is newer than supported version {supported}")]
    SchemaOutOfDate {
        /// Version found in the database.
        found: i32,
        /// Latest version this binary knows.
        supported: i32,
    },

    /// A stored row failed to parse back into its model type.
    #[error("corrupt row in {table}: {reason}")]
    CorruptRow {
        /// Table the row came from.
        table: &'static str,
        /// Why decoding failed.
        reason: String,
    },

    /// A timestamp falls outside the persistable range.
    #[error("timestamp out of range")]
    TimestampOutOfRange,

    /// The store has been closed.
    #[error("metadata store is closed")]
    Closed,
}
