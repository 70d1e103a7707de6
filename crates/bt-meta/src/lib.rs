#![warn(missing_docs)]

//! bt metadata subsystem: the single local relational database recording
//! tracked directories, files, per-file snapshot history, content records,
//! and backup-operation history.
//!
//! The only writer of authoritative history is the atomic commit
//! [`store::MetadataStore::create_file_snapshot_and_content`]; everything
//! else is read-mostly. The SQLite implementation serves both file-backed
//! databases and `:memory:` ones, so tests and tiny workloads run the same
//! transaction code as production.

pub mod clock;
pub mod error;
pub mod ids;
pub mod migrations;
pub mod model;
pub mod sqlite;
pub mod store;

pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{MetaError, MetaResult};
pub use ids::{IdGenerator, SequentialIdGenerator, UuidGenerator};
pub use model::{
    BackupOperation, CommitOutcome, Content, Directory, File, FileSnapshot, NewSnapshot,
    OperationStatus, SnapshotData,
};
pub use sqlite::SqliteStore;
pub use store::MetadataStore;
