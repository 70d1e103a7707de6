#![warn(missing_docs)]

//! bt staging subsystem: the write-ahead queue between the local filesystem
//! and the vault.
//!
//! A staged file's bytes live in a content-addressed byte store (one copy
//! per checksum, reference-counted); an ordered queue of
//! (directory, relative path, snapshot) operations records what awaits
//! commit. [`StagingArea`] owns the protocol and its single mutex; the
//! storage mechanics are pluggable through [`StagingStore`], with an
//! in-memory implementation for tests and small workloads and a durable
//! on-disk one for real use.

pub mod area;
pub mod error;
pub mod filesystem;
pub mod memory;
pub mod operation;
pub mod store;

pub use area::{DrainError, Processed, StagingArea};
pub use error::{StagingError, StagingResult};
pub use filesystem::FilesystemStagingStore;
pub use memory::MemoryStagingStore;
pub use operation::StagedOperation;
pub use store::{StagingStore, StoredContent};
