#![warn(missing_docs)]

//! bt filesystem provider: path resolution, streaming open, unix stat
//! extraction, ignore matching, and directory walks.
//!
//! Everything the backup engine learns about the local filesystem flows
//! through the [`Filesystem`] trait so that tests can substitute fixtures
//! and platform-specific stat handling stays in one place.

pub mod error;
pub mod ignore;
pub mod path;
pub mod provider;
pub mod stat;

pub use error::{FsError, FsResult};
pub use ignore::{parse_ignore_file, IgnoreMatcher, IGNORE_FILE_NAME};
pub use path::ResolvedPath;
pub use provider::{Filesystem, LocalFilesystem};
pub use stat::StatData;
