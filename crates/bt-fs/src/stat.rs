//! Platform stat extraction.
//!
//! Pulls the fields the backup engine records out of [`std::fs::Metadata`]:
//! ownership, access/change times, and the birth time where the filesystem
//! tracks one. Everything here is unix-specific; a port to another platform
//! replaces this module and nothing else.

use std::fs::Metadata;
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use std::time::SystemTime;

use chrono::{DateTime, TimeZone, Utc};

use crate::error::{FsError, FsResult};

/// Ownership and timestamp data extracted from a stat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatData {
    /// Owning user id.
    pub uid: u32,
    /// Owning group id.
    pub gid: u32,
    /// Last access time.
    pub accessed_at: DateTime<Utc>,
    /// Last inode change time.
    pub changed_at: DateTime<Utc>,
    /// Creation time, where the filesystem records one.
    pub born_at: Option<DateTime<Utc>>,
}

/// Extracts [`StatData`] from a metadata value.
///
/// `path` is used for error reporting only.
pub fn extract_stat_data(path: &Path, metadata: &Metadata) -> FsResult<StatData> {
    let accessed_at = timestamp(path, metadata.atime(), metadata.atime_nsec())?;
    let changed_at = timestamp(path, metadata.ctime(), metadata.ctime_nsec())?;
    let born_at = metadata.created().ok().map(system_time_to_utc);

    Ok(StatData {
        uid: metadata.uid(),
        gid: metadata.gid(),
        accessed_at,
        changed_at,
        born_at,
    })
}

/// Converts the file's modification time to UTC.
pub fn modified_at(path: &Path, metadata: &Metadata) -> FsResult<DateTime<Utc>> {
    timestamp(path, metadata.mtime(), metadata.mtime_nsec())
}

fn timestamp(path: &Path, secs: i64, nsecs: i64) -> FsResult<DateTime<Utc>> {
    Utc.timestamp_opt(secs, nsecs as u32)
        .single()
        .ok_or_else(|| FsError::TimestampOutOfRange {
            path: path.to_path_buf(),
        })
}

fn system_time_to_utc(t: SystemTime) -> DateTime<Utc> {
    DateTime::<Utc>::from(t)
}
