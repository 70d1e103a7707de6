//! Version history queries.

use std::path::Path;

use bt_meta::BackupOperation;
use chrono::{DateTime, Utc};

use crate::error::{EngineError, EngineResult};
use crate::service::BackupService;

/// One recorded version of a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHistoryEntry {
    /// Plaintext content checksum of the version.
    pub checksum: String,
    /// When the version was committed.
    pub backed_up_at: DateTime<Utc>,
    /// File size at that version.
    pub size: u64,
    /// The file's modification time at that version.
    pub modified_at: DateTime<Utc>,
    /// Whether this is the file's current snapshot.
    pub is_current: bool,
}

impl BackupService {
    /// Every recorded version of a file, newest first.
    ///
    /// The file need not exist on disk any more; only the metadata store is
    /// consulted.
    pub fn get_file_history(&self, path: &Path) -> EngineResult<Vec<FileHistoryEntry>> {
        let absolute = std::path::absolute(path)?;
        let tracked = self.tracked_directory_for(&absolute)?;
        let relative = self.relative_within(&tracked, &absolute)?;
        let file = self
            .meta
            .find_file_by_path(&tracked, &relative)?
            .ok_or_else(|| EngineError::UnknownFile {
                path: absolute.clone(),
            })?;

        let mut entries: Vec<FileHistoryEntry> = self
            .meta
            .find_file_snapshots_for_file(&file)?
            .into_iter()
            .map(|snapshot| FileHistoryEntry {
                checksum: snapshot.data.content_id.clone(),
                backed_up_at: snapshot.created_at,
                size: snapshot.data.size,
                modified_at: snapshot.data.modified_at,
                is_current: file.current_snapshot_id == Some(snapshot.id),
            })
            .collect();
        entries.reverse();
        Ok(entries)
    }

    /// The most recent backup operations, newest first.
    pub fn get_history(&self, limit: u32) -> EngineResult<Vec<BackupOperation>> {
        Ok(self.meta.list_backup_operations(limit)?)
    }
}
