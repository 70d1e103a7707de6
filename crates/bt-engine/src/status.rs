//! Status reporting: disk versus database versus staging queue.

use std::collections::BTreeMap;
use std::path::Path;

use bt_fs::stat::modified_at;
use tracing::debug;

use crate::error::EngineResult;
use crate::service::BackupService;

/// Backup state of one file under a queried directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStatus {
    /// Path relative to the tracked directory root.
    pub relative_path: String,
    /// Whether the file has a committed current snapshot.
    pub is_backed_up: bool,
    /// Whether an operation for the file sits in the staging queue.
    pub is_staged: bool,
    /// Whether the on-disk file differs from its current snapshot (size or
    /// mtime), or the file is known to the database but gone from disk.
    pub is_modified_since: bool,
}

impl BackupService {
    /// Reports the backup state of every file under `path`.
    ///
    /// Files on disk are compared against their current snapshots; files
    /// the database knows about but that are missing from disk under the
    /// queried subtree are reported as backed-up-and-modified.
    pub fn get_status(&self, path: &Path, recursive: bool) -> EngineResult<Vec<FileStatus>> {
        let resolved = self.fs.resolve(path)?;
        if !resolved.is_dir() {
            return Err(bt_fs::FsError::NotADirectory {
                path: resolved.path().to_path_buf(),
            }
            .into());
        }

        let tracked = self.tracked_directory_for(resolved.path())?;
        let tracked_root = Path::new(&tracked.path);
        let known = self.meta.find_files_by_directory(&tracked)?;
        let known_by_name: BTreeMap<&str, &bt_meta::File> =
            known.iter().map(|f| (f.name.as_str(), f)).collect();

        let mut statuses: BTreeMap<String, FileStatus> = BTreeMap::new();

        for file in self.fs.find_files(&resolved, recursive)? {
            let relative = self.relative_within(&tracked, file.path())?;
            let record = known_by_name.get(relative.as_str());
            let current = record.and_then(|f| f.current_snapshot_id);

            let is_modified_since = match current {
                Some(snapshot_id) => match self.meta.find_file_snapshot_by_id(snapshot_id)? {
                    Some(snapshot) => {
                        let disk_mtime = modified_at(file.path(), file.metadata())?;
                        file.metadata().len() != snapshot.data.size
                            || disk_mtime != snapshot.data.modified_at
                    }
                    None => true,
                },
                None => false,
            };

            statuses.insert(
                relative.clone(),
                FileStatus {
                    relative_path: relative.clone(),
                    is_backed_up: current.is_some(),
                    is_staged: self.staging.is_staged(tracked.id, &relative)?,
                    is_modified_since,
                },
            );
        }

        // Database-known files missing from disk under the queried subtree.
        let query_rel = resolved
            .path()
            .strip_prefix(tracked_root)
            .map(Path::to_path_buf)
            .unwrap_or_default();
        for file in &known {
            if file.deleted || statuses.contains_key(&file.name) {
                continue;
            }
            let name_path = Path::new(&file.name);
            let in_subtree = match name_path.strip_prefix(&query_rel) {
                Ok(rest) => recursive || rest.components().count() == 1,
                Err(_) => false,
            };
            if !in_subtree {
                continue;
            }
            if tracked_root.join(name_path).exists() {
                // Present on disk but filtered from the walk (e.g. now
                // ignored); not a phantom.
                continue;
            }
            debug!(file = %file.name, "known file missing from disk");
            statuses.insert(
                file.name.clone(),
                FileStatus {
                    relative_path: file.name.clone(),
                    is_backed_up: true,
                    is_staged: self.staging.is_staged(tracked.id, &file.name)?,
                    is_modified_since: true,
                },
            );
        }

        Ok(statuses.into_values().collect())
    }
}
