//! The backup service: composition root and the tracking/staging
//! operations.

use std::path::Path;
use std::sync::Arc;

use bt_crypto::Encryptor;
use bt_fs::Filesystem;
use bt_meta::{Clock, Directory, IdGenerator, MetadataStore};
use bt_staging::StagingArea;
use bt_vault::Vault;
use tracing::{debug, info};

use crate::envelope::OperationRecorder;
use crate::error::{EngineError, EngineResult};

/// Orchestrator over the pluggable subsystems.
///
/// The service is written against the abstract capability traits only; the
/// factories in [`crate::factory`] build concrete stacks from
/// configuration, and tests compose in-memory stacks directly.
pub struct BackupService {
    pub(crate) fs: Arc<dyn Filesystem>,
    pub(crate) meta: Arc<dyn MetadataStore>,
    pub(crate) staging: Arc<StagingArea>,
    pub(crate) vault: Arc<dyn Vault>,
    pub(crate) encryptor: Arc<dyn Encryptor>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) ids: Arc<dyn IdGenerator>,
    pub(crate) recorder: Arc<OperationRecorder>,
}

impl BackupService {
    /// Composes a service from its parts.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        fs: Arc<dyn Filesystem>,
        meta: Arc<dyn MetadataStore>,
        staging: Arc<StagingArea>,
        vault: Arc<dyn Vault>,
        encryptor: Arc<dyn Encryptor>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        recorder: Arc<OperationRecorder>,
    ) -> Self {
        Self {
            fs,
            meta,
            staging,
            vault,
            encryptor,
            clock,
            ids,
            recorder,
        }
    }

    /// Starts tracking a directory.
    ///
    /// Idempotent: tracking an already-tracked path returns the existing
    /// row. When the new path is an ancestor of tracked directories, the
    /// store consolidates them into the new one in a single transaction.
    pub fn add_directory(&self, path: &Path, encrypted: bool) -> EngineResult<Directory> {
        let resolved = self.fs.resolve(path)?;
        if !resolved.is_dir() {
            return Err(bt_fs::FsError::NotADirectory {
                path: resolved.path().to_path_buf(),
            }
            .into());
        }

        let path_text = resolved.path().to_string_lossy().into_owned();
        if let Some(existing) = self.meta.find_directory_by_path(&path_text)? {
            debug!(path = %path_text, "directory already tracked");
            return Ok(existing);
        }

        self.recorder.ensure_persisted(self.meta.as_ref())?;
        let directory = self.meta.create_directory(&path_text, encrypted)?;
        info!(path = %path_text, encrypted, "tracking directory");
        Ok(directory)
    }

    /// Stages a file or the files of a directory; returns the count staged.
    ///
    /// A directly-named file fails when ignored or untracked; a directory
    /// walk silently filters ignored files and requires the directory (or an
    /// ancestor) to be tracked.
    pub fn stage_files(&self, path: &Path, recursive: bool) -> EngineResult<usize> {
        let resolved = self.fs.resolve(path)?;

        if !resolved.is_dir() {
            let tracked = self.tracked_directory_for(resolved.path())?;
            if self
                .fs
                .is_ignored(resolved.path(), Path::new(&tracked.path))?
            {
                return Err(EngineError::Ignored {
                    path: resolved.path().to_path_buf(),
                });
            }
            let relative = self.relative_within(&tracked, resolved.path())?;
            self.staging.stage(&tracked, &relative, &resolved)?;
            return Ok(1);
        }

        let tracked = self.tracked_directory_for(resolved.path())?;
        let tracked_root = Path::new(&tracked.path).to_path_buf();
        let mut staged = 0;
        for file in self.fs.find_files(&resolved, recursive)? {
            // The walk filters against its own root; re-check against the
            // tracked root so patterns anchored there apply when staging a
            // subdirectory.
            if self.fs.is_ignored(file.path(), &tracked_root)? {
                continue;
            }
            let relative = self.relative_within(&tracked, file.path())?;
            self.staging.stage(&tracked, &relative, &file)?;
            staged += 1;
        }
        info!(path = %resolved, staged, recursive, "staged files");
        Ok(staged)
    }

    pub(crate) fn tracked_directory_for(&self, path: &Path) -> EngineResult<Directory> {
        let path_text = path.to_string_lossy();
        self.meta
            .search_directory_for_path(&path_text)?
            .ok_or_else(|| EngineError::NotTracked {
                path: path.to_path_buf(),
            })
    }

    pub(crate) fn relative_within(
        &self,
        directory: &Directory,
        path: &Path,
    ) -> EngineResult<String> {
        path.strip_prefix(&directory.path)
            .map(|rel| rel.to_string_lossy().into_owned())
            .map_err(|_| EngineError::NotTracked {
                path: path.to_path_buf(),
            })
    }
}
