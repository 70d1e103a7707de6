//! The staging protocol.
//!
//! [`StagingArea`] owns the single mutex guarding the staging store and
//! implements the ordering that defends against files changing mid-read:
//! stat, read-and-hash, re-stat, compare, then enqueue. The drain side
//! releases the mutex around the commit callback and only removes the queue
//! head after the callback succeeds, giving at-most-once commit with
//! at-least-once retry.

use std::io::Read;
use std::sync::{Arc, Mutex};

use bt_fs::{Filesystem, ResolvedPath};
use bt_meta::{Directory, SnapshotData};
use std::os::unix::fs::MetadataExt;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{StagingError, StagingResult};
use crate::operation::StagedOperation;
use crate::store::StagingStore;

/// Mode bits recorded as snapshot permissions.
const PERMISSION_MASK: u32 = 0o777;

/// Outcome of one drain step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Processed {
    /// The queue was empty; the callback did not run.
    Empty,
    /// The head operation was committed and removed.
    Committed,
}

/// Error from one drain step: either the staging layer itself failed, or
/// the commit callback did. The callback's error passes through verbatim
/// and the queue head stays in place for retry.
#[derive(Debug)]
pub enum DrainError<E> {
    /// The staging layer failed before or after the callback.
    Staging(StagingError),
    /// The commit callback failed.
    Callback(E),
}

impl<E> From<StagingError> for DrainError<E> {
    fn from(err: StagingError) -> Self {
        DrainError::Staging(err)
    }
}

impl<E: std::fmt::Display> std::fmt::Display for DrainError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DrainError::Staging(err) => write!(f, "{err}"),
            DrainError::Callback(err) => write!(f, "{err}"),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for DrainError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DrainError::Staging(err) => Some(err),
            DrainError::Callback(err) => Some(err),
        }
    }
}

/// The write-ahead staging area: shared protocol over a pluggable store.
pub struct StagingArea {
    fs: Arc<dyn Filesystem>,
    store: Mutex<Box<dyn StagingStore>>,
    max_bytes: u64,
}

impl StagingArea {
    /// Creates an area over `store` with a content byte budget.
    pub fn new(fs: Arc<dyn Filesystem>, store: Box<dyn StagingStore>, max_bytes: u64) -> Self {
        Self {
            fs,
            store: Mutex::new(store),
            max_bytes,
        }
    }

    /// Stages one file: hash and copy its bytes into the content store and
    /// append a queue entry carrying the pre-read snapshot.
    ///
    /// Fails with [`StagingError::FileChanged`] when the file's stat
    /// differs before and after the read (access time excluded), and with
    /// [`StagingError::StagingFull`] when the content store would exceed
    /// its budget; both failures leave the store as it was.
    pub fn stage(
        &self,
        directory: &Directory,
        relative_path: &str,
        path: &ResolvedPath,
    ) -> StagingResult<()> {
        let mut store = self.store.lock().unwrap();

        // 1. The stat captured at resolve time is the pre-read observation
        // the snapshot is built from.
        let info1 = path.metadata().clone();
        let stat1 = self.fs.extract_stat(path.path(), &info1)?;
        let modified1 = bt_fs::stat::modified_at(path.path(), &info1)?;

        // 2. Stream the bytes in, hashing as they flow.
        let mut reader = self.fs.open(path)?;
        let stored = store.store_content(&mut *reader)?;
        drop(reader);

        let discard = |store: &mut Box<dyn StagingStore>| {
            if let Err(err) = store.remove_content_if_unreferenced(&stored.checksum) {
                warn!(checksum = %stored.checksum, error = %err, "failed to discard staged content");
            }
        };

        // 3. Re-stat and compare; any change during the read invalidates
        // the bytes just captured.
        let info2 = match self.fs.stat(path) {
            Ok(info2) => info2,
            Err(err) => {
                discard(&mut *store);
                return Err(err.into());
            }
        };
        let stat2 = match self.fs.extract_stat(path.path(), &info2) {
            Ok(stat2) => stat2,
            Err(err) => {
                discard(&mut *store);
                return Err(err.into());
            }
        };
        let modified2 = match bt_fs::stat::modified_at(path.path(), &info2) {
            Ok(modified2) => modified2,
            Err(err) => {
                discard(&mut *store);
                return Err(err.into());
            }
        };

        let unchanged = info1.len() == info2.len()
            && info1.mode() == info2.mode()
            && modified1 == modified2
            && stat1.changed_at == stat2.changed_at
            && stat1.uid == stat2.uid
            && stat1.gid == stat2.gid;
        if !unchanged {
            discard(&mut *store);
            return Err(StagingError::FileChanged {
                path: path.path().to_path_buf(),
            });
        }

        // 4. Budget check. Equal-to-budget passes; one byte over fails.
        let total = store.content_bytes()?;
        if total > self.max_bytes {
            discard(&mut *store);
            return Err(StagingError::StagingFull {
                total,
                budget: self.max_bytes,
            });
        }

        // 5. Enqueue; this takes the reference on the content.
        let operation = StagedOperation {
            directory_id: directory.id,
            relative_path: relative_path.to_string(),
            snapshot: SnapshotData {
                content_id: stored.checksum.clone(),
                size: stored.size,
                permissions: info1.mode() & PERMISSION_MASK,
                uid: stat1.uid,
                gid: stat1.gid,
                accessed_at: stat1.accessed_at,
                modified_at: modified1,
                changed_at: stat1.changed_at,
                born_at: stat1.born_at,
            },
        };
        if let Err(err) = store.append(operation) {
            discard(&mut *store);
            return Err(err);
        }

        debug!(
            directory = %directory.path,
            file = relative_path,
            checksum = %stored.checksum,
            size = stored.size,
            "staged file"
        );
        Ok(())
    }

    /// Drains one queue entry through `callback`.
    ///
    /// The callback receives a reader over the staged bytes together with
    /// the snapshot, directory id, and relative path, and runs outside the
    /// staging mutex. On success the head is removed and its content
    /// reference released; on failure the head stays for retry and the
    /// callback's error is returned verbatim.
    pub fn process_next<E>(
        &self,
        callback: impl FnOnce(&mut dyn Read, &SnapshotData, Uuid, &str) -> Result<(), E>,
    ) -> Result<Processed, DrainError<E>> {
        let mut reader;
        let operation;
        {
            let store = self.store.lock().unwrap();
            match store.peek().map_err(DrainError::Staging)? {
                Some(op) => {
                    reader = store
                        .open_content(&op.snapshot.content_id)
                        .map_err(DrainError::Staging)?;
                    operation = op;
                }
                None => return Ok(Processed::Empty),
            }
        }

        callback(
            &mut *reader,
            &operation.snapshot,
            operation.directory_id,
            &operation.relative_path,
        )
        .map_err(DrainError::Callback)?;
        drop(reader);

        let mut store = self.store.lock().unwrap();
        store.pop().map_err(DrainError::Staging)?;
        debug!(
            file = %operation.relative_path,
            checksum = %operation.snapshot.content_id,
            "committed staged operation"
        );
        Ok(Processed::Committed)
    }

    /// Number of queued operations.
    pub fn count(&self) -> StagingResult<usize> {
        self.store.lock().unwrap().len()
    }

    /// Total bytes held in the content store.
    pub fn content_bytes(&self) -> StagingResult<u64> {
        self.store.lock().unwrap().content_bytes()
    }

    /// Whether an operation for the file is queued.
    pub fn is_staged(&self, directory_id: Uuid, relative_path: &str) -> StagingResult<bool> {
        self.store.lock().unwrap().contains(directory_id, relative_path)
    }
}
