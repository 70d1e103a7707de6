//! Durable on-disk staging store.
//!
//! Layout under the staging root:
//!
//! ```text
//! <root>/
//!   content/<checksum>    one file per staged blob
//!   queue.json            the ordered operation queue
//! ```
//!
//! The queue document is rewritten (temp file + rename) on every mutation;
//! reference counts are derived state and are rebuilt from the queue when
//! the store is reopened. Durability across a crash is best-effort on the
//! underlying filesystem.

use std::collections::{HashMap, VecDeque};
use std::io::Read;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{StagingError, StagingResult};
use crate::operation::StagedOperation;
use crate::store::{StagingStore, StoredContent};

const QUEUE_FILE: &str = "queue.json";
const CONTENT_DIR: &str = "content";

#[derive(Debug, Default, Serialize, Deserialize)]
struct QueueDocument {
    operations: Vec<StagedOperation>,
}

/// [`StagingStore`] persisted under a local directory.
pub struct FilesystemStagingStore {
    root: PathBuf,
    content_dir: PathBuf,
    queue_path: PathBuf,
    queue: VecDeque<StagedOperation>,
    refcounts: HashMap<String, usize>,
}

impl FilesystemStagingStore {
    /// Opens (creating as needed) a store rooted at `root`, reloading any
    /// queue left by a previous process.
    pub fn open(root: &Path) -> StagingResult<Self> {
        let content_dir = root.join(CONTENT_DIR);
        std::fs::create_dir_all(&content_dir)?;
        let queue_path = root.join(QUEUE_FILE);

        let queue: VecDeque<StagedOperation> = match std::fs::read(&queue_path) {
            Ok(bytes) => {
                let document: QueueDocument =
                    serde_json::from_slice(&bytes).map_err(|err| StagingError::CorruptQueue {
                        path: queue_path.clone(),
                        reason: err.to_string(),
                    })?;
                document.operations.into()
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => VecDeque::new(),
            Err(err) => return Err(err.into()),
        };

        // Refcounts are derived from the queue.
        let mut refcounts: HashMap<String, usize> = HashMap::new();
        for operation in &queue {
            *refcounts
                .entry(operation.snapshot.content_id.clone())
                .or_insert(0) += 1;
        }

        if !queue.is_empty() {
            info!(
                root = %root.display(),
                pending = queue.len(),
                "reloaded staging queue"
            );
        }

        Ok(Self {
            root: root.to_path_buf(),
            content_dir,
            queue_path,
            queue,
            refcounts,
        })
    }

    fn content_path(&self, checksum: &str) -> PathBuf {
        self.content_dir.join(checksum)
    }

    fn persist_queue(&self) -> StagingResult<()> {
        let document = QueueDocument {
            operations: self.queue.iter().cloned().collect(),
        };
        let bytes = serde_json::to_vec_pretty(&document).map_err(|err| {
            StagingError::CorruptQueue {
                path: self.queue_path.clone(),
                reason: err.to_string(),
            }
        })?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.root)?;
        std::io::Write::write_all(&mut tmp, &bytes)?;
        tmp.persist(&self.queue_path)
            .map_err(|err| StagingError::Io(err.error))?;
        Ok(())
    }

    fn delete_content(&self, checksum: &str) -> StagingResult<()> {
        match std::fs::remove_file(self.content_path(checksum)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

impl StagingStore for FilesystemStagingStore {
    fn store_content(&mut self, reader: &mut dyn Read) -> StagingResult<StoredContent> {
        let mut tmp = tempfile::NamedTempFile::new_in(&self.content_dir)?;
        let mut hasher = Sha256::new();
        let mut size: u64 = 0;
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            std::io::Write::write_all(&mut tmp, &buf[..n])?;
            size += n as u64;
        }
        let checksum = hex::encode(hasher.finalize());

        let dest = self.content_path(&checksum);
        let created = if dest.exists() {
            // Deduplicated: keep the existing copy, drop the temp file.
            false
        } else {
            tmp.persist(&dest).map_err(|err| StagingError::Io(err.error))?;
            true
        };
        debug!(checksum = %checksum, size, created, "stored staging content");
        Ok(StoredContent {
            checksum,
            size,
            created,
        })
    }

    fn remove_content_if_unreferenced(&mut self, checksum: &str) -> StagingResult<()> {
        if self.refcounts.get(checksum).copied().unwrap_or(0) == 0 {
            self.delete_content(checksum)?;
            debug!(checksum, "discarded unreferenced staging content");
        }
        Ok(())
    }

    fn open_content(&self, checksum: &str) -> StagingResult<Box<dyn Read + Send>> {
        match std::fs::File::open(self.content_path(checksum)) {
            Ok(file) => Ok(Box::new(file)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(StagingError::ContentMissing {
                    checksum: checksum.to_string(),
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    fn append(&mut self, operation: StagedOperation) -> StagingResult<()> {
        let checksum = operation.snapshot.content_id.clone();
        if !self.content_path(&checksum).exists() {
            return Err(StagingError::ContentMissing { checksum });
        }
        self.queue.push_back(operation);
        if let Err(err) = self.persist_queue() {
            self.queue.pop_back();
            return Err(err);
        }
        *self.refcounts.entry(checksum).or_insert(0) += 1;
        Ok(())
    }

    fn peek(&self) -> StagingResult<Option<StagedOperation>> {
        Ok(self.queue.front().cloned())
    }

    fn pop(&mut self) -> StagingResult<()> {
        let Some(operation) = self.queue.pop_front() else {
            return Ok(());
        };
        self.persist_queue()?;

        let checksum = operation.snapshot.content_id;
        let count = self.refcounts.entry(checksum.clone()).or_insert(1);
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.refcounts.remove(&checksum);
            self.delete_content(&checksum)?;
            debug!(checksum = %checksum, "released staging content");
        }
        Ok(())
    }

    fn len(&self) -> StagingResult<usize> {
        Ok(self.queue.len())
    }

    fn contains(&self, directory_id: Uuid, relative_path: &str) -> StagingResult<bool> {
        Ok(self
            .queue
            .iter()
            .any(|op| op.directory_id == directory_id && op.relative_path == relative_path))
    }

    fn content_bytes(&self) -> StagingResult<u64> {
        let mut total = 0;
        for entry in std::fs::read_dir(&self.content_dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                total += entry.metadata()?.len();
            }
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bt_meta::SnapshotData;
    use chrono::{DateTime, Utc};

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn op(checksum: &str, relative_path: &str) -> StagedOperation {
        StagedOperation {
            directory_id: Uuid::from_u64_pair(0, 7),
            relative_path: relative_path.to_string(),
            snapshot: SnapshotData {
                content_id: checksum.to_string(),
                size: 4,
                permissions: 0o644,
                uid: 0,
                gid: 0,
                accessed_at: t0(),
                modified_at: t0(),
                changed_at: t0(),
                born_at: Some(t0()),
            },
        }
    }

    #[test]
    fn test_store_and_open_content() {
        let root = tempfile::tempdir().unwrap();
        let mut store = FilesystemStagingStore::open(root.path()).unwrap();

        let stored = store.store_content(&mut &b"data"[..]).unwrap();
        assert!(stored.created);
        assert!(root.path().join("content").join(&stored.checksum).exists());

        let mut reader = store.open_content(&stored.checksum).unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"data");
    }

    #[test]
    fn test_dedup_keeps_single_file() {
        let root = tempfile::tempdir().unwrap();
        let mut store = FilesystemStagingStore::open(root.path()).unwrap();

        let a = store.store_content(&mut &b"same"[..]).unwrap();
        let b = store.store_content(&mut &b"same"[..]).unwrap();
        assert!(a.created);
        assert!(!b.created);
        assert_eq!(store.content_bytes().unwrap(), 4);
    }

    #[test]
    fn test_queue_survives_reopen() {
        let root = tempfile::tempdir().unwrap();
        let checksum = {
            let mut store = FilesystemStagingStore::open(root.path()).unwrap();
            let stored = store.store_content(&mut &b"data"[..]).unwrap();
            store.append(op(&stored.checksum, "f.txt")).unwrap();
            stored.checksum
        };

        let store = FilesystemStagingStore::open(root.path()).unwrap();
        assert_eq!(store.len().unwrap(), 1);
        let head = store.peek().unwrap().unwrap();
        assert_eq!(head.relative_path, "f.txt");
        assert_eq!(head.snapshot.content_id, checksum);
        // Refcounts were rebuilt: popping deletes the bytes.
        let mut store = store;
        store.pop().unwrap();
        assert!(!root.path().join("content").join(&checksum).exists());
    }

    #[test]
    fn test_pop_keeps_shared_content() {
        let root = tempfile::tempdir().unwrap();
        let mut store = FilesystemStagingStore::open(root.path()).unwrap();
        let stored = store.store_content(&mut &b"shared"[..]).unwrap();
        store.append(op(&stored.checksum, "a")).unwrap();
        store.append(op(&stored.checksum, "b")).unwrap();

        store.pop().unwrap();
        assert!(root.path().join("content").join(&stored.checksum).exists());
        store.pop().unwrap();
        assert!(!root.path().join("content").join(&stored.checksum).exists());
        assert_eq!(store.content_bytes().unwrap(), 0);
    }

    #[test]
    fn test_append_requires_stored_content() {
        let root = tempfile::tempdir().unwrap();
        let mut store = FilesystemStagingStore::open(root.path()).unwrap();
        assert!(matches!(
            store.append(op("does-not-exist", "f")),
            Err(StagingError::ContentMissing { .. })
        ));
    }

    #[test]
    fn test_corrupt_queue_is_reported() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("content")).unwrap();
        std::fs::write(root.path().join("queue.json"), b"{ not json").unwrap();

        assert!(matches!(
            FilesystemStagingStore::open(root.path()),
            Err(StagingError::CorruptQueue { .. })
        ));
    }

    #[test]
    fn test_remove_unreferenced() {
        let root = tempfile::tempdir().unwrap();
        let mut store = FilesystemStagingStore::open(root.path()).unwrap();
        let stored = store.store_content(&mut &b"data"[..]).unwrap();

        store.remove_content_if_unreferenced(&stored.checksum).unwrap();
        assert!(!root.path().join("content").join(&stored.checksum).exists());
    }
}
