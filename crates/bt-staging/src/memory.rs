//! In-memory staging store.

use std::collections::{HashMap, VecDeque};
use std::io::{Cursor, Read};

use sha2::{Digest, Sha256};
use tracing::debug;
use uuid::Uuid;

use crate::error::{StagingError, StagingResult};
use crate::operation::StagedOperation;
use crate::store::{StagingStore, StoredContent};

struct ContentEntry {
    bytes: Vec<u8>,
    refcount: usize,
}

/// [`StagingStore`] held entirely in memory. For tests and small workloads;
/// readers returned by `open_content` carry a copy of the bytes.
#[derive(Default)]
pub struct MemoryStagingStore {
    queue: VecDeque<StagedOperation>,
    contents: HashMap<String, ContentEntry>,
}

impl MemoryStagingStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct content blobs held (test visibility).
    pub fn content_count(&self) -> usize {
        self.contents.len()
    }

    /// The refcount for a checksum, or 0 when absent (test visibility).
    pub fn refcount(&self, checksum: &str) -> usize {
        self.contents.get(checksum).map(|e| e.refcount).unwrap_or(0)
    }
}

impl StagingStore for MemoryStagingStore {
    fn store_content(&mut self, reader: &mut dyn Read) -> StagingResult<StoredContent> {
        let mut hasher = Sha256::new();
        let mut bytes = Vec::new();
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            bytes.extend_from_slice(&buf[..n]);
        }
        let checksum = hex::encode(hasher.finalize());
        let size = bytes.len() as u64;

        let created = if self.contents.contains_key(&checksum) {
            false
        } else {
            self.contents.insert(
                checksum.clone(),
                ContentEntry { bytes, refcount: 0 },
            );
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
        if self.contents.get(checksum).is_some_and(|e| e.refcount == 0) {
            self.contents.remove(checksum);
            debug!(checksum, "discarded unreferenced staging content");
        }
        Ok(())
    }

    fn open_content(&self, checksum: &str) -> StagingResult<Box<dyn Read + Send>> {
        let entry = self
            .contents
            .get(checksum)
            .ok_or_else(|| StagingError::ContentMissing {
                checksum: checksum.to_string(),
            })?;
        Ok(Box::new(Cursor::new(entry.bytes.clone())))
    }

    fn append(&mut self, operation: StagedOperation) -> StagingResult<()> {
        let checksum = operation.snapshot.content_id.clone();
        let entry = self
            .contents
            .get_mut(&checksum)
            .ok_or(StagingError::ContentMissing { checksum })?;
        entry.refcount += 1;
        self.queue.push_back(operation);
        Ok(())
    }

    fn peek(&self) -> StagingResult<Option<StagedOperation>> {
        Ok(self.queue.front().cloned())
    }

    fn pop(&mut self) -> StagingResult<()> {
        let Some(operation) = self.queue.pop_front() else {
            return Ok(());
        };
        let checksum = &operation.snapshot.content_id;
        if let Some(entry) = self.contents.get_mut(checksum) {
            entry.refcount = entry.refcount.saturating_sub(1);
            if entry.refcount == 0 {
                self.contents.remove(checksum);
                debug!(checksum = %checksum, "released staging content");
            }
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
        Ok(self.contents.values().map(|e| e.bytes.len() as u64).sum())
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
            directory_id: Uuid::from_u64_pair(0, 1),
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
                born_at: None,
            },
        }
    }

    #[test]
    fn test_store_content_hashes_and_dedups() {
        let mut store = MemoryStagingStore::new();

        let first = store.store_content(&mut &b"data"[..]).unwrap();
        assert!(first.created);
        assert_eq!(first.size, 4);
        // SHA-256("data")
        assert_eq!(
            first.checksum,
            "3a6eb0790f39ac87c94f3856b2dd2c5d110e6811602261a9a923d3bb23adc8b7"
        );

        let second = store.store_content(&mut &b"data"[..]).unwrap();
        assert!(!second.created);
        assert_eq!(second.checksum, first.checksum);
        assert_eq!(store.content_count(), 1);
        assert_eq!(store.content_bytes().unwrap(), 4);
    }

    #[test]
    fn test_empty_content_hashes_to_empty_string_digest() {
        let mut store = MemoryStagingStore::new();
        let stored = store.store_content(&mut &b""[..]).unwrap();
        assert_eq!(stored.size, 0);
        assert_eq!(
            stored.checksum,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_refcount_lifecycle() {
        let mut store = MemoryStagingStore::new();
        let stored = store.store_content(&mut &b"data"[..]).unwrap();
        assert_eq!(store.refcount(&stored.checksum), 0);

        store.append(op(&stored.checksum, "a")).unwrap();
        store.append(op(&stored.checksum, "b")).unwrap();
        assert_eq!(store.refcount(&stored.checksum), 2);

        store.pop().unwrap();
        assert_eq!(store.refcount(&stored.checksum), 1);
        assert_eq!(store.content_count(), 1);

        store.pop().unwrap();
        assert_eq!(store.content_count(), 0);
        assert_eq!(store.content_bytes().unwrap(), 0);
    }

    #[test]
    fn test_remove_unreferenced_spares_referenced_content() {
        let mut store = MemoryStagingStore::new();
        let stored = store.store_content(&mut &b"data"[..]).unwrap();
        store.append(op(&stored.checksum, "a")).unwrap();

        store.remove_content_if_unreferenced(&stored.checksum).unwrap();
        assert_eq!(store.content_count(), 1);

        store.pop().unwrap();
        store.remove_content_if_unreferenced(&stored.checksum).unwrap();
        assert_eq!(store.content_count(), 0);
    }

    #[test]
    fn test_open_content_round_trip() {
        let mut store = MemoryStagingStore::new();
        let stored = store.store_content(&mut &b"hello"[..]).unwrap();

        let mut reader = store.open_content(&stored.checksum).unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"hello");

        assert!(matches!(
            store.open_content("missing"),
            Err(StagingError::ContentMissing { .. })
        ));
    }

    #[test]
    fn test_queue_order_and_contains() {
        let mut store = MemoryStagingStore::new();
        let c1 = store.store_content(&mut &b"one"[..]).unwrap();
        let c2 = store.store_content(&mut &b"two"[..]).unwrap();
        store.append(op(&c1.checksum, "first")).unwrap();
        store.append(op(&c2.checksum, "second")).unwrap();

        assert_eq!(store.len().unwrap(), 2);
        assert_eq!(store.peek().unwrap().unwrap().relative_path, "first");
        assert!(store.contains(Uuid::from_u64_pair(0, 1), "second").unwrap());
        assert!(!store.contains(Uuid::from_u64_pair(0, 1), "third").unwrap());

        store.pop().unwrap();
        assert_eq!(store.peek().unwrap().unwrap().relative_path, "second");
    }

    #[test]
    fn test_pop_empty_queue_is_noop() {
        let mut store = MemoryStagingStore::new();
        store.pop().unwrap();
        assert_eq!(store.len().unwrap(), 0);
    }
}
