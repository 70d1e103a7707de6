//! The staging-store trait: storage mechanics behind the area's mutex.

use std::io::Read;

use uuid::Uuid;

use crate::error::StagingResult;
use crate::operation::StagedOperation;

/// Result of streaming bytes into the content store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredContent {
    /// Lowercase-hex SHA-256 of the bytes.
    pub checksum: String,
    /// Number of bytes read.
    pub size: u64,
    /// Whether this call created the stored copy (false when deduplicated
    /// against an existing checksum).
    pub created: bool,
}

/// Storage mechanics for the staging area: a content-addressed byte store
/// with one reference count per checksum, plus the ordered operation queue.
///
/// Implementations are not synchronised; [`crate::StagingArea`] serialises
/// all access behind its mutex.
pub trait StagingStore: Send {
    /// Streams `reader` to completion into the byte store, computing the
    /// SHA-256 as bytes flow through. When the checksum already exists the
    /// existing copy is kept and the new bytes are discarded. The reference
    /// count is untouched; only [`StagingStore::append`] takes references.
    fn store_content(&mut self, reader: &mut dyn Read) -> StagingResult<StoredContent>;

    /// Deletes the stored bytes when no queue entry references them.
    /// Used to undo a content addition after a failed stage.
    fn remove_content_if_unreferenced(&mut self, checksum: &str) -> StagingResult<()>;

    /// Opens a reader over stored content bytes.
    fn open_content(&self, checksum: &str) -> StagingResult<Box<dyn Read + Send>>;

    /// Appends an operation to the queue and increments its checksum's
    /// reference count.
    fn append(&mut self, operation: StagedOperation) -> StagingResult<()>;

    /// The queue head, if any.
    fn peek(&self) -> StagingResult<Option<StagedOperation>>;

    /// Removes the queue head and decrements its checksum's reference
    /// count, deleting the bytes when the count reaches zero.
    fn pop(&mut self) -> StagingResult<()>;

    /// Number of queued operations.
    fn len(&self) -> StagingResult<usize>;

    /// Whether the queue is empty.
    fn is_empty(&self) -> StagingResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Whether an operation for the file is queued.
    fn contains(&self, directory_id: Uuid, relative_path: &str) -> StagingResult<bool>;

    /// Total bytes held in the content store (each checksum counted once).
    fn content_bytes(&self) -> StagingResult<u64>;
}
