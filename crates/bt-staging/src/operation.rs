//! Staged-operation records.

use bt_meta::SnapshotData;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One file awaiting commit.
///
/// The operation carries a directory id and relative path rather than a
/// database file id: staging never writes to the metadata store, so the file
/// row may not exist yet. `snapshot.content_id` names the checksum of the
/// bytes held in the staging byte store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedOperation {
    /// The tracked directory the file belongs to.
    pub directory_id: Uuid,
    /// The file's path relative to the directory root.
    pub relative_path: String,
    /// The file state captured before the bytes were read.
    pub snapshot: SnapshotData,
}
