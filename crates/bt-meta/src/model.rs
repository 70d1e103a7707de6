//! Model types for the metadata store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Content-addressed data known to the vault.
///
/// The id is the lowercase-hex SHA-256 of the bytes the record stands for.
/// A *real* record (no `encrypted_content_id`) has its bytes in the vault
/// under its own id. A *virtual* record carries the plaintext checksum as
/// its id while the ciphertext lives under the referenced real record, which
/// keeps plaintext-level deduplication without plaintext in the vault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Content {
    /// Lowercase-hex SHA-256 the record is addressed by.
    pub id: String,
    /// When the record was committed.
    pub created_at: DateTime<Utc>,
    /// For virtual records, the id of the real record holding ciphertext.
    pub encrypted_content_id: Option<String>,
}

impl Content {
    /// Whether this record is a virtual (encrypted) indirection.
    pub fn is_virtual(&self) -> bool {
        self.encrypted_content_id.is_some()
    }
}

/// A tracked directory on the local host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directory {
    /// Row id.
    pub id: Uuid,
    /// Absolute path on the host; unique across tracked directories.
    pub path: String,
    /// Whether content under this directory is encrypted before upload.
    /// Immutable after creation.
    pub encrypted: bool,
    /// When tracking began.
    pub created_at: DateTime<Utc>,
}

/// A file within a tracked directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct File {
    /// Row id.
    pub id: Uuid,
    /// Owning directory.
    pub directory_id: Uuid,
    /// Path relative to the directory root; unique per directory.
    pub name: String,
    /// The snapshot non-versioned queries resolve to, once one exists.
    pub current_snapshot_id: Option<Uuid>,
    /// Logical deletion marker; history is never destroyed.
    pub deleted: bool,
}

/// The observable state of a file captured at stage time.
///
/// `accessed_at` is recorded but excluded from change comparison: reads
/// disturb it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotData {
    /// Plaintext content checksum.
    pub content_id: String,
    /// File size in bytes.
    pub size: u64,
    /// POSIX mode bits.
    pub permissions: u32,
    /// Owning user id.
    pub uid: u32,
    /// Owning group id.
    pub gid: u32,
    /// Access time.
    pub accessed_at: DateTime<Utc>,
    /// Modification time.
    pub modified_at: DateTime<Utc>,
    /// Inode change time.
    pub changed_at: DateTime<Utc>,
    /// Birth time, where the filesystem records one.
    pub born_at: Option<DateTime<Utc>>,
}

impl SnapshotData {
    /// Whether two captures describe the same observable file state.
    ///
    /// Compares content, size, permissions, ownership, mtime, ctime, and
    /// birth time; access time is excluded.
    pub fn same_observable_state(&self, other: &SnapshotData) -> bool {
        self.content_id == other.content_id
            && self.size == other.size
            && self.permissions == other.permissions
            && self.uid == other.uid
            && self.gid == other.gid
            && self.modified_at == other.modified_at
            && self.changed_at == other.changed_at
            && self.born_at == other.born_at
    }
}

/// A recorded point-in-time state of a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSnapshot {
    /// Row id.
    pub id: Uuid,
    /// Owning file.
    pub file_id: Uuid,
    /// When the snapshot was committed.
    pub created_at: DateTime<Utc>,
    /// The captured file state.
    pub data: SnapshotData,
}

/// Input to the atomic backup commit.
#[derive(Debug, Clone)]
pub struct NewSnapshot {
    /// Caller-supplied snapshot id.
    pub snapshot_id: Uuid,
    /// Caller-supplied commit instant.
    pub created_at: DateTime<Utc>,
    /// The staged capture; `data.content_id` is always the plaintext
    /// checksum.
    pub data: SnapshotData,
    /// For encrypted directories: the ciphertext checksum the virtual
    /// content record points at.
    pub encrypted_content_id: Option<String>,
}

/// Result of the atomic backup commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The file's current snapshot already matches; nothing was written.
    Unchanged,
    /// A new snapshot row was recorded and the current pointer moved.
    Recorded,
}

/// Lifecycle state of a backup operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationStatus {
    /// Started and not yet finalised.
    Running,
    /// Finalised successfully.
    Success,
    /// Finalised with an error.
    Error,
}

impl OperationStatus {
    /// Stable text form stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Running => "running",
            OperationStatus::Success => "success",
            OperationStatus::Error => "error",
        }
    }

    /// Parses the stable text form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(OperationStatus::Running),
            "success" => Some(OperationStatus::Success),
            "error" => Some(OperationStatus::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One mutating invocation of the engine.
///
/// The monotonic row id doubles as the host's metadata version: the largest
/// id in the local store is uploaded alongside the database snapshot, which
/// lets the operation envelope detect a stale local database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupOperation {
    /// Monotonic row id; the metadata version.
    pub id: i64,
    /// When the invocation started.
    pub started_at: DateTime<Utc>,
    /// When the invocation finished, once finalised.
    pub finished_at: Option<DateTime<Utc>>,
    /// Command tag, e.g. `"backup"`.
    pub operation: String,
    /// Rendered command parameters.
    pub parameters: String,
    /// Lifecycle state.
    pub status: OperationStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data() -> SnapshotData {
        SnapshotData {
            content_id: "abc".into(),
            size: 5,
            permissions: 0o644,
            uid: 1000,
            gid: 1000,
            accessed_at: DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
            modified_at: DateTime::parse_from_rfc3339("2024-01-02T00:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
            changed_at: DateTime::parse_from_rfc3339("2024-01-03T00:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
            born_at: None,
        }
    }

    #[test]
    fn test_same_observable_state_ignores_atime() {
        let a = data();
        let mut b = data();
        b.accessed_at = b.accessed_at + chrono::Duration::hours(1);
        assert!(a.same_observable_state(&b));
    }

    #[test]
    fn test_same_observable_state_detects_changes() {
        let a = data();

        let mut b = data();
        b.size = 6;
        assert!(!a.same_observable_state(&b));

        let mut b = data();
        b.content_id = "def".into();
        assert!(!a.same_observable_state(&b));

        let mut b = data();
        b.modified_at = b.modified_at + chrono::Duration::seconds(1);
        assert!(!a.same_observable_state(&b));

        let mut b = data();
        b.permissions = 0o600;
        assert!(!a.same_observable_state(&b));
    }

    #[test]
    fn test_content_virtual_flag() {
        let real = Content {
            id: "a".into(),
            created_at: Utc::now(),
            encrypted_content_id: None,
        };
        let virt = Content {
            id: "a".into(),
            created_at: Utc::now(),
            encrypted_content_id: Some("b".into()),
        };
        assert!(!real.is_virtual());
        assert!(virt.is_virtual());
    }

    #[test]
    fn test_operation_status_round_trip() {
        for status in [
            OperationStatus::Running,
            OperationStatus::Success,
            OperationStatus::Error,
        ] {
            assert_eq!(OperationStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(OperationStatus::parse("bogus"), None);
    }
}
