//! The metadata-store capability trait.

use std::path::Path;

use uuid::Uuid;

use crate::error::MetaResult;
use crate::model::{
    BackupOperation, CommitOutcome, Content, Directory, File, FileSnapshot, NewSnapshot,
    OperationStatus,
};

/// Relational persistent store of directories, files, snapshots, content
/// records, and operation history.
///
/// The atomic commit [`MetadataStore::create_file_snapshot_and_content`] is
/// the only writer of Content, FileSnapshot, and the current-snapshot
/// pointer; everything else is read-mostly with respect to those rows.
pub trait MetadataStore: Send + Sync {
    /// Exact-match directory lookup.
    fn find_directory_by_path(&self, path: &str) -> MetaResult<Option<Directory>>;

    /// Directory lookup by row id.
    fn find_directory_by_id(&self, id: Uuid) -> MetaResult<Option<Directory>>;

    /// The tracked directory containing `path`, if any.
    ///
    /// Because no two tracked directories sit on the same prefix chain, at
    /// most one can be an ancestor of any path.
    fn search_directory_for_path(&self, path: &str) -> MetaResult<Option<Directory>>;

    /// Creates a tracked directory, consolidating any tracked descendants.
    ///
    /// In one transaction: insert the row; for every existing directory
    /// whose path lies strictly under the new one, re-home its files with
    /// the child's relative subpath prepended to their names and delete the
    /// child row.
    fn create_directory(&self, path: &str, encrypted: bool) -> MetaResult<Directory>;

    /// Directories strictly under `prefix`.
    fn find_directories_by_path_prefix(&self, prefix: &str) -> MetaResult<Vec<Directory>>;

    /// Removes a directory, cascading through its files and snapshots.
    /// Content records survive: they may be shared.
    fn delete_directory(&self, directory: &Directory) -> MetaResult<()>;

    /// All files of a directory, ordered by name.
    fn find_files_by_directory(&self, directory: &Directory) -> MetaResult<Vec<File>>;

    /// A file by its relative path within a directory.
    fn find_file_by_path(&self, directory: &Directory, relative_path: &str)
        -> MetaResult<Option<File>>;

    /// Finds a file, creating an empty record when absent.
    fn find_or_create_file(&self, directory: &Directory, relative_path: &str) -> MetaResult<File>;

    /// All snapshots of a file, ordered by creation time ascending.
    fn find_file_snapshots_for_file(&self, file: &File) -> MetaResult<Vec<FileSnapshot>>;

    /// A file's snapshot with the given content checksum, if any.
    fn find_file_snapshot_by_checksum(
        &self,
        file: &File,
        checksum: &str,
    ) -> MetaResult<Option<FileSnapshot>>;

    /// A snapshot by row id.
    fn find_file_snapshot_by_id(&self, id: Uuid) -> MetaResult<Option<FileSnapshot>>;

    /// A content record by checksum.
    fn find_content_by_checksum(&self, checksum: &str) -> MetaResult<Option<Content>>;

    /// The atomic backup commit. In one transaction: find or create the
    /// file; insert missing content records (the real ciphertext record
    /// first when the commit is encrypted, then the virtual indirection);
    /// return [`CommitOutcome::Unchanged`] when the file's current snapshot
    /// already matches the incoming capture; otherwise insert the snapshot
    /// and move the current pointer.
    fn create_file_snapshot_and_content(
        &self,
        directory_id: Uuid,
        relative_path: &str,
        new: &NewSnapshot,
    ) -> MetaResult<CommitOutcome>;

    /// Records the start of a mutating invocation; the returned row carries
    /// the monotonic operation id.
    fn create_backup_operation(
        &self,
        operation: &str,
        parameters: &str,
    ) -> MetaResult<BackupOperation>;

    /// Finalises an operation row.
    fn finish_backup_operation(&self, id: i64, status: OperationStatus) -> MetaResult<()>;

    /// The most recent operations, newest first.
    fn list_backup_operations(&self, limit: u32) -> MetaResult<Vec<BackupOperation>>;

    /// The largest operation id, or 0 for a fresh store. This is the host's
    /// metadata version.
    fn max_backup_operation_id(&self) -> MetaResult<i64>;

    /// Copies the entire store to `dest`, suitable for vault upload.
    fn backup_to(&self, dest: &Path) -> MetaResult<()>;

    /// Verifies the schema version is supported.
    fn check_migrations(&self) -> MetaResult<()>;

    /// Releases the underlying connection. Further calls fail.
    fn close(&self) -> MetaResult<()>;
}
