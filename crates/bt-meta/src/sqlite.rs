//! SQLite-backed metadata store.
//!
//! One implementation serves file-backed databases and `:memory:` ones, so
//! the transactional commit logic is exercised identically in tests and
//! production. The connection sits behind a mutex: the engine is
//! single-writer by design and SQLite provides the transaction semantics.

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::backup::Backup;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{MetaError, MetaResult};
use crate::ids::IdGenerator;
use crate::migrations;
use crate::model::{
    BackupOperation, CommitOutcome, Content, Directory, File, FileSnapshot, NewSnapshot,
    OperationStatus, SnapshotData,
};
use crate::store::MetadataStore;

/// [`MetadataStore`] over a SQLite database.
pub struct SqliteStore {
    conn: Mutex<Option<Connection>>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl SqliteStore {
    /// Opens (creating and migrating as needed) a file-backed store.
    pub fn open(
        path: &Path,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> MetaResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        info!(path = %path.display(), "opened metadata database");
        Self::init(conn, clock, ids)
    }

    /// Opens an in-memory store, used by tests and tiny workloads.
    pub fn open_in_memory(clock: Arc<dyn Clock>, ids: Arc<dyn IdGenerator>) -> MetaResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn, clock, ids)
    }

    fn init(
        mut conn: Connection,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> MetaResult<Self> {
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        migrations::migrate(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(Some(conn)),
            clock,
            ids,
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> MetaResult<T>) -> MetaResult<T> {
        let guard = self.conn.lock().unwrap();
        let conn = guard.as_ref().ok_or(MetaError::Closed)?;
        f(conn)
    }

    fn with_conn_mut<T>(&self, f: impl FnOnce(&mut Connection) -> MetaResult<T>) -> MetaResult<T> {
        let mut guard = self.conn.lock().unwrap();
        let conn = guard.as_mut().ok_or(MetaError::Closed)?;
        f(conn)
    }
}

fn to_nanos(dt: &DateTime<Utc>) -> MetaResult<i64> {
    dt.timestamp_nanos_opt()
        .ok_or(MetaError::TimestampOutOfRange)
}

fn opt_to_nanos(dt: &Option<DateTime<Utc>>) -> MetaResult<Option<i64>> {
    dt.as_ref().map(to_nanos).transpose()
}

fn from_nanos(n: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_nanos(n)
}

fn parse_uuid(table: &'static str, raw: &str) -> MetaResult<Uuid> {
    Uuid::parse_str(raw).map_err(|err| MetaError::CorruptRow {
        table,
        reason: format!("bad uuid {raw:?}: {err}"),
    })
}

fn parse_status(raw: &str) -> MetaResult<OperationStatus> {
    OperationStatus::parse(raw).ok_or(MetaError::CorruptRow {
        table: "backup_operations",
        reason: format!("unknown status {raw:?}"),
    })
}

// Raw row shapes read inside rusqlite closures; converted to model types
// outside so uuid/status parse failures surface as CorruptRow.
type RawDirectory = (String, String, bool, i64);
type RawFile = (String, String, String, Option<String>, bool);
type RawSnapshot = (
    String,
    String,
    String,
    i64,
    i64,
    u32,
    u32,
    u32,
    i64,
    i64,
    i64,
    Option<i64>,
);
type RawOperation = (i64, i64, Option<i64>, String, String, String);

const DIRECTORY_COLS: &str = "id, path, encrypted, created_at";
const FILE_COLS: &str = "id, directory_id, name, current_snapshot_id, deleted";
const SNAPSHOT_COLS: &str = "id, file_id, content_id, created_at, size, permissions, uid, gid, \
                             accessed_at, modified_at, changed_at, born_at";
const OPERATION_COLS: &str = "id, started_at, finished_at, operation, parameters, status";

fn read_directory(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawDirectory> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn directory_from_raw(raw: RawDirectory) -> MetaResult<Directory> {
    Ok(Directory {
        id: parse_uuid("directories", &raw.0)?,
        path: raw.1,
        encrypted: raw.2,
        created_at: from_nanos(raw.3),
    })
}

fn read_file(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawFile> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
    ))
}

fn file_from_raw(raw: RawFile) -> MetaResult<File> {
    Ok(File {
        id: parse_uuid("files", &raw.0)?,
        directory_id: parse_uuid("files", &raw.1)?,
        name: raw.2,
        current_snapshot_id: raw
            .3
            .as_deref()
            .map(|s| parse_uuid("files", s))
            .transpose()?,
        deleted: raw.4,
    })
}

fn read_snapshot(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawSnapshot> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
        row.get(10)?,
        row.get(11)?,
    ))
}

fn snapshot_from_raw(raw: RawSnapshot) -> MetaResult<FileSnapshot> {
    Ok(FileSnapshot {
        id: parse_uuid("file_snapshots", &raw.0)?,
        file_id: parse_uuid("file_snapshots", &raw.1)?,
        created_at: from_nanos(raw.3),
        data: SnapshotData {
            content_id: raw.2,
            size: raw.4 as u64,
            permissions: raw.5,
            uid: raw.6,
            gid: raw.7,
            accessed_at: from_nanos(raw.8),
            modified_at: from_nanos(raw.9),
            changed_at: from_nanos(raw.10),
            born_at: raw.11.map(from_nanos),
        },
    })
}

fn read_operation(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawOperation> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn operation_from_raw(raw: RawOperation) -> MetaResult<BackupOperation> {
    Ok(BackupOperation {
        id: raw.0,
        started_at: from_nanos(raw.1),
        finished_at: raw.2.map(from_nanos),
        operation: raw.3,
        parameters: raw.4,
        status: parse_status(&raw.5)?,
    })
}

fn all_directories(conn: &Connection) -> MetaResult<Vec<Directory>> {
    let mut stmt = conn.prepare(&format!("SELECT {DIRECTORY_COLS} FROM directories"))?;
    let rows = stmt.query_map([], read_directory)?;
    let mut dirs = Vec::new();
    for raw in rows {
        dirs.push(directory_from_raw(raw?)?);
    }
    Ok(dirs)
}

/// True when `candidate` equals `root` or lies under it.
fn path_contains(root: &str, candidate: &str) -> bool {
    candidate == root || candidate.strip_prefix(root).is_some_and(|r| r.starts_with('/'))
}

fn find_file_in(
    conn: &Connection,
    directory_id: &str,
    relative_path: &str,
) -> MetaResult<Option<File>> {
    let raw = conn
        .query_row(
            &format!("SELECT {FILE_COLS} FROM files WHERE directory_id = ?1 AND name = ?2"),
            params![directory_id, relative_path],
            read_file,
        )
        .optional()?;
    raw.map(file_from_raw).transpose()
}

fn find_snapshot_in(conn: &Connection, id: &str) -> MetaResult<Option<FileSnapshot>> {
    let raw = conn
        .query_row(
            &format!("SELECT {SNAPSHOT_COLS} FROM file_snapshots WHERE id = ?1"),
            params![id],
            read_snapshot,
        )
        .optional()?;
    raw.map(snapshot_from_raw).transpose()
}

fn insert_content_if_absent(
    conn: &Connection,
    id: &str,
    created_at: i64,
    encrypted_content_id: Option<&str>,
) -> MetaResult<()> {
    conn.execute(
        "INSERT OR IGNORE INTO contents (id, created_at, encrypted_content_id)
         VALUES (?1, ?2, ?3)",
        params![id, created_at, encrypted_content_id],
    )?;
    Ok(())
}

impl MetadataStore for SqliteStore {
    fn find_directory_by_path(&self, path: &str) -> MetaResult<Option<Directory>> {
        self.with_conn(|conn| {
            let raw = conn
                .query_row(
                    &format!("SELECT {DIRECTORY_COLS} FROM directories WHERE path = ?1"),
                    params![path],
                    read_directory,
                )
                .optional()?;
            raw.map(directory_from_raw).transpose()
        })
    }

    fn find_directory_by_id(&self, id: Uuid) -> MetaResult<Option<Directory>> {
        self.with_conn(|conn| {
            let raw = conn
                .query_row(
                    &format!("SELECT {DIRECTORY_COLS} FROM directories WHERE id = ?1"),
                    params![id.to_string()],
                    read_directory,
                )
                .optional()?;
            raw.map(directory_from_raw).transpose()
        })
    }

    fn search_directory_for_path(&self, path: &str) -> MetaResult<Option<Directory>> {
        self.with_conn(|conn| {
            // Tracked directories never sit on the same prefix chain, so at
            // most one can contain the path; shortest wins regardless.
            Ok(all_directories(conn)?
                .into_iter()
                .filter(|d| path_contains(&d.path, path))
                .min_by_key(|d| d.path.len()))
        })
    }

    fn create_directory(&self, path: &str, encrypted: bool) -> MetaResult<Directory> {
        let id = self.ids.generate();
        let created_at = self.clock.now();
        let created_nanos = to_nanos(&created_at)?;

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO directories (id, path, encrypted, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![id.to_string(), path, encrypted, created_nanos],
            )?;

            // Consolidate tracked descendants: re-home their files under the
            // new parent with the child-relative subpath prepended.
            let children: Vec<Directory> = {
                let mut stmt =
                    tx.prepare(&format!("SELECT {DIRECTORY_COLS} FROM directories"))?;
                let rows = stmt.query_map([], read_directory)?;
                let mut dirs = Vec::new();
                for raw in rows {
                    let dir = directory_from_raw(raw?)?;
                    if dir.id != id && path_contains(path, &dir.path) {
                        dirs.push(dir);
                    }
                }
                dirs
            };

            for child in &children {
                let subpath = child
                    .path
                    .strip_prefix(path)
                    .and_then(|r| r.strip_prefix('/'))
                    .ok_or(MetaError::CorruptRow {
                        table: "directories",
                        reason: format!(
                            "directory {} is not under new parent {path}",
                            child.path
                        ),
                    })?;
                tx.execute(
                    "UPDATE files SET directory_id = ?1, name = ?2 || '/' || name
                     WHERE directory_id = ?3",
                    params![id.to_string(), subpath, child.id.to_string()],
                )?;
                tx.execute(
                    "DELETE FROM directories WHERE id = ?1",
                    params![child.id.to_string()],
                )?;
                debug!(child = %child.path, parent = path, "consolidated tracked directory");
            }

            tx.commit()?;
            info!(path, encrypted, consolidated = children.len(), "created tracked directory");
            Ok(Directory {
                id,
                path: path.to_string(),
                encrypted,
                created_at,
            })
        })
    }

    fn find_directories_by_path_prefix(&self, prefix: &str) -> MetaResult<Vec<Directory>> {
        self.with_conn(|conn| {
            let mut dirs: Vec<Directory> = all_directories(conn)?
                .into_iter()
                .filter(|d| d.path != prefix && path_contains(prefix, &d.path))
                .collect();
            dirs.sort_by(|a, b| a.path.cmp(&b.path));
            Ok(dirs)
        })
    }

    fn delete_directory(&self, directory: &Directory) -> MetaResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM directories WHERE id = ?1",
                params![directory.id.to_string()],
            )?;
            Ok(())
        })
    }

    fn find_files_by_directory(&self, directory: &Directory) -> MetaResult<Vec<File>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {FILE_COLS} FROM files WHERE directory_id = ?1 ORDER BY name"
            ))?;
            let rows = stmt.query_map(params![directory.id.to_string()], read_file)?;
            let mut files = Vec::new();
            for raw in rows {
                files.push(file_from_raw(raw?)?);
            }
            Ok(files)
        })
    }

    fn find_file_by_path(
        &self,
        directory: &Directory,
        relative_path: &str,
    ) -> MetaResult<Option<File>> {
        self.with_conn(|conn| find_file_in(conn, &directory.id.to_string(), relative_path))
    }

    fn find_or_create_file(&self, directory: &Directory, relative_path: &str) -> MetaResult<File> {
        self.with_conn(|conn| {
            if let Some(file) = find_file_in(conn, &directory.id.to_string(), relative_path)? {
                return Ok(file);
            }
            let file = File {
                id: self.ids.generate(),
                directory_id: directory.id,
                name: relative_path.to_string(),
                current_snapshot_id: None,
                deleted: false,
            };
            conn.execute(
                "INSERT INTO files (id, directory_id, name, current_snapshot_id, deleted)
                 VALUES (?1, ?2, ?3, NULL, 0)",
                params![file.id.to_string(), file.directory_id.to_string(), file.name],
            )?;
            Ok(file)
        })
    }

    fn find_file_snapshots_for_file(&self, file: &File) -> MetaResult<Vec<FileSnapshot>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SNAPSHOT_COLS} FROM file_snapshots
                 WHERE file_id = ?1 ORDER BY created_at ASC, rowid ASC"
            ))?;
            let rows = stmt.query_map(params![file.id.to_string()], read_snapshot)?;
            let mut snapshots = Vec::new();
            for raw in rows {
                snapshots.push(snapshot_from_raw(raw?)?);
            }
            Ok(snapshots)
        })
    }

    fn find_file_snapshot_by_checksum(
        &self,
        file: &File,
        checksum: &str,
    ) -> MetaResult<Option<FileSnapshot>> {
        self.with_conn(|conn| {
            let raw = conn
                .query_row(
                    &format!(
                        "SELECT {SNAPSHOT_COLS} FROM file_snapshots
                         WHERE file_id = ?1 AND content_id = ?2
                         ORDER BY created_at DESC, rowid DESC LIMIT 1"
                    ),
                    params![file.id.to_string(), checksum],
                    read_snapshot,
                )
                .optional()?;
            raw.map(snapshot_from_raw).transpose()
        })
    }

    fn find_file_snapshot_by_id(&self, id: Uuid) -> MetaResult<Option<FileSnapshot>> {
        self.with_conn(|conn| find_snapshot_in(conn, &id.to_string()))
    }

    fn find_content_by_checksum(&self, checksum: &str) -> MetaResult<Option<Content>> {
        self.with_conn(|conn| {
            let raw = conn
                .query_row(
                    "SELECT id, created_at, encrypted_content_id FROM contents WHERE id = ?1",
                    params![checksum],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, i64>(1)?,
                            row.get::<_, Option<String>>(2)?,
                        ))
                    },
                )
                .optional()?;
            Ok(raw.map(|(id, created_at, encrypted_content_id)| Content {
                id,
                created_at: from_nanos(created_at),
                encrypted_content_id,
            }))
        })
    }

    fn create_file_snapshot_and_content(
        &self,
        directory_id: Uuid,
        relative_path: &str,
        new: &NewSnapshot,
    ) -> MetaResult<CommitOutcome> {
        let file_id_if_new = self.ids.generate();
        let created_nanos = to_nanos(&new.created_at)?;

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            // 1. Find or create the file row.
            let file = match find_file_in(&tx, &directory_id.to_string(), relative_path)? {
                Some(file) => file,
                None => {
                    tx.execute(
                        "INSERT INTO files (id, directory_id, name, current_snapshot_id, deleted)
                         VALUES (?1, ?2, ?3, NULL, 0)",
                        params![
                            file_id_if_new.to_string(),
                            directory_id.to_string(),
                            relative_path
                        ],
                    )?;
                    File {
                        id: file_id_if_new,
                        directory_id,
                        name: relative_path.to_string(),
                        current_snapshot_id: None,
                        deleted: false,
                    }
                }
            };

            // 2. Ensure content rows exist. For an encrypted commit the real
            // ciphertext record is inserted first so the virtual record's
            // reference is always satisfied.
            match new.encrypted_content_id.as_deref() {
                Some(cipher_id) => {
                    insert_content_if_absent(&tx, cipher_id, created_nanos, None)?;
                    insert_content_if_absent(
                        &tx,
                        &new.data.content_id,
                        created_nanos,
                        Some(cipher_id),
                    )?;
                }
                None => {
                    insert_content_if_absent(&tx, &new.data.content_id, created_nanos, None)?;
                }
            }

            // 3. No-op when the current snapshot already matches.
            if let Some(current_id) = file.current_snapshot_id {
                if let Some(current) = find_snapshot_in(&tx, &current_id.to_string())? {
                    if current.data.same_observable_state(&new.data) {
                        tx.commit()?;
                        debug!(
                            file = relative_path,
                            checksum = %new.data.content_id,
                            "file unchanged, skipping snapshot"
                        );
                        return Ok(CommitOutcome::Unchanged);
                    }
                }
            }

            // 4. Insert the snapshot and move the current pointer.
            tx.execute(
                "INSERT INTO file_snapshots
                 (id, file_id, content_id, created_at, size, permissions, uid, gid,
                  accessed_at, modified_at, changed_at, born_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    new.snapshot_id.to_string(),
                    file.id.to_string(),
                    new.data.content_id,
                    created_nanos,
                    new.data.size as i64,
                    new.data.permissions,
                    new.data.uid,
                    new.data.gid,
                    to_nanos(&new.data.accessed_at)?,
                    to_nanos(&new.data.modified_at)?,
                    to_nanos(&new.data.changed_at)?,
                    opt_to_nanos(&new.data.born_at)?,
                ],
            )?;
            tx.execute(
                "UPDATE files SET current_snapshot_id = ?1 WHERE id = ?2",
                params![new.snapshot_id.to_string(), file.id.to_string()],
            )?;

            tx.commit()?;
            debug!(
                file = relative_path,
                checksum = %new.data.content_id,
                encrypted = new.encrypted_content_id.is_some(),
                "recorded file snapshot"
            );
            Ok(CommitOutcome::Recorded)
        })
    }

    fn create_backup_operation(
        &self,
        operation: &str,
        parameters: &str,
    ) -> MetaResult<BackupOperation> {
        let started_at = self.clock.now();
        let started_nanos = to_nanos(&started_at)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO backup_operations (started_at, finished_at, operation, parameters, status)
                 VALUES (?1, NULL, ?2, ?3, ?4)",
                params![
                    started_nanos,
                    operation,
                    parameters,
                    OperationStatus::Running.as_str()
                ],
            )?;
            let id = conn.last_insert_rowid();
            debug!(id, operation, "recorded backup operation");
            Ok(BackupOperation {
                id,
                started_at,
                finished_at: None,
                operation: operation.to_string(),
                parameters: parameters.to_string(),
                status: OperationStatus::Running,
            })
        })
    }

    fn finish_backup_operation(&self, id: i64, status: OperationStatus) -> MetaResult<()> {
        let finished_nanos = to_nanos(&self.clock.now())?;
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE backup_operations SET finished_at = ?1, status = ?2 WHERE id = ?3",
                params![finished_nanos, status.as_str(), id],
            )?;
            Ok(())
        })
    }

    fn list_backup_operations(&self, limit: u32) -> MetaResult<Vec<BackupOperation>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {OPERATION_COLS} FROM backup_operations ORDER BY id DESC LIMIT ?1"
            ))?;
            let rows = stmt.query_map(params![limit], read_operation)?;
            let mut operations = Vec::new();
            for raw in rows {
                operations.push(operation_from_raw(raw?)?);
            }
            Ok(operations)
        })
    }

    fn max_backup_operation_id(&self) -> MetaResult<i64> {
        self.with_conn(|conn| {
            let max: i64 = conn.query_row(
                "SELECT COALESCE(MAX(id), 0) FROM backup_operations",
                [],
                |row| row.get(0),
            )?;
            Ok(max)
        })
    }

    fn backup_to(&self, dest: &Path) -> MetaResult<()> {
        self.with_conn(|conn| {
            let mut dst = Connection::open(dest)?;
            let backup = Backup::new(conn, &mut dst)?;
            backup.run_to_completion(64, std::time::Duration::from_millis(5), None)?;
            debug!(dest = %dest.display(), "copied metadata database");
            Ok(())
        })
    }

    fn check_migrations(&self) -> MetaResult<()> {
        self.with_conn(migrations::check)
    }

    fn close(&self) -> MetaResult<()> {
        let mut guard = self.conn.lock().unwrap();
        match guard.take() {
            Some(conn) => conn.close().map_err(|(_, err)| MetaError::Sqlite(err)),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::ids::SequentialIdGenerator;
    use chrono::Duration;

    fn epoch() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-06-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn store() -> (SqliteStore, Arc<FixedClock>) {
        let clock = Arc::new(FixedClock::new(epoch()));
        let ids = Arc::new(SequentialIdGenerator::new());
        let store = SqliteStore::open_in_memory(clock.clone(), ids).unwrap();
        (store, clock)
    }

    fn data(checksum: &str) -> SnapshotData {
        SnapshotData {
            content_id: checksum.to_string(),
            size: 5,
            permissions: 0o644,
            uid: 1000,
            gid: 1000,
            accessed_at: epoch(),
            modified_at: epoch(),
            changed_at: epoch(),
            born_at: Some(epoch()),
        }
    }

    fn new_snapshot(id: u64, checksum: &str) -> NewSnapshot {
        NewSnapshot {
            snapshot_id: Uuid::from_u64_pair(1, id),
            created_at: epoch(),
            data: data(checksum),
            encrypted_content_id: None,
        }
    }

    #[test]
    fn test_directory_create_and_find() {
        let (store, _) = store();
        let dir = store.create_directory("/home/u/docs", false).unwrap();
        assert_eq!(dir.path, "/home/u/docs");
        assert!(!dir.encrypted);

        let found = store.find_directory_by_path("/home/u/docs").unwrap().unwrap();
        assert_eq!(found, dir);
        assert!(store.find_directory_by_path("/home/u").unwrap().is_none());
    }

    #[test]
    fn test_directory_path_unique() {
        let (store, _) = store();
        store.create_directory("/d", false).unwrap();
        assert!(store.create_directory("/d", false).is_err());
    }

    #[test]
    fn test_search_directory_for_path() {
        let (store, _) = store();
        let dir = store.create_directory("/home/u/docs", false).unwrap();

        let found = store
            .search_directory_for_path("/home/u/docs/notes/a.txt")
            .unwrap()
            .unwrap();
        assert_eq!(found.id, dir.id);

        // Exact match counts as contained.
        assert!(store
            .search_directory_for_path("/home/u/docs")
            .unwrap()
            .is_some());
        // Sibling with a common string prefix does not.
        assert!(store
            .search_directory_for_path("/home/u/docs-other/x")
            .unwrap()
            .is_none());
        assert!(store.search_directory_for_path("/elsewhere").unwrap().is_none());
    }

    #[test]
    fn test_consolidation_rehomes_files() {
        let (store, _) = store();
        let child = store.create_directory("/d/a", false).unwrap();
        store
            .create_file_snapshot_and_content(child.id, "x.txt", &new_snapshot(1, "c1"))
            .unwrap();

        let parent = store.create_directory("/d", false).unwrap();

        // Child row is gone.
        assert!(store.find_directory_by_path("/d/a").unwrap().is_none());

        // The file now lives under the parent with the subpath prepended.
        let file = store
            .find_file_by_path(&parent, "a/x.txt")
            .unwrap()
            .unwrap();
        assert_eq!(file.directory_id, parent.id);

        // History is preserved.
        let snapshots = store.find_file_snapshots_for_file(&file).unwrap();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].data.content_id, "c1");
    }

    #[test]
    fn test_consolidation_multiple_children() {
        let (store, _) = store();
        let a = store.create_directory("/d/a", false).unwrap();
        let b = store.create_directory("/d/b/c", false).unwrap();
        store
            .create_file_snapshot_and_content(a.id, "f1", &new_snapshot(1, "c1"))
            .unwrap();
        store
            .create_file_snapshot_and_content(b.id, "f2", &new_snapshot(2, "c2"))
            .unwrap();

        let parent = store.create_directory("/d", false).unwrap();
        assert!(store.find_file_by_path(&parent, "a/f1").unwrap().is_some());
        assert!(store.find_file_by_path(&parent, "b/c/f2").unwrap().is_some());
        assert!(store
            .find_directories_by_path_prefix("/d")
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_find_directories_by_path_prefix_is_strict() {
        let (store, _) = store();
        store.create_directory("/d", false).unwrap();
        store.create_directory("/data", false).unwrap();
        store.create_directory("/e/sub", false).unwrap();

        let under_d = store.find_directories_by_path_prefix("/d").unwrap();
        assert!(under_d.is_empty());

        let under_e = store.find_directories_by_path_prefix("/e").unwrap();
        assert_eq!(under_e.len(), 1);
        assert_eq!(under_e[0].path, "/e/sub");
    }

    #[test]
    fn test_delete_directory_cascades() {
        let (store, _) = store();
        let dir = store.create_directory("/d", false).unwrap();
        store
            .create_file_snapshot_and_content(dir.id, "f", &new_snapshot(1, "c1"))
            .unwrap();

        store.delete_directory(&dir).unwrap();
        assert!(store.find_directory_by_path("/d").unwrap().is_none());

        // Content survives deletion; it may be shared.
        assert!(store.find_content_by_checksum("c1").unwrap().is_some());
    }

    #[test]
    fn test_find_or_create_file_idempotent() {
        let (store, _) = store();
        let dir = store.create_directory("/d", false).unwrap();

        let a = store.find_or_create_file(&dir, "f.txt").unwrap();
        let b = store.find_or_create_file(&dir, "f.txt").unwrap();
        assert_eq!(a.id, b.id);
        assert!(a.current_snapshot_id.is_none());
        assert!(!a.deleted);
    }

    #[test]
    fn test_commit_creates_file_content_snapshot() {
        let (store, _) = store();
        let dir = store.create_directory("/d", false).unwrap();

        let outcome = store
            .create_file_snapshot_and_content(dir.id, "f.txt", &new_snapshot(1, "abc"))
            .unwrap();
        assert_eq!(outcome, CommitOutcome::Recorded);

        let file = store.find_file_by_path(&dir, "f.txt").unwrap().unwrap();
        let current = file.current_snapshot_id.unwrap();
        let snapshot = store.find_file_snapshot_by_id(current).unwrap().unwrap();
        assert_eq!(snapshot.file_id, file.id);
        assert_eq!(snapshot.data.content_id, "abc");

        let content = store.find_content_by_checksum("abc").unwrap().unwrap();
        assert!(!content.is_virtual());
    }

    #[test]
    fn test_commit_identical_is_noop() {
        let (store, _) = store();
        let dir = store.create_directory("/d", false).unwrap();

        store
            .create_file_snapshot_and_content(dir.id, "f", &new_snapshot(1, "abc"))
            .unwrap();
        let outcome = store
            .create_file_snapshot_and_content(dir.id, "f", &new_snapshot(2, "abc"))
            .unwrap();
        assert_eq!(outcome, CommitOutcome::Unchanged);

        let file = store.find_file_by_path(&dir, "f").unwrap().unwrap();
        assert_eq!(store.find_file_snapshots_for_file(&file).unwrap().len(), 1);
    }

    #[test]
    fn test_commit_atime_change_is_still_noop() {
        let (store, _) = store();
        let dir = store.create_directory("/d", false).unwrap();
        store
            .create_file_snapshot_and_content(dir.id, "f", &new_snapshot(1, "abc"))
            .unwrap();

        let mut next = new_snapshot(2, "abc");
        next.data.accessed_at = epoch() + Duration::hours(3);
        let outcome = store
            .create_file_snapshot_and_content(dir.id, "f", &next)
            .unwrap();
        assert_eq!(outcome, CommitOutcome::Unchanged);
    }

    #[test]
    fn test_commit_change_appends_snapshot() {
        let (store, clock) = store();
        let dir = store.create_directory("/d", false).unwrap();
        store
            .create_file_snapshot_and_content(dir.id, "f", &new_snapshot(1, "v1"))
            .unwrap();

        clock.advance(Duration::seconds(10));
        let mut next = new_snapshot(2, "v2");
        next.created_at = clock.now();
        next.data.modified_at = clock.now();
        let outcome = store
            .create_file_snapshot_and_content(dir.id, "f", &next)
            .unwrap();
        assert_eq!(outcome, CommitOutcome::Recorded);

        let file = store.find_file_by_path(&dir, "f").unwrap().unwrap();
        let snapshots = store.find_file_snapshots_for_file(&file).unwrap();
        assert_eq!(snapshots.len(), 2);
        // Ascending by creation time; current pointer at the newest.
        assert_eq!(snapshots[0].data.content_id, "v1");
        assert_eq!(snapshots[1].data.content_id, "v2");
        assert_eq!(file.current_snapshot_id, Some(snapshots[1].id));
    }

    #[test]
    fn test_commit_virtual_content() {
        let (store, _) = store();
        let dir = store.create_directory("/s", true).unwrap();

        let mut snapshot = new_snapshot(1, "plain");
        snapshot.encrypted_content_id = Some("cipher".to_string());
        store
            .create_file_snapshot_and_content(dir.id, "t", &snapshot)
            .unwrap();

        let virt = store.find_content_by_checksum("plain").unwrap().unwrap();
        assert_eq!(virt.encrypted_content_id.as_deref(), Some("cipher"));

        let real = store.find_content_by_checksum("cipher").unwrap().unwrap();
        assert!(!real.is_virtual());
        assert_ne!(virt.id, virt.encrypted_content_id.unwrap());
    }

    #[test]
    fn test_commit_dedups_content_rows() {
        let (store, _) = store();
        let dir = store.create_directory("/d", false).unwrap();
        store
            .create_file_snapshot_and_content(dir.id, "a", &new_snapshot(1, "same"))
            .unwrap();
        store
            .create_file_snapshot_and_content(dir.id, "b", &new_snapshot(2, "same"))
            .unwrap();

        // Two files, two snapshots, one content row.
        let file_a = store.find_file_by_path(&dir, "a").unwrap().unwrap();
        let file_b = store.find_file_by_path(&dir, "b").unwrap().unwrap();
        assert!(file_a.current_snapshot_id.is_some());
        assert!(file_b.current_snapshot_id.is_some());
        assert!(store.find_content_by_checksum("same").unwrap().is_some());
    }

    #[test]
    fn test_find_file_snapshot_by_checksum() {
        let (store, clock) = store();
        let dir = store.create_directory("/d", false).unwrap();
        store
            .create_file_snapshot_and_content(dir.id, "f", &new_snapshot(1, "v1"))
            .unwrap();
        clock.advance(Duration::seconds(1));
        let mut next = new_snapshot(2, "v2");
        next.created_at = clock.now();
        next.data.modified_at = clock.now();
        store
            .create_file_snapshot_and_content(dir.id, "f", &next)
            .unwrap();

        let file = store.find_file_by_path(&dir, "f").unwrap().unwrap();
        let found = store
            .find_file_snapshot_by_checksum(&file, "v1")
            .unwrap()
            .unwrap();
        assert_eq!(found.data.content_id, "v1");
        assert!(store
            .find_file_snapshot_by_checksum(&file, "v9")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_backup_operations_lifecycle() {
        let (store, clock) = store();
        let op = store.create_backup_operation("backup", "{}").unwrap();
        assert_eq!(op.id, 1);
        assert_eq!(op.status, OperationStatus::Running);
        assert!(op.finished_at.is_none());

        clock.advance(Duration::seconds(2));
        store
            .finish_backup_operation(op.id, OperationStatus::Success)
            .unwrap();

        let ops = store.list_backup_operations(10).unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].status, OperationStatus::Success);
        assert_eq!(ops[0].finished_at.unwrap(), epoch() + Duration::seconds(2));
    }

    #[test]
    fn test_operation_ids_increase() {
        let (store, _) = store();
        assert_eq!(store.max_backup_operation_id().unwrap(), 0);

        let a = store.create_backup_operation("dir init", "/d").unwrap();
        let b = store.create_backup_operation("backup", "").unwrap();
        assert!(b.id > a.id);
        assert_eq!(store.max_backup_operation_id().unwrap(), b.id);

        let ops = store.list_backup_operations(1).unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].id, b.id);
    }

    #[test]
    fn test_backup_to_produces_readable_copy() {
        let (store, _) = store();
        let dir = store.create_directory("/d", false).unwrap();
        store
            .create_file_snapshot_and_content(dir.id, "f", &new_snapshot(1, "abc"))
            .unwrap();
        store.create_backup_operation("backup", "").unwrap();

        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("copy.db");
        store.backup_to(&dest).unwrap();

        let copy = SqliteStore::open(
            &dest,
            Arc::new(FixedClock::new(epoch())),
            Arc::new(SequentialIdGenerator::new()),
        )
        .unwrap();
        assert!(copy.find_directory_by_path("/d").unwrap().is_some());
        assert_eq!(copy.max_backup_operation_id().unwrap(), 1);
    }

    #[test]
    fn test_file_backed_store_persists() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("db/host.db");
        {
            let store = SqliteStore::open(
                &path,
                Arc::new(FixedClock::new(epoch())),
                Arc::new(SequentialIdGenerator::new()),
            )
            .unwrap();
            store.create_directory("/d", true).unwrap();
            store.close().unwrap();
        }

        let store = SqliteStore::open(
            &path,
            Arc::new(FixedClock::new(epoch())),
            Arc::new(SequentialIdGenerator::new()),
        )
        .unwrap();
        let dir = store.find_directory_by_path("/d").unwrap().unwrap();
        assert!(dir.encrypted);
    }

    #[test]
    fn test_close_rejects_further_use() {
        let (store, _) = store();
        store.close().unwrap();
        assert!(matches!(
            store.find_directory_by_path("/d"),
            Err(MetaError::Closed)
        ));
        // Closing twice is fine.
        store.close().unwrap();
    }

    #[test]
    fn test_check_migrations_ok() {
        let (store, _) = store();
        store.check_migrations().unwrap();
    }
}
