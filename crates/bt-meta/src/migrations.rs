//! Embedded schema migrations.
//!
//! Versions are tracked in `PRAGMA user_version`. Each migration is a SQL
//! batch applied inside its own transaction; opening a store applies
//! pending migrations, and a database whose version is newer than
//! [`LATEST_VERSION`] is rejected rather than guessed at.

use rusqlite::Connection;
use tracing::info;

use crate::error::{MetaError, MetaResult};

/// Ordered migration batches; index + 1 is the resulting schema version.
const MIGRATIONS: &[&str] = &[
    // v1: initial schema.
    r#"
    CREATE TABLE directories (
        id          TEXT PRIMARY KEY,
        path        TEXT NOT NULL UNIQUE,
        encrypted   INTEGER NOT NULL DEFAULT 0,
        created_at  INTEGER NOT NULL
    );

    CREATE TABLE contents (
        id                    TEXT PRIMARY KEY,
        created_at            INTEGER NOT NULL,
        encrypted_content_id  TEXT REFERENCES contents(id)
    );

    CREATE TABLE files (
        id                   TEXT PRIMARY KEY,
        directory_id         TEXT NOT NULL REFERENCES directories(id) ON DELETE CASCADE,
        name                 TEXT NOT NULL,
        current_snapshot_id  TEXT,
        deleted              INTEGER NOT NULL DEFAULT 0,
        UNIQUE (directory_id, name)
    );

    CREATE TABLE file_snapshots (
        id           TEXT PRIMARY KEY,
        file_id      TEXT NOT NULL REFERENCES files(id) ON DELETE CASCADE,
        content_id   TEXT NOT NULL REFERENCES contents(id),
        created_at   INTEGER NOT NULL,
        size         INTEGER NOT NULL,
        permissions  INTEGER NOT NULL,
        uid          INTEGER NOT NULL,
        gid          INTEGER NOT NULL,
        accessed_at  INTEGER NOT NULL,
        modified_at  INTEGER NOT NULL,
        changed_at   INTEGER NOT NULL,
        born_at      INTEGER
    );

    CREATE INDEX idx_files_directory ON files(directory_id);
    CREATE INDEX idx_snapshots_file ON file_snapshots(file_id);
    CREATE INDEX idx_snapshots_content ON file_snapshots(content_id);

    CREATE TABLE backup_operations (
        id           INTEGER PRIMARY KEY AUTOINCREMENT,
        started_at   INTEGER NOT NULL,
        finished_at  INTEGER,
        operation    TEXT NOT NULL,
        parameters   TEXT NOT NULL,
        status       TEXT NOT NULL
    );
    "#,
];

/// The schema version this binary writes.
pub const LATEST_VERSION: i32 = MIGRATIONS.len() as i32;

/// Reads the database's schema version.
pub fn current_version(conn: &Connection) -> MetaResult<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    Ok(version)
}

/// Applies pending migrations, each in its own transaction.
pub fn migrate(conn: &mut Connection) -> MetaResult<()> {
    let mut version = current_version(conn)?;
    if version > LATEST_VERSION {
        return Err(MetaError::SchemaOutOfDate {
            found: version,
            supported: LATEST_VERSION,
        });
    }

    while version < LATEST_VERSION {
        let next = version + 1;
        let tx = conn.transaction()?;
        tx.execute_batch(MIGRATIONS[version as usize])?;
        // PRAGMA assignment does not support parameter binding.
        tx.execute_batch(&format!("PRAGMA user_version = {next}"))?;
        tx.commit()?;
        info!(from = version, to = next, "applied schema migration");
        version = next;
    }
    Ok(())
}

/// Verifies the database is at a supported schema version.
pub fn check(conn: &Connection) -> MetaResult<()> {
    let version = current_version(conn)?;
    if version > LATEST_VERSION {
        return Err(MetaError::SchemaOutOfDate {
            found: version,
            supported: LATEST_VERSION,
        });
    }
    Ok(())
}
