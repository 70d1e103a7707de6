//! The backup drain: vault upload plus atomic metadata commit.

use std::io::{Read, Seek, SeekFrom, Write};

use bt_meta::{NewSnapshot, SnapshotData};
use bt_staging::{DrainError, Processed};
use sha2::{Digest, Sha256};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::service::BackupService;

/// Computes a SHA-256 while passing writes through to an inner writer.
struct HashingWriter<W> {
    inner: W,
    hasher: Sha256,
    written: u64,
}

impl<W: Write> HashingWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            written: 0,
        }
    }

    fn finish(self) -> (W, String, u64) {
        (self.inner, hex::encode(self.hasher.finalize()), self.written)
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

impl BackupService {
    /// Drains the staging queue, committing every entry to the vault and
    /// the metadata store. Returns the number of operations committed.
    ///
    /// A failing entry stops the drain and stays queued: the next
    /// invocation retries it. Content already uploaded by a failed attempt
    /// is re-used (puts are idempotent) or remains dormant.
    pub fn backup_all(&self) -> EngineResult<usize> {
        let mut committed = 0;
        loop {
            let result = self.staging.process_next(|reader, snapshot, dir_id, rel| {
                self.backup_one(reader, snapshot, dir_id, rel)
            });
            match result {
                Ok(Processed::Committed) => committed += 1,
                Ok(Processed::Empty) => break,
                Err(DrainError::Callback(err)) => return Err(err),
                Err(DrainError::Staging(err)) => return Err(err.into()),
            }
        }
        info!(committed, "backup complete");
        Ok(committed)
    }

    /// Commits one staged operation: upload (deduplicated, optionally
    /// encrypted) then the atomic snapshot-and-content commit.
    fn backup_one(
        &self,
        reader: &mut dyn Read,
        snapshot: &SnapshotData,
        directory_id: Uuid,
        relative_path: &str,
    ) -> EngineResult<()> {
        let directory = self
            .meta
            .find_directory_by_id(directory_id)?
            .ok_or_else(|| EngineError::NotTracked {
                path: relative_path.into(),
            })?;
        let existing = self.meta.find_content_by_checksum(&snapshot.content_id)?;

        let encrypted_content_id = if directory.encrypted {
            match existing.as_ref().and_then(|c| c.encrypted_content_id.clone()) {
                // A virtual record for this plaintext already exists: the
                // ciphertext is in the vault, skip encryption and upload.
                Some(cipher_id) => {
                    debug!(
                        checksum = %snapshot.content_id,
                        "encrypted content already in vault, skipping upload"
                    );
                    Some(cipher_id)
                }
                None => Some(self.encrypt_and_upload(reader)?),
            }
        } else {
            if existing.is_some() {
                debug!(
                    checksum = %snapshot.content_id,
                    "content already known, skipping upload"
                );
            } else {
                self.vault
                    .put_content(&snapshot.content_id, reader, snapshot.size)?;
            }
            None
        };

        // The operation record is persisted lazily, right before the first
        // real mutation of the database.
        self.recorder.ensure_persisted(self.meta.as_ref())?;

        let new = NewSnapshot {
            snapshot_id: self.ids.generate(),
            created_at: self.clock.now(),
            data: snapshot.clone(),
            encrypted_content_id,
        };
        self.meta
            .create_file_snapshot_and_content(directory.id, relative_path, &new)?;
        Ok(())
    }

    /// Streams the staged bytes through the encryptor into a spool file,
    /// hashing the ciphertext in flight, then uploads it under the
    /// ciphertext checksum. Returns that checksum.
    fn encrypt_and_upload(&self, reader: &mut dyn Read) -> EngineResult<String> {
        let spool = tempfile::tempfile()?;
        let mut sink = HashingWriter::new(spool);
        self.encryptor.encrypt(reader, &mut sink)?;
        sink.flush()?;
        let (mut spool, cipher_checksum, cipher_size) = sink.finish();

        spool.seek(SeekFrom::Start(0))?;
        self.vault
            .put_content(&cipher_checksum, &mut spool, cipher_size)?;
        debug!(
            ciphertext = %cipher_checksum,
            size = cipher_size,
            "uploaded encrypted content"
        );
        Ok(cipher_checksum)
    }
}
