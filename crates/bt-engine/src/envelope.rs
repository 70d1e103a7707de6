//! The operation envelope: the durability lifecycle around every mutating
//! invocation.
//!
//! Opening the envelope fences the invocation against stale local state: if
//! the vault has a `db` snapshot with a newer version than the local
//! database's largest operation id, the local history is behind and the
//! invocation aborts. The operation record itself is persisted lazily by
//! the first real mutation; on close a persisted operation is finalised and
//! the database snapshot (encrypted when keys are configured) is uploaded
//! under that operation id, so "newer vault state" always means "more
//! committed local history".

use std::fs::File;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use bt_crypto::Encryptor;
use bt_meta::{MetadataStore, OperationStatus};
use bt_vault::{Vault, KEY_METADATA_VERSION, METADATA_DB, METADATA_PRIVATE_KEY, METADATA_PUBLIC_KEY};
use tracing::{debug, info, warn};

use crate::error::{EngineError, EngineResult};

/// Lazily-persisted record of the running invocation.
///
/// Commands that never mutate the database leave no trace; the first
/// mutating call persists the record, obtaining the monotonic operation id
/// that versions the uploaded snapshot.
pub struct OperationRecorder {
    operation: String,
    parameters: String,
    persisted: Mutex<Option<i64>>,
}

impl OperationRecorder {
    /// Creates an in-memory record for the named command.
    pub fn new(operation: impl Into<String>, parameters: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            parameters: parameters.into(),
            persisted: Mutex::new(None),
        }
    }

    /// Persists the record if it is not yet in the database; returns the
    /// operation id either way.
    pub fn ensure_persisted(&self, meta: &dyn MetadataStore) -> bt_meta::MetaResult<i64> {
        let mut persisted = self.persisted.lock().unwrap();
        if let Some(id) = *persisted {
            return Ok(id);
        }
        let operation = meta.create_backup_operation(&self.operation, &self.parameters)?;
        debug!(id = operation.id, operation = %self.operation, "persisted operation record");
        *persisted = Some(operation.id);
        Ok(operation.id)
    }

    /// The persisted operation id, when the invocation has mutated the
    /// database.
    pub fn persisted_id(&self) -> Option<i64> {
        *self.persisted.lock().unwrap()
    }

    /// The command tag this recorder was created for.
    pub fn operation(&self) -> &str {
        &self.operation
    }
}

/// An open invocation lifecycle.
pub struct Envelope {
    host_id: String,
    meta: Arc<dyn MetadataStore>,
    vault: Arc<dyn Vault>,
    encryptor: Arc<dyn Encryptor>,
    recorder: Arc<OperationRecorder>,
    key_paths: Option<(PathBuf, PathBuf)>,
}

impl Envelope {
    /// Opens the envelope: checks schema migrations and fences against the
    /// vault's view of this host's metadata version.
    pub fn open(
        host_id: impl Into<String>,
        meta: Arc<dyn MetadataStore>,
        vault: Arc<dyn Vault>,
        encryptor: Arc<dyn Encryptor>,
        recorder: Arc<OperationRecorder>,
        key_paths: Option<(PathBuf, PathBuf)>,
    ) -> EngineResult<Self> {
        let host_id = host_id.into();
        meta.check_migrations()?;

        let remote = vault.get_metadata_version(&host_id, METADATA_DB)?;
        let local = meta.max_backup_operation_id()?;
        if remote > local {
            return Err(EngineError::LocalBehind { local, remote });
        }
        debug!(host_id = %host_id, local, remote, "operation envelope open");

        Ok(Self {
            host_id,
            meta,
            vault,
            encryptor,
            recorder,
            key_paths,
        })
    }

    /// The recorder commands persist themselves through.
    pub fn recorder(&self) -> Arc<OperationRecorder> {
        Arc::clone(&self.recorder)
    }

    /// Closes the envelope. A persisted operation is finalised with
    /// `status` and the database snapshot is uploaded under its id; an
    /// invocation that never mutated the database just closes the store.
    pub fn close(self, status: OperationStatus) -> EngineResult<()> {
        let finalise_result = self.finalise(status);
        let close_result = self.meta.close().map_err(EngineError::from);
        finalise_result.and(close_result)
    }

    fn finalise(&self, status: OperationStatus) -> EngineResult<()> {
        let Some(operation_id) = self.recorder.persisted_id() else {
            debug!("no database mutation; skipping snapshot upload");
            return Ok(());
        };
        self.meta.finish_backup_operation(operation_id, status)?;

        // Scratch directory is removed on drop; cleanup is best-effort.
        let scratch = tempfile::tempdir()?;
        let snapshot_path = scratch.path().join("db");
        self.meta.backup_to(&snapshot_path)?;

        let upload_path = if self.encryptor.is_configured() {
            let encrypted_path = scratch.path().join("db.age");
            let mut plain = File::open(&snapshot_path)?;
            let mut sealed = File::create(&encrypted_path)?;
            self.encryptor.encrypt(&mut plain, &mut sealed)?;
            encrypted_path
        } else {
            snapshot_path
        };

        let size = std::fs::metadata(&upload_path)?.len();
        let mut reader = File::open(&upload_path)?;
        self.vault
            .put_metadata(&self.host_id, METADATA_DB, &mut reader, size, operation_id)?;
        info!(
            host_id = %self.host_id,
            version = operation_id,
            status = %status,
            "uploaded database snapshot"
        );

        if self.encryptor.is_configured() {
            self.upload_keys()?;
        }
        Ok(())
    }

    /// Uploads the key pair at the fixed key version; idempotent since the
    /// keys never change after setup.
    fn upload_keys(&self) -> EngineResult<()> {
        let Some((public_path, private_path)) = &self.key_paths else {
            warn!("encryption configured but key paths unknown; skipping key upload");
            return Ok(());
        };
        for (name, path) in [
            (METADATA_PUBLIC_KEY, public_path),
            (METADATA_PRIVATE_KEY, private_path),
        ] {
            let size = std::fs::metadata(path)?.len();
            let mut reader = File::open(path)?;
            self.vault
                .put_metadata(&self.host_id, name, &mut reader, size, KEY_METADATA_VERSION)?;
        }
        debug!(host_id = %self.host_id, "uploaded key pair");
        Ok(())
    }
}
