//! Restore: vault retrieval with content indirection, streaming
//! decryption, and snapshot metadata re-application.

use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use bt_crypto::DecryptionContext;
use bt_meta::{Directory, File, FileSnapshot};
use filetime::FileTime;
use tracing::{debug, info, warn};

use crate::error::{EngineError, EngineResult};
use crate::service::BackupService;

/// Suffix appended to every restored file; restore never overwrites.
const RESTORED_SUFFIX: &str = "btrestored";
/// Checksum prefix length embedded in restored file names.
const CHECKSUM_PREFIX_LEN: usize = 12;

impl BackupService {
    /// Restores a file or a whole tracked directory.
    ///
    /// When `path` names a tracked directory, `checksum` must be empty and
    /// every non-deleted file with a current snapshot is restored.
    /// Otherwise `path` is treated as a file and the snapshot is chosen by
    /// `checksum`, falling back to the current one. Returns the written
    /// output paths.
    pub fn restore(
        &self,
        path: &Path,
        checksum: Option<&str>,
        decrypt: Option<&dyn DecryptionContext>,
    ) -> EngineResult<Vec<PathBuf>> {
        let absolute = std::path::absolute(path)?;
        let path_text = absolute.to_string_lossy();

        if let Some(directory) = self.meta.find_directory_by_path(&path_text)? {
            if checksum.is_some() {
                return Err(EngineError::InvalidArguments(
                    "a checksum cannot be combined with a whole-directory restore".to_string(),
                ));
            }
            return self.restore_directory(&directory, decrypt);
        }

        let tracked = self.tracked_directory_for(&absolute)?;
        let relative = self.relative_within(&tracked, &absolute)?;
        let file = self
            .meta
            .find_file_by_path(&tracked, &relative)?
            .ok_or_else(|| EngineError::UnknownFile {
                path: absolute.clone(),
            })?;

        let snapshot = match checksum {
            Some(checksum) => self
                .meta
                .find_file_snapshot_by_checksum(&file, checksum)?
                .ok_or_else(|| EngineError::SnapshotNotFound {
                    path: absolute.clone(),
                    checksum: checksum.to_string(),
                })?,
            None => self.current_snapshot_of(&file, &absolute)?,
        };

        let output = self.restore_snapshot(&tracked, &file, &snapshot, decrypt)?;
        Ok(vec![output])
    }

    fn restore_directory(
        &self,
        directory: &Directory,
        decrypt: Option<&dyn DecryptionContext>,
    ) -> EngineResult<Vec<PathBuf>> {
        let mut outputs = Vec::new();
        for file in self.meta.find_files_by_directory(directory)? {
            if file.deleted {
                continue;
            }
            let Some(snapshot_id) = file.current_snapshot_id else {
                continue;
            };
            let Some(snapshot) = self.meta.find_file_snapshot_by_id(snapshot_id)? else {
                continue;
            };
            outputs.push(self.restore_snapshot(directory, &file, &snapshot, decrypt)?);
        }
        info!(directory = %directory.path, restored = outputs.len(), "restored directory");
        Ok(outputs)
    }

    fn current_snapshot_of(&self, file: &File, path: &Path) -> EngineResult<FileSnapshot> {
        let snapshot_id = file
            .current_snapshot_id
            .ok_or_else(|| EngineError::NoCurrentSnapshot {
                path: path.to_path_buf(),
            })?;
        self.meta
            .find_file_snapshot_by_id(snapshot_id)?
            .ok_or_else(|| EngineError::NoCurrentSnapshot {
                path: path.to_path_buf(),
            })
    }

    /// Restores one snapshot next to the original file:
    /// `{dir}/{basename}.{checksum[:12]}.btrestored`.
    fn restore_snapshot(
        &self,
        directory: &Directory,
        file: &File,
        snapshot: &FileSnapshot,
        decrypt: Option<&dyn DecryptionContext>,
    ) -> EngineResult<PathBuf> {
        let original = Path::new(&directory.path).join(&file.name);
        let basename = original
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| file.name.clone());
        let short = &snapshot.data.content_id[..CHECKSUM_PREFIX_LEN.min(snapshot.data.content_id.len())];
        let output = original.with_file_name(format!("{basename}.{short}.{RESTORED_SUFFIX}"));

        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = self
            .meta
            .find_content_by_checksum(&snapshot.data.content_id)?
            .ok_or_else(|| EngineError::ContentMissing {
                checksum: snapshot.data.content_id.clone(),
            })?;

        // Encryption is resolved before the output file exists so a refused
        // restore leaves nothing behind.
        if content.encrypted_content_id.is_some() && decrypt.is_none() {
            return Err(EngineError::NeedsDecryption {
                path: original.clone(),
            });
        }

        // create_new makes OutputExists atomic rather than check-then-write.
        let mut out = match OpenOptions::new().write(true).create_new(true).open(&output) {
            Ok(out) => out,
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(EngineError::OutputExists { path: output })
            }
            Err(err) => return Err(err.into()),
        };

        let result = match (&content.encrypted_content_id, decrypt) {
            (None, _) => self
                .vault
                .get_content(&content.id, &mut out)
                .map_err(EngineError::from),
            (Some(cipher_id), Some(ctx)) => self.fetch_decrypting(cipher_id, ctx, &mut out),
            (Some(_), None) => Err(EngineError::NeedsDecryption {
                path: original.clone(),
            }),
        };
        if let Err(err) = result {
            drop(out);
            if let Err(cleanup) = std::fs::remove_file(&output) {
                warn!(path = %output.display(), error = %cleanup, "failed to remove partial restore");
            }
            return Err(err);
        }
        out.flush()?;
        drop(out);

        self.apply_snapshot_metadata(&output, snapshot)?;
        debug!(output = %output.display(), checksum = %snapshot.data.content_id, "restored file");
        Ok(output)
    }

    /// Streams ciphertext from the vault through the decryptor into the
    /// output, without buffering the file: the vault writes into one end of
    /// an OS pipe on a scoped thread while the decryptor drains the other.
    fn fetch_decrypting(
        &self,
        cipher_id: &str,
        decrypt: &dyn DecryptionContext,
        out: &mut std::fs::File,
    ) -> EngineResult<()> {
        let (mut reader, writer) = std::io::pipe()?;

        std::thread::scope(|scope| {
            let vault = &self.vault;
            let producer = scope.spawn(move || {
                let mut writer = writer;
                let result = vault.get_content(cipher_id, &mut writer);
                // Dropping the writer signals EOF (or truncation, on error)
                // to the decrypting side.
                drop(writer);
                result
            });

            let decrypted = decrypt.decrypt(&mut reader, out);
            // If decryption bailed early, dropping the reader breaks the
            // producer's pipe and unblocks it.
            drop(reader);
            let produced = producer.join().expect("vault reader thread panicked");

            match (produced, decrypted) {
                (Ok(()), Ok(())) => Ok(()),
                (Ok(()), Err(crypto_err)) => Err(crypto_err.into()),
                (Err(vault_err), Ok(())) => Err(vault_err.into()),
                // Both sides failed: a broken pipe on the vault side is the
                // echo of the decryptor giving up, not the root cause.
                (Err(vault_err), Err(crypto_err)) => {
                    let broken_pipe = matches!(
                        &vault_err,
                        bt_vault::VaultError::Io(io) if io.kind() == std::io::ErrorKind::BrokenPipe
                    );
                    if broken_pipe {
                        Err(crypto_err.into())
                    } else {
                        Err(vault_err.into())
                    }
                }
            }
        })
    }

    /// Re-applies mode bits and timestamps; ownership is best-effort.
    fn apply_snapshot_metadata(&self, path: &Path, snapshot: &FileSnapshot) -> EngineResult<()> {
        std::fs::set_permissions(
            path,
            std::fs::Permissions::from_mode(snapshot.data.permissions),
        )?;

        let atime = FileTime::from_system_time(snapshot.data.accessed_at.into());
        let mtime = FileTime::from_system_time(snapshot.data.modified_at.into());
        filetime::set_file_times(path, atime, mtime)?;

        // uid/gid need privilege; recorded but not required.
        if let Err(err) = std::os::unix::fs::chown(
            path,
            Some(snapshot.data.uid),
            Some(snapshot.data.gid),
        ) {
            debug!(path = %path.display(), error = %err, "ownership not applied");
        }
        Ok(())
    }
}
