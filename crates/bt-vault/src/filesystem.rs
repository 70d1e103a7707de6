//! Filesystem-backed vault.
//!
//! Layout:
//!
//! ```text
//! <root>/
//!   content/
//!     <checksum>                 content objects, named by SHA-256
//!   metadata/
//!     <hostId>/
//!       <name>                   metadata slot bytes
//!       <name>.version           decimal version integer
//! ```
//!
//! Writes go through a temp file in the destination directory followed by a
//! rename, so readers never observe partial objects.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{VaultError, VaultResult};
use crate::vault::Vault;

/// [`Vault`] over a local directory tree. Used for offline vaults and
/// throughout the test suites.
pub struct FilesystemVault {
    root: PathBuf,
    content_dir: PathBuf,
    metadata_dir: PathBuf,
}

impl FilesystemVault {
    /// Opens a vault rooted at `root`, creating the directory structure if
    /// it does not exist yet.
    pub fn new(root: impl Into<PathBuf>) -> VaultResult<Self> {
        let root = root.into();
        let content_dir = root.join("content");
        let metadata_dir = root.join("metadata");
        std::fs::create_dir_all(&content_dir)?;
        std::fs::create_dir_all(&metadata_dir)?;
        Ok(Self {
            root,
            content_dir,
            metadata_dir,
        })
    }

    fn metadata_path(&self, host_id: &str, name: &str) -> PathBuf {
        self.metadata_dir.join(host_id).join(name)
    }

    fn version_path(&self, host_id: &str, name: &str) -> PathBuf {
        self.metadata_dir.join(host_id).join(format!("{name}.version"))
    }

    /// Streams `reader` into `dest` atomically, verifying the byte count.
    fn write_file(dest: &Path, reader: &mut dyn Read, expected_size: u64) -> VaultResult<()> {
        let dir = dest.parent().ok_or_else(|| {
            VaultError::InvalidSetup(format!("destination has no parent: {}", dest.display()))
        })?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        let written = std::io::copy(reader, tmp.as_file_mut())?;
        if written != expected_size {
            return Err(VaultError::SizeMismatch {
                expected: expected_size,
                actual: written,
            });
        }
        tmp.as_file_mut().sync_all()?;
        tmp.persist(dest).map_err(|err| VaultError::Io(err.error))?;
        Ok(())
    }

    /// Consumes a reader whose bytes are already stored, still enforcing
    /// the declared size so caller bugs surface on the idempotent path too.
    fn drain_and_verify(reader: &mut dyn Read, expected_size: u64) -> VaultResult<()> {
        let written = std::io::copy(reader, &mut std::io::sink())?;
        if written != expected_size {
            return Err(VaultError::SizeMismatch {
                expected: expected_size,
                actual: written,
            });
        }
        Ok(())
    }
}

impl Vault for FilesystemVault {
    fn put_content(&self, checksum: &str, reader: &mut dyn Read, size: u64) -> VaultResult<()> {
        let dest = self.content_dir.join(checksum);
        if dest.exists() {
            debug!(checksum, "content already present, skipping write");
            return Self::drain_and_verify(reader, size);
        }
        Self::write_file(&dest, reader, size)?;
        debug!(checksum, size, "stored content object");
        Ok(())
    }

    fn get_content(&self, checksum: &str, writer: &mut dyn Write) -> VaultResult<()> {
        let src = self.content_dir.join(checksum);
        let mut file = match std::fs::File::open(&src) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(VaultError::ContentNotFound {
                    checksum: checksum.to_string(),
                })
            }
            Err(err) => return Err(err.into()),
        };
        std::io::copy(&mut file, writer)?;
        Ok(())
    }

    fn put_metadata(
        &self,
        host_id: &str,
        name: &str,
        reader: &mut dyn Read,
        size: u64,
        version: i64,
    ) -> VaultResult<()> {
        let dest = self.metadata_path(host_id, name);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::write_file(&dest, reader, size)?;

        let version_text = version.to_string();
        Self::write_file(
            &self.version_path(host_id, name),
            &mut version_text.as_bytes(),
            version_text.len() as u64,
        )?;
        debug!(host_id, name, version, size, "stored metadata slot");
        Ok(())
    }

    fn get_metadata(&self, host_id: &str, name: &str, writer: &mut dyn Write) -> VaultResult<()> {
        let src = self.metadata_path(host_id, name);
        let mut file = match std::fs::File::open(&src) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(VaultError::MetadataNotFound {
                    host_id: host_id.to_string(),
                    name: name.to_string(),
                })
            }
            Err(err) => return Err(err.into()),
        };
        std::io::copy(&mut file, writer)?;
        Ok(())
    }

    fn get_metadata_version(&self, host_id: &str, name: &str) -> VaultResult<i64> {
        let data = match std::fs::read_to_string(self.version_path(host_id, name)) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err.into()),
        };
        data.trim()
            .parse::<i64>()
            .map_err(|err| VaultError::CorruptVersion {
                host_id: host_id.to_string(),
                name: name.to_string(),
                reason: err.to_string(),
            })
    }

    fn validate_setup(&self) -> VaultResult<()> {
        for dir in [&self.root, &self.content_dir, &self.metadata_dir] {
            let metadata = std::fs::metadata(dir).map_err(|err| {
                VaultError::InvalidSetup(format!("{} not accessible: {err}", dir.display()))
            })?;
            if !metadata.is_dir() {
                return Err(VaultError::InvalidSetup(format!(
                    "{} is not a directory",
                    dir.display()
                )));
            }
        }
        Ok(())
    }
}
