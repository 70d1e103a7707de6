//! In-memory vault for tests and tiny workloads.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::Mutex;

use tracing::debug;

use crate::error::{VaultError, VaultResult};
use crate::vault::Vault;

/// [`Vault`] backed by mutex-guarded maps. Same observable semantics as the
/// filesystem vault, including size verification on the idempotent path.
#[derive(Default)]
pub struct MemoryVault {
    content: Mutex<HashMap<String, Vec<u8>>>,
    metadata: Mutex<HashMap<(String, String), (Vec<u8>, i64)>>,
}

impl MemoryVault {
    /// Creates an empty in-memory vault.
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of stored content objects.
    pub fn content_count(&self) -> usize {
        self.content.lock().unwrap().len()
    }

    /// A copy of the bytes stored under `checksum`, if any.
    pub fn content_bytes(&self, checksum: &str) -> Option<Vec<u8>> {
        self.content.lock().unwrap().get(checksum).cloned()
    }
}

fn read_sized(reader: &mut dyn Read, expected_size: u64) -> VaultResult<Vec<u8>> {
    let mut buf = Vec::new();
    let read = std::io::copy(reader, &mut buf)?;
    if read != expected_size {
        return Err(VaultError::SizeMismatch {
            expected: expected_size,
            actual: read,
        });
    }
    Ok(buf)
}

impl Vault for MemoryVault {
    fn put_content(&self, checksum: &str, reader: &mut dyn Read, size: u64) -> VaultResult<()> {
        let buf = read_sized(reader, size)?;
        let mut content = self.content.lock().unwrap();
        if !content.contains_key(checksum) {
            content.insert(checksum.to_string(), buf);
            debug!(checksum, size, "stored content object in memory");
        }
        Ok(())
    }

    fn get_content(&self, checksum: &str, writer: &mut dyn Write) -> VaultResult<()> {
        let content = self.content.lock().unwrap();
        let bytes = content
            .get(checksum)
            .ok_or_else(|| VaultError::ContentNotFound {
                checksum: checksum.to_string(),
            })?;
        writer.write_all(bytes)?;
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
        let buf = read_sized(reader, size)?;
        self.metadata
            .lock()
            .unwrap()
            .insert((host_id.to_string(), name.to_string()), (buf, version));
        Ok(())
    }

    fn get_metadata(&self, host_id: &str, name: &str, writer: &mut dyn Write) -> VaultResult<()> {
        let metadata = self.metadata.lock().unwrap();
        let (bytes, _) = metadata
            .get(&(host_id.to_string(), name.to_string()))
            .ok_or_else(|| VaultError::MetadataNotFound {
                host_id: host_id.to_string(),
                name: name.to_string(),
            })?;
        writer.write_all(bytes)?;
        Ok(())
    }

    fn get_metadata_version(&self, host_id: &str, name: &str) -> VaultResult<i64> {
        let metadata = self.metadata.lock().unwrap();
        Ok(metadata
            .get(&(host_id.to_string(), name.to_string()))
            .map(|(_, version)| *version)
            .unwrap_or(0))
    }

    fn validate_setup(&self) -> VaultResult<()> {
        Ok(())
    }
}
