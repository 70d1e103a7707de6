//! Remote vault over a pluggable object store.
//!
//! The concrete storage SDK is an external collaborator; [`RemoteVault`] is
//! written against [`ObjectStoreBackend`], which any backend with idempotent
//! keyed puts, streaming gets, and existence checks can satisfy. Atomicity
//! of in-flight writes is the backend's concern (object stores expose
//! complete objects only); version markers ride as small sibling objects,
//! last write wins.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::Mutex;

use tracing::debug;

use crate::error::{VaultError, VaultResult};
use crate::vault::Vault;

/// Minimal object-store surface the remote vault needs.
///
/// `put_object` must verify that the stream yields exactly `size` bytes and
/// fail with [`VaultError::SizeMismatch`] otherwise; most SDKs require the
/// length up front anyway.
pub trait ObjectStoreBackend: Send + Sync {
    /// Stores an object under `key`.
    fn put_object(&self, key: &str, reader: &mut dyn Read, size: u64) -> VaultResult<()>;

    /// Streams the object under `key` into `writer`; fails with
    /// [`VaultError::ContentNotFound`] when absent.
    fn get_object(&self, key: &str, writer: &mut dyn Write) -> VaultResult<()>;

    /// Whether an object exists under `key`.
    fn object_exists(&self, key: &str) -> VaultResult<bool>;

    /// Whether the backing bucket/container is reachable.
    fn validate(&self) -> VaultResult<()>;
}

/// [`Vault`] implementation over an [`ObjectStoreBackend`].
///
/// Key layout mirrors the filesystem vault: `content/<checksum>`,
/// `metadata/<hostId>/<name>` and `metadata/<hostId>/<name>.version`, all
/// under an optional key prefix.
pub struct RemoteVault<B: ObjectStoreBackend> {
    backend: B,
    prefix: String,
}

impl<B: ObjectStoreBackend> RemoteVault<B> {
    /// Creates a remote vault with the given key prefix (may be empty; a
    /// trailing `/` is added when missing).
    pub fn new(backend: B, prefix: impl Into<String>) -> Self {
        let mut prefix = prefix.into();
        if !prefix.is_empty() && !prefix.ends_with('/') {
            prefix.push('/');
        }
        Self { backend, prefix }
    }

    /// The wrapped backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn content_key(&self, checksum: &str) -> String {
        format!("{}content/{}", self.prefix, checksum)
    }

    fn metadata_key(&self, host_id: &str, name: &str) -> String {
        format!("{}metadata/{}/{}", self.prefix, host_id, name)
    }

    fn version_key(&self, host_id: &str, name: &str) -> String {
        format!("{}metadata/{}/{}.version", self.prefix, host_id, name)
    }
}

impl<B: ObjectStoreBackend> Vault for RemoteVault<B> {
    fn put_content(&self, checksum: &str, reader: &mut dyn Read, size: u64) -> VaultResult<()> {
        let key = self.content_key(checksum);
        if self.backend.object_exists(&key)? {
            debug!(checksum, "content already present remotely, draining reader");
            let read = std::io::copy(reader, &mut std::io::sink())?;
            if read != size {
                return Err(VaultError::SizeMismatch {
                    expected: size,
                    actual: read,
                });
            }
            return Ok(());
        }
        self.backend.put_object(&key, reader, size)?;
        debug!(checksum, size, "uploaded content object");
        Ok(())
    }

    fn get_content(&self, checksum: &str, writer: &mut dyn Write) -> VaultResult<()> {
        self.backend
            .get_object(&self.content_key(checksum), writer)
            .map_err(|err| match err {
                VaultError::ContentNotFound { .. } => VaultError::ContentNotFound {
                    checksum: checksum.to_string(),
                },
                other => other,
            })
    }

    fn put_metadata(
        &self,
        host_id: &str,
        name: &str,
        reader: &mut dyn Read,
        size: u64,
        version: i64,
    ) -> VaultResult<()> {
        self.backend
            .put_object(&self.metadata_key(host_id, name), reader, size)?;
        let version_text = version.to_string();
        self.backend.put_object(
            &self.version_key(host_id, name),
            &mut version_text.as_bytes(),
            version_text.len() as u64,
        )?;
        debug!(host_id, name, version, "uploaded metadata slot");
        Ok(())
    }

    fn get_metadata(&self, host_id: &str, name: &str, writer: &mut dyn Write) -> VaultResult<()> {
        self.backend
            .get_object(&self.metadata_key(host_id, name), writer)
            .map_err(|err| match err {
                VaultError::ContentNotFound { .. } => VaultError::MetadataNotFound {
                    host_id: host_id.to_string(),
                    name: name.to_string(),
                },
                other => other,
            })
    }

    fn get_metadata_version(&self, host_id: &str, name: &str) -> VaultResult<i64> {
        let key = self.version_key(host_id, name);
        if !self.backend.object_exists(&key)? {
            return Ok(0);
        }
        let mut buf = Vec::new();
        self.backend.get_object(&key, &mut buf)?;
        String::from_utf8_lossy(&buf)
            .trim()
            .parse::<i64>()
            .map_err(|err| VaultError::CorruptVersion {
                host_id: host_id.to_string(),
                name: name.to_string(),
                reason: err.to_string(),
            })
    }

    fn validate_setup(&self) -> VaultResult<()> {
        self.backend.validate()
    }
}

/// Operation counters for [`MockObjectStore`].
#[derive(Debug, Clone, Default)]
pub struct MockObjectStoreStats {
    /// Number of put operations.
    pub puts: u64,
    /// Number of get operations.
    pub gets: u64,
    /// Number of existence checks.
    pub exists_checks: u64,
    /// Total bytes stored.
    pub total_bytes_stored: u64,
}

/// In-memory [`ObjectStoreBackend`] for tests.
#[derive(Default)]
pub struct MockObjectStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    stats: Mutex<MockObjectStoreStats>,
}

impl MockObjectStore {
    /// Creates an empty mock store.
    pub fn new() -> Self {
        Self::default()
    }

    /// A snapshot of the operation counters.
    pub fn stats(&self) -> MockObjectStoreStats {
        self.stats.lock().unwrap().clone()
    }

    /// The number of stored objects.
    pub fn object_count(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    /// All stored keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.objects.lock().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl ObjectStoreBackend for MockObjectStore {
    fn put_object(&self, key: &str, reader: &mut dyn Read, size: u64) -> VaultResult<()> {
        let mut buf = Vec::new();
        let read = std::io::copy(reader, &mut buf)?;
        if read != size {
            return Err(VaultError::SizeMismatch {
                expected: size,
                actual: read,
            });
        }
        let mut objects = self.objects.lock().unwrap();
        objects.insert(key.to_string(), buf);

        let mut stats = self.stats.lock().unwrap();
        stats.puts += 1;
        stats.total_bytes_stored = stats.total_bytes_stored.saturating_add(size);
        Ok(())
    }

    fn get_object(&self, key: &str, writer: &mut dyn Write) -> VaultResult<()> {
        self.stats.lock().unwrap().gets += 1;
        let objects = self.objects.lock().unwrap();
        let bytes = objects
            .get(key)
            .ok_or_else(|| VaultError::ContentNotFound {
                checksum: key.to_string(),
            })?;
        writer.write_all(bytes)?;
        Ok(())
    }

    fn object_exists(&self, key: &str) -> VaultResult<bool> {
        self.stats.lock().unwrap().exists_checks += 1;
        Ok(self.objects.lock().unwrap().contains_key(key))
    }

    fn validate(&self) -> VaultResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::METADATA_DB;

    fn vault() -> RemoteVault<MockObjectStore> {
        RemoteVault::new(MockObjectStore::new(), "bt")
    }

    #[test]
    fn test_content_round_trip_with_prefix() {
        let vault = vault();
        vault.put_content("abc", &mut &b"data"[..], 4).unwrap();

        let mut out = Vec::new();
        vault.get_content("abc", &mut out).unwrap();
        assert_eq!(out, b"data");
        assert_eq!(vault.backend().keys(), vec!["bt/content/abc"]);
    }

    #[test]
    fn test_put_skips_existing_object() {
        let vault = vault();
        vault.put_content("k", &mut &b"data"[..], 4).unwrap();
        vault.put_content("k", &mut &b"data"[..], 4).unwrap();
        assert_eq!(vault.backend().stats().puts, 1);
    }

    #[test]
    fn test_idempotent_path_still_checks_size() {
        let vault = vault();
        vault.put_content("k", &mut &b"data"[..], 4).unwrap();
        assert!(matches!(
            vault.put_content("k", &mut &b"data"[..], 5),
            Err(VaultError::SizeMismatch { .. })
        ));
    }

    #[test]
    fn test_metadata_version_cycle() {
        let vault = vault();
        assert_eq!(vault.get_metadata_version("h", METADATA_DB).unwrap(), 0);

        vault
            .put_metadata("h", METADATA_DB, &mut &b"snapshot"[..], 8, 3)
            .unwrap();
        assert_eq!(vault.get_metadata_version("h", METADATA_DB).unwrap(), 3);

        let mut out = Vec::new();
        vault.get_metadata("h", METADATA_DB, &mut out).unwrap();
        assert_eq!(out, b"snapshot");
    }

    #[test]
    fn test_missing_metadata_maps_to_metadata_not_found() {
        let vault = vault();
        let mut out = Vec::new();
        assert!(matches!(
            vault.get_metadata("h", METADATA_DB, &mut out),
            Err(VaultError::MetadataNotFound { .. })
        ));
    }

    #[test]
    fn test_mock_size_mismatch() {
        let store = MockObjectStore::new();
        assert!(matches!(
            store.put_object("k", &mut &b"123"[..], 9),
            Err(VaultError::SizeMismatch { .. })
        ));
        assert_eq!(store.object_count(), 0);
    }

    #[test]
    fn test_empty_prefix() {
        let vault = RemoteVault::new(MockObjectStore::new(), "");
        vault.put_content("c", &mut &b"x"[..], 1).unwrap();
        assert_eq!(vault.backend().keys(), vec!["content/c"]);
    }
}
