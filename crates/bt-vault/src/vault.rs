//! The vault capability trait.

use std::io::{Read, Write};

use crate::error::VaultResult;

/// Metadata slot name for the uploaded database snapshot.
pub const METADATA_DB: &str = "db";
/// Metadata slot name for the plaintext public key.
pub const METADATA_PUBLIC_KEY: &str = "public_key";
/// Metadata slot name for the passphrase-encrypted private key.
pub const METADATA_PRIVATE_KEY: &str = "private_key";
/// Key slots are immutable after setup and always carry this version.
pub const KEY_METADATA_VERSION: i64 = 1;

/// Content-addressed object store plus versioned named-metadata slots per
/// host.
///
/// All I/O is streaming with explicit expected byte counts; a put whose
/// reader yields more or fewer bytes than declared fails with
/// [`crate::VaultError::SizeMismatch`]. Content puts are idempotent: the
/// key is the checksum of the bytes, so a second put stores nothing new.
pub trait Vault: Send + Sync {
    /// Stores `size` bytes from `reader` under `checksum`.
    ///
    /// Writers must be atomic: a concurrent reader observes either the
    /// absent object or the final bytes, never a partial write.
    fn put_content(&self, checksum: &str, reader: &mut dyn Read, size: u64) -> VaultResult<()>;

    /// Streams the bytes stored under `checksum` into `writer`.
    fn get_content(&self, checksum: &str, writer: &mut dyn Write) -> VaultResult<()>;

    /// Stores a host-scoped named metadata slot and its version. Last write
    /// wins on the bytes; the version is stored alongside.
    fn put_metadata(
        &self,
        host_id: &str,
        name: &str,
        reader: &mut dyn Read,
        size: u64,
        version: i64,
    ) -> VaultResult<()>;

    /// Streams a metadata slot into `writer`.
    fn get_metadata(&self, host_id: &str, name: &str, writer: &mut dyn Write) -> VaultResult<()>;

    /// The stored version for a metadata slot; 0 when the slot is absent.
    fn get_metadata_version(&self, host_id: &str, name: &str) -> VaultResult<i64>;

    /// Verifies the backing store is reachable and correctly structured.
    fn validate_setup(&self) -> VaultResult<()>;
}
