#![warn(missing_docs)]

//! bt vault subsystem: content-addressed object storage plus versioned
//! per-host metadata slots.
//!
//! Content is keyed by the lowercase-hex SHA-256 of its bytes, which makes
//! puts idempotent and gives cross-host deduplication for free. Metadata
//! slots carry the uploaded database snapshot and key files together with an
//! integer version used by the operation envelope to fence stale writers.

pub mod error;
pub mod filesystem;
pub mod memory;
pub mod remote;
pub mod vault;

pub use error::{VaultError, VaultResult};
pub use filesystem::FilesystemVault;
pub use memory::MemoryVault;
pub use remote::{MockObjectStore, MockObjectStoreStats, ObjectStoreBackend, RemoteVault};
pub use vault::{Vault, KEY_METADATA_VERSION, METADATA_DB, METADATA_PRIVATE_KEY, METADATA_PUBLIC_KEY};
