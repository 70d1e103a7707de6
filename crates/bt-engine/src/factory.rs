//! Component factories: concrete backends from the tagged config unions.
//!
//! A remote object-store vault is wired programmatically through
//! [`bt_vault::RemoteVault`] with whatever SDK client the deployment
//! provides; the configuration file selects between the backends that need
//! no external client.

use std::sync::Arc;

use bt_crypto::{AgeEncryptor, Encryptor, TestEncryptor};
use bt_fs::{Filesystem, LocalFilesystem};
use bt_meta::{Clock, IdGenerator, MetadataStore, SqliteStore};
use bt_staging::{FilesystemStagingStore, MemoryStagingStore, StagingArea, StagingStore};
use bt_vault::{FilesystemVault, MemoryVault, Vault};

use crate::config::{Config, DatabaseConfig, EncryptionConfig, StagingConfig, VaultConfig};
use crate::error::EngineResult;

/// Builds the filesystem provider with the configured ignore patterns.
pub fn build_filesystem(config: &Config) -> Arc<dyn Filesystem> {
    Arc::new(LocalFilesystem::new(config.filesystem.ignore.clone()))
}

/// Builds the configured vault backend.
pub fn build_vault(config: &Config) -> EngineResult<Arc<dyn Vault>> {
    Ok(match &config.vault {
        VaultConfig::Memory => Arc::new(MemoryVault::new()),
        VaultConfig::Filesystem { root } => Arc::new(FilesystemVault::new(root.clone())?),
    })
}

/// Builds the configured metadata store.
pub fn build_metadata(
    config: &Config,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
) -> EngineResult<Arc<dyn MetadataStore>> {
    Ok(match &config.database {
        DatabaseConfig::Memory => Arc::new(SqliteStore::open_in_memory(clock, ids)?),
        DatabaseConfig::Sqlite { data_dir } => {
            let path = data_dir.join(format!("{}.db", config.host_id));
            Arc::new(SqliteStore::open(&path, clock, ids)?)
        }
    })
}

/// Builds the configured staging area.
pub fn build_staging(config: &Config, fs: Arc<dyn Filesystem>) -> EngineResult<Arc<StagingArea>> {
    let store: Box<dyn StagingStore> = match &config.staging {
        StagingConfig::Memory { .. } => Box::new(MemoryStagingStore::new()),
        StagingConfig::Filesystem { staging_dir, .. } => {
            Box::new(FilesystemStagingStore::open(staging_dir)?)
        }
    };
    Ok(Arc::new(StagingArea::new(
        fs,
        store,
        config.staging.max_size(),
    )))
}

/// Builds the configured encryptor.
pub fn build_encryptor(config: &Config) -> Arc<dyn Encryptor> {
    match &config.encryption {
        EncryptionConfig::Age {
            public_key_path,
            private_key_path,
        } => Arc::new(AgeEncryptor::new(
            public_key_path.clone(),
            private_key_path.clone(),
        )),
        EncryptionConfig::Test => Arc::new(TestEncryptor::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bt_meta::{FixedClock, SequentialIdGenerator};
    use chrono::{DateTime, Utc};

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-06-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_build_full_filesystem_stack() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config::new("host-1", tmp.path());

        let fs = build_filesystem(&config);
        let vault = build_vault(&config).unwrap();
        let meta = build_metadata(
            &config,
            Arc::new(FixedClock::new(t0())),
            Arc::new(SequentialIdGenerator::new()),
        )
        .unwrap();
        let staging = build_staging(&config, fs).unwrap();
        let encryptor = build_encryptor(&config);

        vault.validate_setup().unwrap();
        meta.check_migrations().unwrap();
        assert_eq!(staging.count().unwrap(), 0);
        assert!(!encryptor.is_configured());
        assert!(tmp.path().join("vault/content").is_dir());
        assert!(tmp.path().join("db/host-1.db").is_file());
        assert!(tmp.path().join("staging/content").is_dir());
    }

    #[test]
    fn test_build_memory_stack() {
        let mut config = Config::new("host-1", "/nonexistent");
        config.vault = crate::config::VaultConfig::Memory;
        config.database = crate::config::DatabaseConfig::Memory;
        config.staging = crate::config::StagingConfig::Memory { max_size: 1024 };
        config.encryption = crate::config::EncryptionConfig::Test;

        let fs = build_filesystem(&config);
        build_vault(&config).unwrap().validate_setup().unwrap();
        build_metadata(
            &config,
            Arc::new(FixedClock::new(t0())),
            Arc::new(SequentialIdGenerator::new()),
        )
        .unwrap();
        build_staging(&config, fs).unwrap();
        assert!(build_encryptor(&config).is_configured());
    }
}
