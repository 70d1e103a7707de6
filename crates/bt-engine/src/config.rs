//! Configuration: the TOML file, environment defaults, and the tagged
//! component unions the factories build from.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Environment variable overriding the config file location.
pub const ENV_CONFIG_PATH: &str = "BT_CONFIG_PATH";
/// Environment variable overriding the data directory.
pub const ENV_HOME: &str = "BT_HOME";

/// Default staging byte budget: 1 MiB.
pub const DEFAULT_STAGING_BUDGET: u64 = 1024 * 1024;

fn default_staging_budget() -> u64 {
    DEFAULT_STAGING_BUDGET
}

/// Resolved default locations, environment variables applied.
#[derive(Debug, Clone)]
pub struct Defaults {
    /// Config file path (`BT_CONFIG_PATH`, default `~/.config/bt.toml`).
    pub config_path: PathBuf,
    /// Data directory (`BT_HOME`, default `~/.local/share/bt`).
    pub base_dir: PathBuf,
}

impl Defaults {
    /// Reads the environment and falls back to the XDG-ish defaults.
    pub fn resolve() -> EngineResult<Self> {
        let home = std::env::home_dir()
            .ok_or_else(|| EngineError::Config("cannot determine home directory".to_string()))?;
        let config_path = std::env::var_os(ENV_CONFIG_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|| home.join(".config").join("bt.toml"));
        let base_dir = std::env::var_os(ENV_HOME)
            .map(PathBuf::from)
            .unwrap_or_else(|| home.join(".local").join("share").join("bt"));
        Ok(Self {
            config_path,
            base_dir,
        })
    }
}

/// The main configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Per-host identifier, assigned at `config init`; scopes the vault's
    /// metadata slots.
    pub host_id: String,
    /// Data directory.
    pub base_dir: PathBuf,
    /// Log directory.
    pub log_dir: PathBuf,
    /// Vault backend.
    pub vault: VaultConfig,
    /// Metadata database backend.
    pub database: DatabaseConfig,
    /// Staging store backend.
    pub staging: StagingConfig,
    /// Encryptor selection and key locations.
    pub encryption: EncryptionConfig,
    /// Filesystem provider settings.
    #[serde(default)]
    pub filesystem: FilesystemConfig,
}

/// Vault backend selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VaultConfig {
    /// In-memory vault; contents die with the process.
    Memory,
    /// Local directory tree.
    Filesystem {
        /// Vault root directory.
        root: PathBuf,
    },
}

/// Metadata database backend selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DatabaseConfig {
    /// SQLite `:memory:` database.
    Memory,
    /// File-backed SQLite database at `<data_dir>/<host_id>.db`.
    Sqlite {
        /// Directory holding the database file.
        data_dir: PathBuf,
    },
}

/// Staging store backend selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StagingConfig {
    /// In-memory staging store.
    Memory {
        /// Content byte budget.
        #[serde(default = "default_staging_budget")]
        max_size: u64,
    },
    /// Durable on-disk staging store.
    Filesystem {
        /// Staging root directory.
        staging_dir: PathBuf,
        /// Content byte budget.
        #[serde(default = "default_staging_budget")]
        max_size: u64,
    },
}

impl StagingConfig {
    /// The configured content byte budget.
    pub fn max_size(&self) -> u64 {
        match self {
            StagingConfig::Memory { max_size } => *max_size,
            StagingConfig::Filesystem { max_size, .. } => *max_size,
        }
    }
}

/// Encryptor selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EncryptionConfig {
    /// age envelope encryption with on-disk key files.
    Age {
        /// Plaintext recipient file.
        public_key_path: PathBuf,
        /// Passphrase-encrypted identity file.
        private_key_path: PathBuf,
    },
    /// Header-only test encryptor; no real cryptography.
    Test,
}

/// Filesystem provider settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilesystemConfig {
    /// Ignore patterns applied to every tracked directory.
    #[serde(default)]
    pub ignore: Vec<String>,
}

impl Config {
    /// A configuration with the standard on-disk layout under `base_dir`.
    pub fn new(host_id: impl Into<String>, base_dir: impl Into<PathBuf>) -> Self {
        let host_id = host_id.into();
        let base_dir = base_dir.into();
        Self {
            log_dir: base_dir.join("log"),
            vault: VaultConfig::Filesystem {
                root: base_dir.join("vault"),
            },
            database: DatabaseConfig::Sqlite {
                data_dir: base_dir.join("db"),
            },
            staging: StagingConfig::Filesystem {
                staging_dir: base_dir.join("staging"),
                max_size: DEFAULT_STAGING_BUDGET,
            },
            encryption: EncryptionConfig::Age {
                public_key_path: base_dir.join("keys").join("bt.pub"),
                private_key_path: base_dir.join("keys").join("bt.key"),
            },
            filesystem: FilesystemConfig::default(),
            host_id,
            base_dir,
        }
    }

    /// Reads a configuration from a TOML file.
    pub fn from_file(path: &Path) -> EngineResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|err| {
            EngineError::Config(format!("cannot read {}: {err}", path.display()))
        })?;
        toml::from_str(&contents)
            .map_err(|err| EngineError::Config(format!("cannot parse {}: {err}", path.display())))
    }

    /// Renders the configuration as TOML.
    pub fn render(&self) -> EngineResult<String> {
        toml::to_string_pretty(self)
            .map_err(|err| EngineError::Config(format!("cannot render config: {err}")))
    }

    /// Writes the configuration to a TOML file, creating parent
    /// directories.
    pub fn write_to(&self, path: &Path) -> EngineResult<()> {
        let rendered = toml::to_string_pretty(self)
            .map_err(|err| EngineError::Config(format!("cannot render config: {err}")))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, rendered)?;
        Ok(())
    }

    /// Creates a new config file, refusing to overwrite an existing one.
    pub fn init(&self, path: &Path) -> EngineResult<()> {
        if path.exists() {
            return Err(EngineError::Config(format!(
                "config file already exists at {}",
                path.display()
            )));
        }
        self.write_to(path)
    }

    /// The database file path for this host, when file-backed.
    pub fn database_path(&self) -> Option<PathBuf> {
        match &self.database {
            DatabaseConfig::Sqlite { data_dir } => {
                Some(data_dir.join(format!("{}.db", self.host_id)))
            }
            DatabaseConfig::Memory => None,
        }
    }

    /// The key file pair, when real encryption is configured.
    pub fn key_paths(&self) -> Option<(PathBuf, PathBuf)> {
        match &self.encryption {
            EncryptionConfig::Age {
                public_key_path,
                private_key_path,
            } => Some((public_key_path.clone(), private_key_path.clone())),
            EncryptionConfig::Test => None,
        }
    }
}
