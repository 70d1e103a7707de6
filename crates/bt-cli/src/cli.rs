//! Command-line surface.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Personal multi-host backup tool.
#[derive(Parser)]
#[command(name = "bt")]
#[command(about = "Content-addressed personal backup", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Configuration management.
    Config {
        #[command(subcommand)]
        cmd: ConfigCmd,
    },
    /// Tracked-directory management.
    Dir {
        #[command(subcommand)]
        cmd: DirCmd,
    },
    /// Stage files for the next backup.
    Add {
        /// File or directory to stage (default: current directory).
        path: Option<PathBuf>,
        /// Descend into subdirectories.
        #[arg(short, long)]
        recursive: bool,
    },
    /// Upload staged files to the vault and record them.
    Backup,
    /// Show the version history of one file.
    Log {
        /// The file to show history for.
        file: PathBuf,
    },
    /// Show recent backup operations.
    History {
        /// Maximum number of operations to show.
        #[arg(short, long, default_value = "20")]
        limit: u32,
    },
    /// Restore a file or a whole tracked directory.
    Restore {
        /// File or tracked-directory path.
        path: PathBuf,
        /// Restore the version with this content checksum instead of the
        /// current one.
        #[arg(long)]
        checksum: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum ConfigCmd {
    /// Generate a host id and write a fresh config file.
    Init {
        /// Also generate an encryption key pair (prompts for a passphrase).
        #[arg(long)]
        encrypt: bool,
    },
    /// Print the active configuration.
    List,
    /// Vault management.
    Vault {
        #[command(subcommand)]
        cmd: VaultCmd,
    },
}

#[derive(Subcommand)]
pub enum VaultCmd {
    /// Create and verify the vault's directory structure.
    Init,
}

#[derive(Subcommand)]
pub enum DirCmd {
    /// Track the current directory.
    Init {
        /// Encrypt this directory's content before upload.
        #[arg(long)]
        encrypted: bool,
    },
    /// Show backup status for files under the current directory.
    Status {
        /// Descend into subdirectories.
        #[arg(short, long)]
        recursive: bool,
    },
}
