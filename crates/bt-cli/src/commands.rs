//! Command execution: wiring configuration, components, and the operation
//! envelope around the service calls.

use std::io::Write as _;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use bt_crypto::Encryptor;
use bt_engine::{
    factory, BackupService, Config, Defaults, EngineError, Envelope, OperationRecorder,
};
use bt_meta::{Clock, IdGenerator, MetadataStore, OperationStatus, SystemClock, UuidGenerator};
use bt_vault::Vault;
use tracing::error;
use uuid::Uuid;

use crate::cli::{Command, ConfigCmd, DirCmd, VaultCmd};

pub fn run(command: Command) -> Result<()> {
    match command {
        Command::Config { cmd } => run_config(cmd),
        Command::Dir {
            cmd: DirCmd::Init { encrypted },
        } => {
            let cwd = std::env::current_dir()?;
            let parameters = cwd.to_string_lossy().into_owned();
            with_envelope("dir init", &parameters, |service| {
                let directory = service.add_directory(&cwd, encrypted)?;
                println!("tracking {}", directory.path);
                Ok(())
            })
        }
        Command::Dir {
            cmd: DirCmd::Status { recursive },
        } => with_service(|service| {
            let cwd = std::env::current_dir()?;
            for status in service.get_status(&cwd, recursive)? {
                let mut flags = String::new();
                flags.push(if status.is_backed_up { 'B' } else { '-' });
                flags.push(if status.is_staged { 'S' } else { '-' });
                flags.push(if status.is_modified_since { 'M' } else { '-' });
                println!("{flags} {}", status.relative_path);
            }
            Ok(())
        }),
        Command::Add { path, recursive } => with_service(|service| {
            let path = match path {
                Some(path) => path,
                None => std::env::current_dir()?,
            };
            let staged = service.stage_files(&path, recursive)?;
            println!("staged {staged} file(s)");
            Ok(())
        }),
        Command::Backup => with_envelope("backup", "", |service| {
            let committed = service.backup_all()?;
            println!("backed up {committed} file(s)");
            Ok(())
        }),
        Command::Log { file } => with_service(|service| {
            for entry in service.get_file_history(&file)? {
                println!(
                    "{} {} {:>10} bytes modified {}{}",
                    entry.backed_up_at.format("%Y-%m-%d %H:%M:%S"),
                    &entry.checksum[..12],
                    entry.size,
                    entry.modified_at.format("%Y-%m-%d %H:%M:%S"),
                    if entry.is_current { " (current)" } else { "" },
                );
            }
            Ok(())
        }),
        Command::History { limit } => with_service(|service| {
            for op in service.get_history(limit)? {
                println!(
                    "#{} {} {} {} {}",
                    op.id,
                    op.started_at.format("%Y-%m-%d %H:%M:%S"),
                    op.status,
                    op.operation,
                    op.parameters,
                );
            }
            Ok(())
        }),
        Command::Restore { path, checksum } => run_restore(&path, checksum.as_deref()),
    }
}

fn run_config(cmd: ConfigCmd) -> Result<()> {
    let defaults = Defaults::resolve()?;
    match cmd {
        ConfigCmd::Init { encrypt } => {
            let host_id = Uuid::new_v4().to_string();
            let config = Config::new(host_id.clone(), defaults.base_dir.clone());
            config.init(&defaults.config_path)?;
            println!(
                "initialised host {host_id}; config at {}",
                defaults.config_path.display()
            );

            if encrypt {
                let passphrase = prompt_new_passphrase()?;
                factory::build_encryptor(&config).setup(&passphrase)?;
                println!("encryption keys generated");
            }
            Ok(())
        }
        ConfigCmd::List => {
            let config = load_config(&defaults)?;
            print!("{}", config.render()?);
            Ok(())
        }
        ConfigCmd::Vault { cmd: VaultCmd::Init } => {
            let config = load_config(&defaults)?;
            factory::build_vault(&config)?.validate_setup()?;
            println!("vault ready");
            Ok(())
        }
    }
}

struct Stack {
    service: BackupService,
    meta: Arc<dyn MetadataStore>,
    vault: Arc<dyn Vault>,
    encryptor: Arc<dyn Encryptor>,
    recorder: Arc<OperationRecorder>,
}

fn build_stack(config: &Config, operation: &str, parameters: &str) -> Result<Stack> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let ids: Arc<dyn IdGenerator> = Arc::new(UuidGenerator);
    let fs = factory::build_filesystem(config);
    let vault = factory::build_vault(config)?;
    let meta = factory::build_metadata(config, clock.clone(), ids.clone())?;
    let staging = factory::build_staging(config, fs.clone())?;
    let encryptor = factory::build_encryptor(config);
    let recorder = Arc::new(OperationRecorder::new(operation, parameters));
    let service = BackupService::new(
        fs,
        meta.clone(),
        staging,
        vault.clone(),
        encryptor.clone(),
        clock,
        ids,
        recorder.clone(),
    );
    Ok(Stack {
        service,
        meta,
        vault,
        encryptor,
        recorder,
    })
}

/// Runs a non-mutating command: no envelope, no version fence, close on the
/// way out.
fn with_service(f: impl FnOnce(&BackupService) -> Result<()>) -> Result<()> {
    let defaults = Defaults::resolve()?;
    let config = load_config(&defaults)?;
    let stack = build_stack(&config, "", "")?;
    let result = f(&stack.service);
    stack.meta.close()?;
    result
}

/// Runs a mutating command inside the operation envelope.
fn with_envelope(
    operation: &str,
    parameters: &str,
    f: impl FnOnce(&BackupService) -> Result<()>,
) -> Result<()> {
    let defaults = Defaults::resolve()?;
    let config = load_config(&defaults)?;
    let stack = build_stack(&config, operation, parameters)?;

    let envelope = Envelope::open(
        config.host_id.clone(),
        stack.meta.clone(),
        stack.vault.clone(),
        stack.encryptor.clone(),
        stack.recorder.clone(),
        config.key_paths(),
    )?;

    let result = f(&stack.service);
    let status = if result.is_ok() {
        OperationStatus::Success
    } else {
        OperationStatus::Error
    };
    match envelope.close(status) {
        Ok(()) => result,
        Err(close_err) => {
            error!(error = %close_err, "envelope close failed");
            result.and(Err(close_err.into()))
        }
    }
}

fn run_restore(path: &Path, checksum: Option<&str>) -> Result<()> {
    let defaults = Defaults::resolve()?;
    let config = load_config(&defaults)?;
    let stack = build_stack(&config, "restore", "")?;

    // Prompt up front when the target lives in an encrypted directory.
    let absolute = std::path::absolute(path)?;
    let path_text = absolute.to_string_lossy();
    let encrypted = match stack.meta.find_directory_by_path(&path_text)? {
        Some(directory) => directory.encrypted,
        None => stack
            .meta
            .search_directory_for_path(&path_text)?
            .map(|d| d.encrypted)
            .unwrap_or(false),
    };
    let decrypt_ctx = if encrypted {
        let passphrase = prompt_passphrase("passphrase: ")?;
        Some(stack.encryptor.unlock(&passphrase)?)
    } else {
        None
    };

    let result = stack
        .service
        .restore(path, checksum, decrypt_ctx.as_deref())
        .map(|outputs| {
            for output in &outputs {
                println!("{}", output.display());
            }
        })
        .map_err(Into::into);
    stack.meta.close()?;
    result
}

fn load_config(defaults: &Defaults) -> Result<Config> {
    Config::from_file(&defaults.config_path).map_err(|err| match err {
        EngineError::Config(msg) => anyhow!("{msg} (run `bt config init` first)"),
        other => other.into(),
    })
}

fn prompt_passphrase(prompt: &str) -> Result<String> {
    eprint!("{prompt}");
    std::io::stderr().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    let passphrase = line.trim_end_matches(['\n', '\r']).to_string();
    if passphrase.is_empty() {
        bail!("empty passphrase");
    }
    Ok(passphrase)
}

fn prompt_new_passphrase() -> Result<String> {
    let first = prompt_passphrase("new passphrase: ")?;
    let second = prompt_passphrase("repeat passphrase: ")?;
    if first != second {
        bail!("passphrases do not match");
    }
    Ok(first)
}
