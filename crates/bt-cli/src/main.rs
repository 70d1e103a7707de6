//! bt entry point: parse the command line, point logging at the log file,
//! run the command, exit non-zero with a single-line error on failure.

mod cli;
mod commands;

use std::fs::OpenOptions;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn main() {
    let cli = cli::Cli::parse();
    init_logging();

    if let Err(err) = commands::run(cli.command) {
        eprintln!("bt: {err:#}");
        std::process::exit(1);
    }
}

/// Logs go to `$log_dir/bt.log` when the config is readable, otherwise to
/// stderr. `RUST_LOG` filters either way.
fn init_logging() {
    let log_file = bt_engine::Defaults::resolve()
        .ok()
        .and_then(|defaults| bt_engine::Config::from_file(&defaults.config_path).ok())
        .and_then(|config| {
            std::fs::create_dir_all(&config.log_dir).ok()?;
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(config.log_dir.join("bt.log"))
                .ok()
        });

    let filter = EnvFilter::from_default_env();
    match log_file {
        Some(file) => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_ansi(false).with_writer(Arc::new(file)))
                .with(filter)
                .init();
        }
        None => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(std::io::stderr))
                .with(filter)
                .init();
        }
    }
}
