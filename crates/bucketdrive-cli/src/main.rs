#![deny(unsafe_code)]

mod commands;
mod config;
mod exit_code;
mod shutdown;

use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use bucketdrive_mount::MountError;

use crate::commands::{config as config_cmd, mount, run};
use crate::config::{AppConfig, ConfigError};

/// Mount an S3-compatible bucket as a local drive through rclone
#[derive(Parser)]
#[command(name = "bucketdrive", version, about, long_about = None)]
struct Cli {
    /// Increase verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Path to config.json (default: next to the executable)
    #[arg(long, global = true, env = "BUCKETDRIVE_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a session driven by console commands (start, stop, status, quit)
    Run(run::Args),

    /// Mount the bucket and keep it mounted until Ctrl+C
    Mount(mount::Args),

    /// Validate and show the effective configuration
    Config(config_cmd::Args),
}

fn main() -> ExitCode {
    match try_main() {
        Ok(()) => ExitCode::from(exit_code::SUCCESS),
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(categorize_error(&e))
        }
    }
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();

    let log_dir = match &cli.command {
        Commands::Run(args) => args.log_dir.as_deref(),
        _ => None,
    };
    let _log_guard = setup_tracing(cli.verbose, log_dir)?;

    let path = config::resolve_path(cli.config.as_deref())?;
    let config = AppConfig::load(&path)?;

    match cli.command {
        Commands::Run(args) => run::execute(&args, config),
        Commands::Mount(args) => mount::execute(&args, config),
        Commands::Config(args) => config_cmd::execute(&args, &config, &path),
    }
}

/// Set up tracing: stderr at the `-v` level, plus daily-rotated files when
/// `log_dir` is given.
///
/// The returned guard flushes the file writer and must outlive all logging.
fn setup_tracing(verbose: u8, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    use tracing_appender::rolling::{RollingFileAppender, Rotation};

    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = |default: &str| {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
    };

    let stderr_layer = fmt::layer().with_writer(io::stderr).with_filter(filter(level));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;
            let appender = RollingFileAppender::new(Rotation::DAILY, dir, "bucketdrive.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            // Files always get at least info, whatever the console shows
            let file_level = if verbose == 0 { "info" } else { level };
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(filter(file_level));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .init();
    Ok(guard)
}

/// Map an error to an exit code by looking for typed causes in the chain.
fn categorize_error(e: &anyhow::Error) -> u8 {
    for cause in e.chain() {
        if cause.downcast_ref::<ConfigError>().is_some() {
            return exit_code::CONFIG_ERROR;
        }
        if let Some(mount_err) = cause.downcast_ref::<MountError>() {
            return match mount_err {
                MountError::InvalidBackendConfig(_) => exit_code::CONFIG_ERROR,
                _ => exit_code::MOUNT_FAILED,
            };
        }
    }
    exit_code::GENERAL_ERROR
}
