//! Mount command - start the session and hold it until interrupted.

use anyhow::{Context, Result};
use clap::Args as ClapArgs;
use tracing::instrument;

use crate::commands::{build_manager, print_report};
use crate::config::AppConfig;
use crate::shutdown;

#[derive(ClapArgs, Clone, Debug)]
pub struct Args {}

#[instrument(level = "info", name = "cmd::mount", skip_all, fields(drive = %config.mount.drive_letter))]
pub fn execute(_args: &Args, config: AppConfig) -> Result<()> {
    shutdown::install_signal_handler().context("Failed to install signal handler")?;

    let manager = build_manager(config);
    let report = manager.start().context("Failed to start mount")?;
    print_report(&report);
    eprintln!("Press Ctrl+C to unmount");

    shutdown::wait_for_shutdown();

    let report = manager.stop().context("Failed to stop mount")?;
    print_report(&report);
    Ok(())
}
