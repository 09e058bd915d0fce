//! Run command - long-lived session driven by console commands.
//!
//! Stands in for the tray menu: the mount is auto-started when the
//! configuration asks for it, then `start`, `stop`, `status` and `quit`
//! lines on stdin drive the manager. EOF and termination signals behave
//! like `quit`. The mount is always stopped before returning.

use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::time::Duration;

use anyhow::{Context, Result};
use bucketdrive_mount::MountManager;
use clap::Args as ClapArgs;
use tracing::{info, instrument, warn};

use crate::commands::{build_manager, print_report};
use crate::config::AppConfig;
use crate::shutdown;

/// How often the loop checks for a termination signal while idle.
const SIGNAL_POLL: Duration = Duration::from_millis(200);

#[derive(ClapArgs, Clone, Debug)]
pub struct Args {
    /// Also write logs to daily-rotated files in this directory
    #[arg(long, value_name = "DIR", env = "BUCKETDRIVE_LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    /// Do not auto-start even if the configuration enables it
    #[arg(long)]
    pub no_auto_start: bool,
}

/// A line typed on the console.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ConsoleCommand {
    Start,
    Stop,
    Status,
    Quit,
    Unknown(String),
}

impl ConsoleCommand {
    /// Parse one line; blank lines yield nothing.
    fn parse(line: &str) -> Option<Self> {
        let word = line.trim();
        if word.is_empty() {
            return None;
        }
        Some(match word.to_ascii_lowercase().as_str() {
            "start" | "mount" => Self::Start,
            "stop" | "unmount" => Self::Stop,
            "status" => Self::Status,
            "quit" | "exit" => Self::Quit,
            _ => Self::Unknown(word.to_string()),
        })
    }
}

/// Forward parsed lines until EOF, a read error or the receiver going away.
fn read_console(reader: impl BufRead, tx: &Sender<ConsoleCommand>) {
    for line in reader.lines() {
        let Ok(line) = line else { break };
        if let Some(cmd) = ConsoleCommand::parse(&line)
            && tx.send(cmd).is_err()
        {
            break;
        }
    }
}

#[instrument(level = "info", name = "cmd::run", skip_all)]
pub fn execute(args: &Args, config: AppConfig) -> Result<()> {
    shutdown::install_signal_handler().context("Failed to install signal handler")?;

    let manager = build_manager(config);
    if manager.settings().auto_start && !args.no_auto_start {
        info!("Auto-start enabled");
        dispatch(&manager, &ConsoleCommand::Start);
    } else {
        println!("{}", manager.describe());
    }

    let (tx, rx) = mpsc::channel();
    std::thread::Builder::new()
        .name("console".to_string())
        .spawn(move || read_console(io::stdin().lock(), &tx))
        .context("Failed to start console reader")?;
    eprintln!("Commands: start, stop, status, quit");

    while !shutdown::shutdown_requested() {
        match rx.recv_timeout(SIGNAL_POLL) {
            Ok(ConsoleCommand::Quit) | Err(RecvTimeoutError::Disconnected) => break,
            Ok(cmd) => dispatch(&manager, &cmd),
            Err(RecvTimeoutError::Timeout) => {}
        }
    }

    info!("Leaving, stopping mount");
    let report = manager.stop().context("Failed to stop mount")?;
    print_report(&report);
    Ok(())
}

fn dispatch(manager: &MountManager, cmd: &ConsoleCommand) {
    match cmd {
        ConsoleCommand::Start => match manager.start() {
            Ok(report) => print_report(&report),
            Err(e) => {
                warn!(error = %e, "Start failed");
                eprintln!("Start failed: {e}");
            }
        },
        ConsoleCommand::Stop => match manager.stop() {
            Ok(report) => print_report(&report),
            Err(e) => eprintln!("Stop failed: {e}"),
        },
        ConsoleCommand::Status => {
            let status = manager.describe();
            match status.pid {
                Some(pid) => println!("{status} [pid {pid}]"),
                None => println!("{status}"),
            }
        }
        ConsoleCommand::Quit => {}
        ConsoleCommand::Unknown(word) => {
            eprintln!("Unknown command {word:?} (expected start, stop, status or quit)");
        }
    }
}
