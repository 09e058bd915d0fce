pub mod config;
pub mod mount;
pub mod run;

use bucketdrive_mount::{MountManager, MountReport};

use crate::config::AppConfig;

/// Manager wired to real rclone processes and `net use`.
pub fn build_manager(config: AppConfig) -> MountManager {
    MountManager::with_system_defaults(config.minio, config.mount, config.runtime)
}

/// Print the outcome of a start or stop, including any warning.
pub fn print_report(report: &MountReport) {
    println!("{}", report.status);
    if let Some(warning) = &report.warning {
        if report.is_partial() {
            eprintln!("Warning: server is running but the drive is not mapped: {warning}");
        } else {
            eprintln!("Warning: {warning}");
        }
    }
}
