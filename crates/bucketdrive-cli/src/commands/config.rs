//! Config command - validate and show the effective settings.

use std::path::Path;

use anyhow::{Context, Result};
use bucketdrive_mount::BackendKind;
use clap::Args as ClapArgs;
use comfy_table::{Table, presets::UTF8_FULL_CONDENSED};

use crate::config::AppConfig;

const REDACTED: &str = "********";

#[derive(ClapArgs, Clone, Debug)]
pub struct Args {
    /// Output as JSON (secret key redacted)
    #[arg(long)]
    pub json: bool,
}

pub fn execute(args: &Args, config: &AppConfig, path: &Path) -> Result<()> {
    let (kind, drive) = config
        .mount
        .validate()
        .with_context(|| format!("Invalid mount settings in {}", path.display()))?;

    if args.json {
        let mut redacted = config.clone();
        redacted.minio.secret_key = REDACTED.to_string();
        println!("{}", serde_json::to_string_pretty(&redacted)?);
        return Ok(());
    }

    let runtime = &config.runtime;
    let credentials = runtime.credentials_file();

    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_header(vec!["Setting", "Value"]);
    table.add_row(vec!["Config file", &path.display().to_string()]);
    table.add_row(vec![
        "Endpoint",
        &format!("{}://{}", config.minio.scheme(), config.minio.bare_endpoint()),
    ]);
    table.add_row(vec!["Access key", &config.minio.access_key]);
    table.add_row(vec!["Secret key", REDACTED]);
    table.add_row(vec!["Bucket", &config.minio.bucket]);
    table.add_row(vec!["Backend", kind.display_name()]);
    table.add_row(vec!["Drive", drive.as_str()]);
    if kind == BackendKind::NetworkShare {
        table.add_row(vec![
            "Listen address",
            &format!("{}:{}", runtime.bind_host, config.mount.port),
        ]);
    }
    table.add_row(vec!["Auto start", if config.mount.auto_start { "yes" } else { "no" }]);
    table.add_row(vec!["rclone", &runtime.rclone_program().display().to_string()]);
    table.add_row(vec!["Credential file", &credentials.display().to_string()]);
    table.add_row(vec![
        "Readiness timeout",
        &format!("{:?}", runtime.readiness_timeout),
    ]);
    println!("{table}");
    Ok(())
}
