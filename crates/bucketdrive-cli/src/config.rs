//! Loading `config.json`.
//!
//! The file has three sections: `minio` (connection), `mount` (backend,
//! port, drive letter, auto-start) and an optional `runtime` block for
//! rclone location and timing knobs.

use std::io;
use std::path::{Path, PathBuf};

use bucketdrive_mount::{Connection, MountSettings, RuntimeSettings};
use serde::{Deserialize, Serialize};

/// File name looked up beside the executable.
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Errors while locating or parsing the configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("configuration file not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("failed to read {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid configuration in {}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("cannot determine the executable directory")]
    Locate(#[source] io::Error),
}

/// Contents of `config.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub minio: Connection,
    pub mount: MountSettings,
    #[serde(default)]
    pub runtime: RuntimeSettings,
}

impl AppConfig {
    /// Read and parse `path`, filling in per-user defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound {
                path: path.to_path_buf(),
            });
        }
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Self = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        if config.runtime.credentials_path.is_none() {
            config.runtime.credentials_path = default_credentials_path();
        }
        tracing::debug!(
            path = %path.display(),
            backend = %config.mount.backend,
            drive = %config.mount.drive_letter,
            "Loaded configuration"
        );
        Ok(config)
    }
}

/// Where the configuration lives: the explicit path, or `config.json`
/// next to the running executable.
pub fn resolve_path(explicit: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    let exe = std::env::current_exe().map_err(ConfigError::Locate)?;
    Ok(exe
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(CONFIG_FILE_NAME))
}

/// Per-user location of the generated rclone credential file.
///
/// - Windows: `%APPDATA%\bucketdrive\config\rclone.conf`
/// - macOS: `~/Library/Application Support/bucketdrive/rclone.conf`
/// - Linux: `$XDG_CONFIG_HOME/bucketdrive/rclone.conf`
pub fn default_credentials_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "bucketdrive")
        .map(|dirs| dirs.config_dir().join("rclone.conf"))
}
