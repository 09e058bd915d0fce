//! Connection and mount settings consumed by the manager.
//!
//! These mirror the `minio`, `mount` and `runtime` sections of the
//! application's `config.json`. The manager only ever reads them.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backend::BackendKind;
use crate::drive::DriveLetter;
use crate::error::MountError;

/// Default rclone remote name written into the credential file.
pub const DEFAULT_REMOTE_NAME: &str = "minio";

/// Default timeout for a launched subprocess to become ready.
pub const DEFAULT_READINESS_TIMEOUT: Duration = Duration::from_secs(10);

/// Default interval between readiness probes.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Default time a subprocess must keep running after its readiness signal.
pub const DEFAULT_STARTUP_GRACE: Duration = Duration::from_millis(500);

/// Connection details for the object-storage endpoint.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Connection {
    /// `host:port`, optionally prefixed with `http://` or `https://`
    pub endpoint: String,
    /// S3 access key id
    pub access_key: String,
    /// S3 secret access key
    pub secret_key: String,
    /// Bucket exposed as the drive root
    pub bucket: String,
    /// Use HTTPS towards the endpoint
    #[serde(default)]
    pub use_ssl: bool,
}

impl Connection {
    /// Scheme matching the transport-security flag.
    pub fn scheme(&self) -> &'static str {
        if self.use_ssl { "https" } else { "http" }
    }

    /// Endpoint with any scheme prefix and trailing slash removed.
    pub fn bare_endpoint(&self) -> &str {
        let endpoint = self.endpoint.trim();
        let endpoint = endpoint
            .strip_prefix("http://")
            .or_else(|| endpoint.strip_prefix("https://"))
            .unwrap_or(endpoint);
        endpoint.trim_end_matches('/')
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("endpoint", &self.endpoint)
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("bucket", &self.bucket)
            .field("use_ssl", &self.use_ssl)
            .finish()
    }
}

/// How and where the bucket should be mounted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountSettings {
    /// Backend identifier: `"webdav"` (or empty) or `"winfsp"`
    #[serde(rename = "type", default)]
    pub backend: String,
    /// Local port for the network-share server
    #[serde(default = "default_port")]
    pub port: u16,
    /// Target drive letter, with or without the trailing colon
    #[serde(default)]
    pub drive_letter: String,
    /// Start the mount as soon as the application launches
    #[serde(default)]
    pub auto_start: bool,
}

fn default_port() -> u16 {
    8080
}

impl Default for MountSettings {
    fn default() -> Self {
        Self {
            backend: String::new(),
            port: default_port(),
            drive_letter: "Z".to_string(),
            auto_start: false,
        }
    }
}

impl MountSettings {
    /// Parse the configured backend kind.
    pub fn backend_kind(&self) -> Result<BackendKind, MountError> {
        self.backend.parse()
    }

    /// Parse and normalize the configured drive letter.
    pub fn drive(&self) -> Result<DriveLetter, MountError> {
        self.drive_letter
            .parse()
            .map_err(|e| MountError::InvalidBackendConfig(format!("{e}")))
    }

    /// Check everything Start needs before anything is touched on disk.
    pub fn validate(&self) -> Result<(BackendKind, DriveLetter), MountError> {
        let kind = self.backend_kind()?;
        let drive = self.drive()?;
        if kind == BackendKind::NetworkShare && self.port == 0 {
            return Err(MountError::InvalidBackendConfig(
                "network-share backend needs a non-zero port".to_string(),
            ));
        }
        Ok((kind, drive))
    }
}

/// Knobs for how rclone is located, invoked and watched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    /// rclone executable; defaults to `rclone(.exe)` next to the running binary
    pub rclone_path: Option<PathBuf>,
    /// Where the credential file is written; defaults to `rclone.conf` beside rclone
    pub credentials_path: Option<PathBuf>,
    /// Section name of the remote inside the credential file
    pub remote_name: String,
    /// Protocol passed to `rclone serve`
    pub serve_protocol: String,
    /// Host the network-share server listens on and the drive maps to
    pub bind_host: String,
    /// `--vfs-cache-mode` for the kernel-driver backend
    pub cache_mode: String,
    /// Upper bound on waiting for the subprocess to become ready
    #[serde(with = "humantime_serde")]
    pub readiness_timeout: Duration,
    /// Interval between readiness probes
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// How long the subprocess must stay alive after its readiness signal
    ///
    /// Catches a server that dies on a port some other program already holds.
    #[serde(with = "humantime_serde")]
    pub startup_grace: Duration,
    /// Fixed wait used when the kernel-driver mount cannot be observed
    #[serde(with = "humantime_serde")]
    pub kernel_driver_settle: Duration,
    /// Kill any process named like rclone before launching
    pub reap_by_name: bool,
    /// Forward rclone's stdout/stderr into the log instead of discarding it
    pub capture_output: bool,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            rclone_path: None,
            credentials_path: None,
            remote_name: DEFAULT_REMOTE_NAME.to_string(),
            serve_protocol: "webdav".to_string(),
            bind_host: "localhost".to_string(),
            cache_mode: "full".to_string(),
            readiness_timeout: DEFAULT_READINESS_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            startup_grace: DEFAULT_STARTUP_GRACE,
            kernel_driver_settle: Duration::from_secs(2),
            reap_by_name: true,
            capture_output: true,
        }
    }
}

impl RuntimeSettings {
    /// Executable file name of rclone on this platform.
    pub fn rclone_file_name() -> &'static str {
        if cfg!(windows) { "rclone.exe" } else { "rclone" }
    }

    /// Resolved rclone executable path.
    pub fn rclone_program(&self) -> PathBuf {
        if let Some(path) = &self.rclone_path {
            return path.clone();
        }
        match std::env::current_exe() {
            Ok(exe) => exe
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join(Self::rclone_file_name()),
            // Fall back to a PATH lookup
            Err(_) => PathBuf::from(Self::rclone_file_name()),
        }
    }

    /// Resolved credential file path.
    pub fn credentials_file(&self) -> PathBuf {
        if let Some(path) = &self.credentials_path {
            return path.clone();
        }
        self.rclone_program()
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join("rclone.conf")
    }

    /// Process name used for stale-process reaping.
    pub fn process_name(&self) -> String {
        self.rclone_program()
            .file_name()
            .map_or_else(
                || Self::rclone_file_name().to_string(),
                |n| n.to_string_lossy().into_owned(),
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_endpoint_strips_scheme_and_slash() {
        let mut conn = Connection {
            endpoint: "http://minio.local:9000/".to_string(),
            ..Default::default()
        };
        assert_eq!(conn.bare_endpoint(), "minio.local:9000");

        conn.endpoint = "https://minio.local:9000".to_string();
        assert_eq!(conn.bare_endpoint(), "minio.local:9000");

        conn.endpoint = "minio.local:9000".to_string();
        assert_eq!(conn.bare_endpoint(), "minio.local:9000");
    }

    #[test]
    fn debug_redacts_secret() {
        let conn = Connection {
            secret_key: "hunter2".to_string(),
            ..Default::default()
        };
        let rendered = format!("{conn:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn mount_settings_from_json() {
        let json = r#"{"type": "winfsp", "port": 5000, "drive_letter": "y", "auto_start": true}"#;
        let settings: MountSettings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.backend_kind().unwrap(), BackendKind::KernelDriver);
        assert_eq!(settings.drive().unwrap().as_str(), "Y:");
        assert!(settings.auto_start);
    }

    #[test]
    fn empty_type_means_network_share() {
        let settings: MountSettings = serde_json::from_str(r#"{"drive_letter": "Z"}"#).unwrap();
        assert_eq!(settings.backend_kind().unwrap(), BackendKind::NetworkShare);
        assert_eq!(settings.port, 8080);
    }

    #[test]
    fn validate_rejects_unknown_backend_and_zero_port() {
        let mut settings = MountSettings {
            backend: "smb".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(MountError::InvalidBackendConfig(_))
        ));

        settings.backend = "webdav".to_string();
        settings.port = 0;
        assert!(matches!(
            settings.validate(),
            Err(MountError::InvalidBackendConfig(_))
        ));

        // Port is irrelevant to the kernel-driver backend
        settings.backend = "winfsp".to_string();
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn runtime_durations_use_humantime() {
        let json = r#"{"readiness_timeout": "3s", "poll_interval": "50ms", "startup_grace": "1s"}"#;
        let runtime: RuntimeSettings = serde_json::from_str(json).unwrap();
        assert_eq!(runtime.readiness_timeout, Duration::from_secs(3));
        assert_eq!(runtime.poll_interval, Duration::from_millis(50));
        assert_eq!(runtime.startup_grace, Duration::from_secs(1));
        assert_eq!(runtime.remote_name, DEFAULT_REMOTE_NAME);
        assert!(runtime.reap_by_name);
    }

    #[test]
    fn credentials_file_defaults_beside_rclone() {
        let runtime = RuntimeSettings {
            rclone_path: Some(PathBuf::from("/opt/tools/rclone")),
            ..Default::default()
        };
        assert_eq!(runtime.credentials_file(), PathBuf::from("/opt/tools/rclone.conf"));
        assert_eq!(runtime.process_name(), "rclone");
    }
}
