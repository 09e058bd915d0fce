//! Backend strategies for exposing the bucket as a drive.
//!
//! Two mechanisms are supported and they are mutually exclusive:
//!
//! - [`BackendKind::NetworkShare`]: `rclone serve webdav` on a local port,
//!   then the OS maps a drive letter to `http://host:port`.
//! - [`BackendKind::KernelDriver`]: `rclone mount` through WinFsp, which
//!   attaches the drive letter itself.
//!
//! The manager never branches on the kind. It asks the
//! [`BackendStrategy`] for launch arguments, a readiness signal, and the
//! bind/unbind steps around the subprocess.

use std::ffi::OsString;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::drive::{DriveBinder, DriveLetter};
use crate::error::MountError;
use crate::readiness::Readiness;
use crate::settings::{Connection, MountSettings, RuntimeSettings};

/// Available backend kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BackendKind {
    /// Local WebDAV server plus an OS drive mapping
    ///
    /// Needs nothing beyond rclone itself, but Explorer's WebDAV client
    /// limits file sizes and is slower than a real filesystem driver.
    #[default]
    #[serde(rename = "webdav")]
    NetworkShare,

    /// `rclone mount` through the WinFsp kernel driver
    ///
    /// Requires WinFsp to be installed; behaves like a local disk.
    #[serde(rename = "winfsp")]
    KernelDriver,
}

impl BackendKind {
    /// Get the display name for UI presentation
    pub fn display_name(&self) -> &'static str {
        match self {
            BackendKind::NetworkShare => "WebDAV",
            BackendKind::KernelDriver => "WinFsp",
        }
    }

    /// Identifier used in `config.json`
    pub fn id(&self) -> &'static str {
        match self {
            BackendKind::NetworkShare => "webdav",
            BackendKind::KernelDriver => "winfsp",
        }
    }

    /// Get all backend kinds
    pub fn all() -> &'static [BackendKind] {
        &[BackendKind::NetworkShare, BackendKind::KernelDriver]
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for BackendKind {
    type Err = MountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            // An empty type predates the setting and always meant WebDAV
            "" | "webdav" | "network-share" => Ok(BackendKind::NetworkShare),
            "winfsp" | "kernel-driver" => Ok(BackendKind::KernelDriver),
            other => Err(MountError::InvalidBackendConfig(format!(
                "unsupported backend type {other:?} (expected \"webdav\" or \"winfsp\")"
            ))),
        }
    }
}

/// Backend-specific steps of a mount session.
pub trait BackendStrategy: Send + Sync {
    /// Which backend this is
    fn kind(&self) -> BackendKind;

    /// Drive letter the session targets
    fn drive(&self) -> &DriveLetter;

    /// rclone arguments, given the credential file and `<remote>:<bucket>`
    fn launch_args(&self, credentials: &Path, remote: &str) -> Vec<OsString>;

    /// Signal that the launched process is usable
    fn readiness(&self) -> Readiness;

    /// Step after the process is ready; returns the letter it bound, if any
    fn post_launch_bind(&self, binder: &dyn DriveBinder) -> Result<Option<DriveLetter>, MountError>;

    /// Step before the process is killed
    fn unbind_before_terminate(&self, binder: &dyn DriveBinder);
}

/// `rclone serve <protocol>` plus a drive mapping.
#[derive(Debug, Clone)]
pub struct NetworkShare {
    /// Protocol given to `rclone serve`
    pub protocol: String,
    /// Host the server listens on
    pub host: String,
    /// Port the server listens on
    pub port: u16,
    /// Drive letter mapped to the server
    pub drive: DriveLetter,
}

impl NetworkShare {
    /// `host:port` the server listens on
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// URL the drive letter is mapped to
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

impl BackendStrategy for NetworkShare {
    fn kind(&self) -> BackendKind {
        BackendKind::NetworkShare
    }

    fn drive(&self) -> &DriveLetter {
        &self.drive
    }

    fn launch_args(&self, credentials: &Path, remote: &str) -> Vec<OsString> {
        vec![
            "serve".into(),
            self.protocol.clone().into(),
            "--config".into(),
            credentials.as_os_str().to_owned(),
            "--addr".into(),
            self.listen_addr().into(),
            remote.into(),
        ]
    }

    fn readiness(&self) -> Readiness {
        Readiness::TcpConnect(self.listen_addr())
    }

    fn post_launch_bind(&self, binder: &dyn DriveBinder) -> Result<Option<DriveLetter>, MountError> {
        binder.bind(&self.drive, &self.url())?;
        Ok(Some(self.drive.clone()))
    }

    fn unbind_before_terminate(&self, binder: &dyn DriveBinder) {
        binder.unbind(&self.drive);
    }
}

/// `rclone mount` onto a drive letter through WinFsp.
#[derive(Debug, Clone)]
pub struct KernelDriver {
    /// Drive letter rclone mounts onto
    pub drive: DriveLetter,
    /// `--vfs-cache-mode` value
    pub cache_mode: String,
    /// Wait used when the mount root cannot be observed
    pub settle: Duration,
}

impl BackendStrategy for KernelDriver {
    fn kind(&self) -> BackendKind {
        BackendKind::KernelDriver
    }

    fn drive(&self) -> &DriveLetter {
        &self.drive
    }

    fn launch_args(&self, credentials: &Path, remote: &str) -> Vec<OsString> {
        vec![
            "mount".into(),
            "--config".into(),
            credentials.as_os_str().to_owned(),
            "--vfs-cache-mode".into(),
            self.cache_mode.clone().into(),
            remote.into(),
            self.drive.to_string().into(),
        ]
    }

    fn readiness(&self) -> Readiness {
        if cfg!(windows) {
            Readiness::PathExists(self.drive.root())
        } else {
            // Drive roots only exist on Windows
            Readiness::Settle(self.settle)
        }
    }

    fn post_launch_bind(&self, _binder: &dyn DriveBinder) -> Result<Option<DriveLetter>, MountError> {
        Ok(None)
    }

    fn unbind_before_terminate(&self, _binder: &dyn DriveBinder) {}
}

/// Build the strategy for `kind` from the stored settings.
pub fn strategy_for(
    kind: BackendKind,
    drive: DriveLetter,
    settings: &MountSettings,
    runtime: &RuntimeSettings,
) -> Box<dyn BackendStrategy> {
    match kind {
        BackendKind::NetworkShare => Box::new(NetworkShare {
            protocol: runtime.serve_protocol.clone(),
            host: runtime.bind_host.clone(),
            port: settings.port,
            drive,
        }),
        BackendKind::KernelDriver => Box::new(KernelDriver {
            drive,
            cache_mode: runtime.cache_mode.clone(),
            settle: runtime.kernel_driver_settle,
        }),
    }
}

/// `<remote>:<bucket>` path handed to rclone.
pub fn remote_path(remote_name: &str, connection: &Connection) -> String {
    format!("{remote_name}:{}", connection.bucket)
}
