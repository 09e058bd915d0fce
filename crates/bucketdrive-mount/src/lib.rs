//! Mount lifecycle manager that exposes an S3 bucket as a local drive.
//!
//! The heavy lifting is done by an external rclone process; this crate
//! decides how to launch it, when it counts as ready, how the drive letter
//! gets attached and how everything is torn down again.
//!
//! # Components
//!
//! - [`credentials`] - renders the connection into rclone's config file
//! - [`Supervisor`] / [`ProcessSupervisor`] - launches and kills rclone
//! - [`DriveBinder`] / [`NetUseBinder`] - maps a drive letter to the local
//!   WebDAV server
//! - [`BackendStrategy`] - the network-share and kernel-driver variants
//! - [`MountManager`] - the start/stop/describe state machine
//!
//! # Backends
//!
//! | Backend | rclone command | Drive letter |
//! |---------|----------------|--------------|
//! | WebDAV (network share) | `serve webdav --addr host:port` | `net use X: http://host:port` |
//! | WinFsp (kernel driver) | `mount --vfs-cache-mode full` | attached by rclone |
//!
//! # Example
//!
//! ```no_run
//! use bucketdrive_mount::{Connection, MountManager, MountSettings, RuntimeSettings};
//!
//! let connection = Connection {
//!     endpoint: "minio.local:9000".to_string(),
//!     access_key: "access".to_string(),
//!     secret_key: "secret".to_string(),
//!     bucket: "photos".to_string(),
//!     use_ssl: false,
//! };
//! let settings = MountSettings {
//!     backend: "webdav".to_string(),
//!     port: 5000,
//!     drive_letter: "Z".to_string(),
//!     auto_start: false,
//! };
//!
//! let manager = MountManager::with_system_defaults(connection, settings, RuntimeSettings::default());
//! let report = manager.start()?;
//! if let Some(warning) = &report.warning {
//!     eprintln!("Mounted with problems: {warning}");
//! }
//! println!("{}", manager.describe());
//! manager.stop()?;
//! # Ok::<(), bucketdrive_mount::MountError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod backend;
pub mod credentials;
mod drive;
mod error;
mod manager;
pub mod readiness;
mod settings;
mod supervisor;

pub mod testing;

pub use backend::{
    remote_path, strategy_for, BackendKind, BackendStrategy, KernelDriver, NetworkShare,
};
pub use drive::{bind_args, unbind_args, DriveBinder, DriveLetter, DriveLetterError, NetUseBinder};
pub use error::MountError;
pub use manager::{MountManager, MountReport, MountStatus, Phase};
pub use readiness::{await_ready, Readiness, ReadinessPolicy};
pub use settings::{
    Connection, MountSettings, RuntimeSettings, DEFAULT_POLL_INTERVAL, DEFAULT_READINESS_TIMEOUT,
    DEFAULT_REMOTE_NAME, DEFAULT_STARTUP_GRACE,
};
pub use supervisor::{LaunchSpec, OutputMode, ProcessSupervisor, SupervisedProcess, Supervisor};
