//! Error type for mount lifecycle operations.

use std::path::PathBuf;

use thiserror::Error;

use crate::drive::DriveLetter;

/// Errors that can occur while starting or stopping a mount session
#[derive(Error, Debug)]
pub enum MountError {
    /// The rclone credential file could not be written
    #[error("Failed to write credential file {path}: {source}")]
    ConfigWrite {
        /// Target path of the credential file
        path: PathBuf,
        /// Underlying I/O failure
        #[source]
        source: std::io::Error,
    },

    /// The subprocess could not be started, or exited before it became ready
    #[error("Failed to launch {program}: {reason}")]
    Launch {
        /// Program that was being launched
        program: String,
        /// What went wrong
        reason: String,
    },

    /// Forced termination of the subprocess failed
    #[error("Failed to terminate process {pid}: {source}")]
    ProcessTermination {
        /// PID of the process that survived the kill
        pid: u32,
        /// Underlying OS failure
        #[source]
        source: std::io::Error,
    },

    /// The OS drive-mapping command failed
    #[error("Failed to bind drive {letter} to {url}: {reason}")]
    DriveBind {
        /// Drive letter being mapped
        letter: DriveLetter,
        /// Network location the letter should point to
        url: String,
        /// Command output or spawn error
        reason: String,
    },

    /// The OS drive-unmapping command failed
    #[error("Failed to unbind drive {letter}: {reason}")]
    DriveUnbind {
        /// Drive letter being unmapped
        letter: DriveLetter,
        /// Command output or spawn error
        reason: String,
    },

    /// Start was called while a session is already starting or running
    #[error("A mount session is already active ({phase})")]
    AlreadyActive {
        /// Phase the manager was in when the call was rejected
        phase: crate::Phase,
    },

    /// Mount settings name an unsupported backend or carry unusable values
    #[error("Invalid backend configuration: {0}")]
    InvalidBackendConfig(String),
}

impl MountError {
    /// Whether the error leaves a usable mount behind (server up, drive unbound).
    pub fn is_partial(&self) -> bool {
        matches!(self, MountError::DriveBind { .. })
    }

    pub(crate) fn launch(program: impl Into<String>, reason: impl Into<String>) -> Self {
        MountError::Launch {
            program: program.into(),
            reason: reason.into(),
        }
    }
}
