//! Drive-letter mapping for the network-share backend.
//!
//! The network-share backend only starts a local WebDAV server; the drive
//! letter is attached afterwards with the OS mapping command
//! (`net use X: http://host:port`). The kernel-driver backend binds its
//! letter itself and never goes through here.
//!
//! # Failure policy
//!
//! - [`DriveBinder::bind`] failures are surfaced ([`MountError::DriveBind`])
//! - [`DriveBinder::unbind`] failures are logged and dropped; `net use` reports
//!   "nothing was mapped" the same way as a real failure

use std::fmt;
use std::path::PathBuf;
use std::process::Command;
use std::str::FromStr;

use thiserror::Error;
use tracing::{debug, warn};

use crate::error::MountError;
use crate::supervisor::hide_console;

/// A drive letter in canonical `X:` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DriveLetter(String);

/// Rejected drive-letter input
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid drive letter {input:?}: expected a single letter, optionally followed by ':'")]
pub struct DriveLetterError {
    /// The rejected input
    pub input: String,
}

impl DriveLetter {
    /// The letter with its trailing colon, e.g. `"Z:"`.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Root directory of the drive, e.g. `Z:\`.
    pub fn root(&self) -> PathBuf {
        PathBuf::from(format!("{}\\", self.0))
    }
}

impl FromStr for DriveLetter {
    type Err = DriveLetterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let letter = trimmed.strip_suffix(':').unwrap_or(trimmed);
        let mut chars = letter.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) if c.is_ascii_alphabetic() => {
                Ok(DriveLetter(format!("{}:", c.to_ascii_uppercase())))
            }
            _ => Err(DriveLetterError {
                input: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for DriveLetter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Maps drive letters to network locations.
///
/// Implementations must be `Send + Sync`; the manager shares one binder
/// across every start/stop it performs.
pub trait DriveBinder: Send + Sync {
    /// Map `letter` to `url`, clearing any previous mapping first.
    fn bind(&self, letter: &DriveLetter, url: &str) -> Result<(), MountError>;

    /// Remove the mapping for `letter`, reporting failures.
    fn try_unbind(&self, letter: &DriveLetter) -> Result<(), MountError>;

    /// Remove the mapping for `letter`, ignoring failures.
    fn unbind(&self, letter: &DriveLetter) {
        if let Err(e) = self.try_unbind(letter) {
            debug!(error = %e, "Ignoring unbind failure");
        }
    }
}

/// Arguments for mapping `letter` to `url`.
pub fn bind_args(letter: &DriveLetter, url: &str) -> Vec<String> {
    vec!["use".to_string(), letter.to_string(), url.to_string()]
}

/// Arguments for removing the mapping of `letter`.
pub fn unbind_args(letter: &DriveLetter) -> Vec<String> {
    vec![
        "use".to_string(),
        letter.to_string(),
        "/delete".to_string(),
        "/y".to_string(),
    ]
}

/// [`DriveBinder`] backed by the Windows `net use` command.
#[derive(Debug, Clone)]
pub struct NetUseBinder {
    program: PathBuf,
}

impl Default for NetUseBinder {
    fn default() -> Self {
        Self::new()
    }
}

impl NetUseBinder {
    /// Binder invoking `net` from `PATH`.
    pub fn new() -> Self {
        Self::with_program("net")
    }

    /// Binder invoking a specific program with `net use` arguments.
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Run the mapping program, returning a description of the failure.
    fn run(&self, args: &[String]) -> Result<(), String> {
        let mut command = Command::new(&self.program);
        command.args(args);
        hide_console(&mut command);

        debug!(program = %self.program.display(), ?args, "Running drive mapping command");

        let output = command
            .output()
            .map_err(|e| format!("could not run {}: {e}", self.program.display()))?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        Err(if !stderr.trim().is_empty() {
            stderr.trim().to_string()
        } else if !stdout.trim().is_empty() {
            stdout.trim().to_string()
        } else {
            format!("exit status: {}", output.status)
        })
    }
}

impl DriveBinder for NetUseBinder {
    fn bind(&self, letter: &DriveLetter, url: &str) -> Result<(), MountError> {
        self.unbind(letter);

        self.run(&bind_args(letter, url)).map_err(|reason| {
            warn!(%letter, url, %reason, "Drive mapping failed");
            MountError::DriveBind {
                letter: letter.clone(),
                url: url.to_string(),
                reason,
            }
        })?;

        debug!(%letter, url, "Drive mapped");
        Ok(())
    }

    fn try_unbind(&self, letter: &DriveLetter) -> Result<(), MountError> {
        self.run(&unbind_args(letter))
            .map_err(|reason| MountError::DriveUnbind {
                letter: letter.clone(),
                reason,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn letter(s: &str) -> DriveLetter {
        s.parse().unwrap()
    }

    #[test]
    fn normalizes_bare_and_colon_forms() {
        assert_eq!(letter("Z"), letter("Z:"));
        assert_eq!(letter("z").as_str(), "Z:");
        assert_eq!(letter(" y: ").as_str(), "Y:");
    }

    #[test]
    fn rejects_garbage() {
        for input in ["", ":", "ZZ", "1", "Z::", "é"] {
            assert!(input.parse::<DriveLetter>().is_err(), "accepted {input:?}");
        }
    }

    #[test]
    fn bind_and_unbind_args_are_identical_for_both_forms() {
        let url = "http://localhost:5000";
        assert_eq!(bind_args(&letter("Z"), url), bind_args(&letter("Z:"), url));
        assert_eq!(bind_args(&letter("Z"), url), ["use", "Z:", url]);
        assert_eq!(unbind_args(&letter("Z")), unbind_args(&letter("Z:")));
        assert_eq!(unbind_args(&letter("Z")), ["use", "Z:", "/delete", "/y"]);
    }

    #[test]
    fn root_path_has_trailing_separator() {
        assert_eq!(letter("q").root(), PathBuf::from("Q:\\"));
    }

    #[cfg(unix)]
    #[test]
    fn bind_with_failing_program_is_drive_bind_error() {
        let binder = NetUseBinder::with_program("false");
        let err = binder.bind(&letter("Z"), "http://localhost:5000").unwrap_err();
        assert!(matches!(err, MountError::DriveBind { .. }));
        assert!(err.is_partial());
    }

    #[cfg(unix)]
    #[test]
    fn bind_with_succeeding_program() {
        let binder = NetUseBinder::with_program("true");
        binder.bind(&letter("Z"), "http://localhost:5000").unwrap();
    }

    #[test]
    fn bind_with_missing_program_is_drive_bind_error() {
        let binder = NetUseBinder::with_program("/nonexistent/bucketdrive-net-12345");
        let err = binder.bind(&letter("Z"), "http://localhost:5000").unwrap_err();
        assert!(matches!(err, MountError::DriveBind { .. }));
    }

    #[test]
    fn unbind_swallows_errors_and_is_repeatable() {
        let binder = NetUseBinder::with_program("/nonexistent/bucketdrive-net-12345");
        assert!(matches!(
            binder.try_unbind(&letter("Z")),
            Err(MountError::DriveUnbind { .. })
        ));
        binder.unbind(&letter("Z"));
        binder.unbind(&letter("Z"));
    }

    proptest! {
        #[test]
        fn any_ascii_letter_normalizes(c in proptest::char::range('a', 'z'), colon: bool, upper: bool) {
            let c = if upper { c.to_ascii_uppercase() } else { c };
            let input = if colon { format!("{c}:") } else { c.to_string() };
            let parsed: DriveLetter = input.parse().unwrap();
            prop_assert_eq!(parsed.as_str(), format!("{}:", c.to_ascii_uppercase()));
        }
    }
}
