//! Process exit codes.

/// Everything went fine
pub const SUCCESS: u8 = 0;

/// Anything not covered below
pub const GENERAL_ERROR: u8 = 1;

/// `config.json` missing, unreadable or invalid
pub const CONFIG_ERROR: u8 = 2;

/// The mount session could not be started
pub const MOUNT_FAILED: u8 = 3;
