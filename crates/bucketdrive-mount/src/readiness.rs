//! Waiting for a freshly launched subprocess to become usable.
//!
//! Each backend names an observable signal: the network-share server
//! accepting TCP connections, or the kernel-driver mount root appearing.
//! When no signal exists on the current platform the backend falls back to
//! a fixed settle delay. In every case the subprocess exiting early is
//! reported as a launch failure right away.

use std::net::{TcpStream, ToSocketAddrs};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::error::MountError;
use crate::supervisor::SupervisedProcess;

/// Signal that a launched subprocess is ready.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// A TCP connection to `host:port` succeeds
    TcpConnect(String),
    /// The given path exists
    PathExists(PathBuf),
    /// Nothing observable; wait this long and require the process to survive
    Settle(Duration),
}

/// Bounds on readiness polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessPolicy {
    /// Give up after this long
    pub timeout: Duration,
    /// Wait between probes
    pub interval: Duration,
    /// The process must stay alive this long after the signal is seen
    pub grace: Duration,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self {
            timeout: crate::settings::DEFAULT_READINESS_TIMEOUT,
            interval: crate::settings::DEFAULT_POLL_INTERVAL,
            grace: crate::settings::DEFAULT_STARTUP_GRACE,
        }
    }
}

impl Readiness {
    /// Probe the signal once.
    pub fn probe(&self, connect_timeout: Duration) -> bool {
        match self {
            Readiness::TcpConnect(addr) => tcp_accepts(addr, connect_timeout),
            Readiness::PathExists(path) => path.exists(),
            Readiness::Settle(_) => false,
        }
    }
}

fn tcp_accepts(addr: &str, timeout: Duration) -> bool {
    let Ok(addrs) = addr.to_socket_addrs() else {
        return false;
    };
    addrs
        .into_iter()
        .any(|a| TcpStream::connect_timeout(&a, timeout).is_ok())
}

/// Block until `process` is ready according to `readiness`.
///
/// A probe can succeed against a listener owned by some other program, so
/// the process must also survive `policy.grace` after the signal appears.
///
/// # Errors
///
/// [`MountError::Launch`] if the process exits first (including during the
/// grace window), or if the signal is not observed within `policy.timeout`.
pub fn await_ready(
    process: &mut dyn SupervisedProcess,
    readiness: &Readiness,
    policy: ReadinessPolicy,
    program: &str,
) -> Result<(), MountError> {
    let start = Instant::now();
    let interval = policy.interval.max(Duration::from_millis(1));

    if let Readiness::Settle(delay) = readiness {
        debug!(pid = process.pid(), ?delay, "No readiness signal, waiting fixed delay");
        return stay_alive(process, *delay, interval, program);
    }

    loop {
        if !process.is_alive() {
            return Err(exited_early(process, program));
        }
        if readiness.probe(interval) {
            debug!(pid = process.pid(), elapsed = ?start.elapsed(), ?readiness, "Readiness signal seen");
            stay_alive(process, policy.grace, interval, program)?;
            debug!(pid = process.pid(), elapsed = ?start.elapsed(), "Subprocess ready");
            return Ok(());
        }
        if start.elapsed() >= policy.timeout {
            return Err(MountError::launch(
                program,
                format!(
                    "process {} did not become ready within {:?}",
                    process.pid(),
                    policy.timeout
                ),
            ));
        }
        trace!(pid = process.pid(), ?readiness, "Not ready yet");
        std::thread::sleep(interval);
    }
}

/// Require `process` to keep running for `period`.
fn stay_alive(
    process: &mut dyn SupervisedProcess,
    period: Duration,
    interval: Duration,
    program: &str,
) -> Result<(), MountError> {
    let start = Instant::now();
    while start.elapsed() < period {
        if !process.is_alive() {
            return Err(exited_early(process, program));
        }
        std::thread::sleep(interval.min(period.saturating_sub(start.elapsed())));
    }
    if process.is_alive() {
        Ok(())
    } else {
        Err(exited_early(process, program))
    }
}

fn exited_early(process: &dyn SupervisedProcess, program: &str) -> MountError {
    MountError::launch(
        program,
        format!("process {} exited before becoming ready", process.pid()),
    )
}
