//! Subprocess supervision for the rclone mount/serve process.
//!
//! The supervisor launches rclone detached from any console the caller owns,
//! optionally forwards its output into the log, and kills it on request.
//!
//! # Liveness
//!
//! rclone exposes no health channel we can rely on here, so "the child has
//! not exited" is the only liveness signal. A hung rclone still reads as
//! alive; readiness probing in [`crate::readiness`] covers the startup
//! window, nothing covers later hangs.
//!
//! # Stale processes
//!
//! [`Supervisor::reap_stale`] kills every process with the given executable
//! name, not just ones this supervisor started. It exists to recover from a
//! previous session that crashed and left rclone holding the port or the
//! drive letter, and is only safe when nothing else on the host runs an
//! rclone of the same name.

use std::ffi::OsString;
use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};

use tracing::{debug, info, warn};

use crate::error::MountError;

/// What happens to the subprocess's stdout/stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    /// Redirect both streams to the null device
    #[default]
    Discard,
    /// Drain both streams on dedicated threads and log every line
    Capture,
}

/// Everything needed to start one subprocess.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    /// Executable to run
    pub program: PathBuf,
    /// Arguments, in order
    pub args: Vec<OsString>,
    /// Extra environment variables
    pub env: Vec<(OsString, OsString)>,
    /// Output handling
    pub output: OutputMode,
}

impl LaunchSpec {
    /// Spec for `program` with no arguments.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            output: OutputMode::Discard,
        }
    }

    /// Append one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Add an environment variable.
    #[must_use]
    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Choose output handling.
    #[must_use]
    pub fn output(mut self, output: OutputMode) -> Self {
        self.output = output;
        self
    }

    /// Arguments as lossy strings, for logging and assertions.
    pub fn args_lossy(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    fn program_name(&self) -> String {
        self.program.display().to_string()
    }
}

/// A running (or finished) subprocess owned by the manager.
pub trait SupervisedProcess: Send {
    /// OS process id.
    fn pid(&self) -> u32;

    /// Whether the process has not exited yet. Never blocks.
    fn is_alive(&mut self) -> bool;

    /// Forcefully kill the process.
    ///
    /// Idempotent: killing a process that already exited, or killing twice,
    /// returns `Ok(())`.
    fn terminate(&mut self) -> Result<(), MountError>;
}

/// Starts subprocesses and cleans up leftovers from earlier sessions.
pub trait Supervisor: Send + Sync {
    /// Start the subprocess and return immediately, without waiting for readiness.
    fn launch(&self, spec: &LaunchSpec) -> Result<Box<dyn SupervisedProcess>, MountError>;

    /// Best-effort kill of every process named `name`. Never fails.
    fn reap_stale(&self, name: &str);
}

/// [`Supervisor`] backed by real OS processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessSupervisor;

impl ProcessSupervisor {
    /// Create a supervisor.
    pub fn new() -> Self {
        Self
    }
}

impl Supervisor for ProcessSupervisor {
    fn launch(&self, spec: &LaunchSpec) -> Result<Box<dyn SupervisedProcess>, MountError> {
        let mut command = Command::new(&spec.program);
        command.args(&spec.args);
        command.envs(spec.env.iter().map(|(k, v)| (k, v)));
        command.stdin(Stdio::null());
        match spec.output {
            OutputMode::Discard => {
                command.stdout(Stdio::null());
                command.stderr(Stdio::null());
            }
            OutputMode::Capture => {
                command.stdout(Stdio::piped());
                command.stderr(Stdio::piped());
            }
        }
        detach(&mut command);

        let mut child = command
            .spawn()
            .map_err(|e| MountError::launch(spec.program_name(), e.to_string()))?;

        let pid = child.id();
        let name = spec
            .program
            .file_name()
            .map_or_else(|| spec.program_name(), |n| n.to_string_lossy().into_owned());

        if let Some(stdout) = child.stdout.take() {
            drain(stdout, &name, pid, "stdout");
        }
        if let Some(stderr) = child.stderr.take() {
            drain(stderr, &name, pid, "stderr");
        }

        info!(pid, program = %spec.program.display(), args = ?spec.args_lossy(), "Launched subprocess");

        Ok(Box::new(ChildProcess {
            child,
            pid,
            finished: false,
        }))
    }

    fn reap_stale(&self, name: &str) {
        let mut command = reap_command(name);
        hide_console(&mut command);

        match command.output() {
            Ok(output) if output.status.success() => {
                info!(name, "Killed stale processes left by a previous session");
            }
            Ok(output) => {
                // taskkill and pkill both fail when nothing matched
                let stderr = String::from_utf8_lossy(&output.stderr);
                debug!(name, status = %output.status, stderr = %stderr.trim(), "No stale processes reaped");
            }
            Err(e) => {
                warn!(name, error = %e, "Could not run stale process cleanup");
            }
        }
    }
}

#[cfg(windows)]
fn reap_command(name: &str) -> Command {
    let mut command = Command::new("taskkill");
    command.args(["/F", "/IM", name]);
    command
}

#[cfg(not(windows))]
fn reap_command(name: &str) -> Command {
    let mut command = Command::new("pkill");
    command.args(["-KILL", "-x", name]);
    command
}

/// Keep the child from opening or attaching to a console window.
#[cfg(windows)]
pub(crate) fn hide_console(command: &mut Command) {
    use std::os::windows::process::CommandExt;

    const CREATE_NO_WINDOW: u32 = 0x0800_0000;
    command.creation_flags(CREATE_NO_WINDOW);
}

#[cfg(not(windows))]
pub(crate) fn hide_console(_command: &mut Command) {}

/// Detach the child from the caller's terminal and signal group.
#[cfg(unix)]
fn detach(command: &mut Command) {
    use std::os::unix::process::CommandExt;

    // setsid() makes the child a session and process-group leader with no
    // controlling terminal, so Ctrl+C in our terminal does not reach it and
    // terminate() can take down the whole group.
    unsafe {
        command.pre_exec(|| match nix::unistd::setsid() {
            Ok(_) => Ok(()),
            Err(e) => Err(std::io::Error::from_raw_os_error(e as i32)),
        });
    }
}

#[cfg(not(unix))]
fn detach(command: &mut Command) {
    hide_console(command);
}

/// Forward every line of `stream` to the log until EOF.
fn drain<R: Read + Send + 'static>(stream: R, name: &str, pid: u32, kind: &'static str) {
    let thread_name = format!("{name}-{kind}");
    let name = name.to_string();
    let spawned = std::thread::Builder::new()
        .name(thread_name)
        .spawn(move || {
            let mut reader = BufReader::new(stream);
            let mut line = Vec::new();
            loop {
                line.clear();
                match reader.read_until(b'\n', &mut line) {
                    Ok(0) => break,
                    Ok(_) => {
                        let text = String::from_utf8_lossy(&line);
                        let text = text.trim_end();
                        if !text.is_empty() {
                            info!(target: "bucketdrive::subprocess", process = %name, pid, stream = kind, "{text}");
                        }
                    }
                    Err(e) => {
                        debug!(process = %name, pid, stream = kind, error = %e, "Output reader stopped");
                        break;
                    }
                }
            }
        });

    if let Err(e) = spawned {
        warn!(pid, stream = kind, error = %e, "Could not start output reader");
    }
}

/// A child process spawned by [`ProcessSupervisor`].
struct ChildProcess {
    child: Child,
    pid: u32,
    /// Set once the exit status has been collected.
    finished: bool,
}

impl ChildProcess {
    #[cfg(unix)]
    fn kill_group(&self) {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        // PIDs fit in i32 on every Unix we run on
        #[allow(clippy::cast_possible_wrap)]
        let pgid = Pid::from_raw(self.pid as i32);
        if let Err(e) = killpg(pgid, Signal::SIGKILL) {
            debug!(pid = self.pid, error = %e, "killpg failed, falling back to kill");
        }
    }

    #[cfg(not(unix))]
    fn kill_group(&self) {}
}

impl SupervisedProcess for ChildProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn is_alive(&mut self) -> bool {
        if self.finished {
            return false;
        }
        match self.child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                debug!(pid = self.pid, %status, "Subprocess exited");
                self.finished = true;
                false
            }
            Err(e) => {
                warn!(pid = self.pid, error = %e, "Could not query subprocess status");
                false
            }
        }
    }

    fn terminate(&mut self) -> Result<(), MountError> {
        if !self.is_alive() {
            return Ok(());
        }

        self.kill_group();
        match self.child.kill() {
            Ok(()) => {}
            // Already exited between the liveness check and the kill
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => {}
            Err(source) => {
                return Err(MountError::ProcessTermination {
                    pid: self.pid,
                    source,
                });
            }
        }

        match self.child.wait() {
            Ok(status) => debug!(pid = self.pid, %status, "Subprocess terminated"),
            Err(e) => debug!(pid = self.pid, error = %e, "Could not collect exit status"),
        }
        self.finished = true;
        info!(pid = self.pid, "Killed subprocess");
        Ok(())
    }
}

impl Drop for ChildProcess {
    fn drop(&mut self) {
        if let Err(e) = self.terminate() {
            warn!(pid = self.pid, error = %e, "Failed to kill subprocess on drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn wait_until_exited(process: &mut dyn SupervisedProcess) -> bool {
        let start = Instant::now();
        while start.elapsed() < Duration::from_secs(5) {
            if !process.is_alive() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        false
    }

    #[test]
    fn launch_spec_builder() {
        let spec = LaunchSpec::new("rclone")
            .arg("serve")
            .args(["webdav", "--addr"])
            .env("RCLONE_VERBOSE", "1")
            .output(OutputMode::Capture);
        assert_eq!(spec.args_lossy(), ["serve", "webdav", "--addr"]);
        assert_eq!(spec.env.len(), 1);
        assert_eq!(spec.output, OutputMode::Capture);
    }

    #[test]
    fn launch_missing_program_is_launch_error() {
        let spec = LaunchSpec::new("/nonexistent/bucketdrive-rclone-12345");
        let err = ProcessSupervisor::new().launch(&spec).err().unwrap();
        assert!(matches!(err, MountError::Launch { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn terminate_kills_running_process_and_is_idempotent() {
        let spec = LaunchSpec::new("sleep").arg("30");
        let mut process = ProcessSupervisor::new().launch(&spec).unwrap();
        assert!(process.pid() > 0);
        assert!(process.is_alive());

        process.terminate().unwrap();
        assert!(!process.is_alive());
        process.terminate().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn terminate_after_natural_exit_is_noop() {
        let spec = LaunchSpec::new("true");
        let mut process = ProcessSupervisor::new().launch(&spec).unwrap();
        assert!(wait_until_exited(process.as_mut()));
        process.terminate().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn captured_output_does_not_block_child() {
        // Writes far more than a pipe buffer holds; only finishes if drained
        let spec = LaunchSpec::new("sh")
            .args(["-c", "i=0; while [ $i -lt 4000 ]; do echo line-$i-padding-padding-padding; i=$((i+1)); done"])
            .output(OutputMode::Capture);
        let mut process = ProcessSupervisor::new().launch(&spec).unwrap();
        assert!(wait_until_exited(process.as_mut()));
    }

    #[test]
    fn reap_stale_without_matches_does_not_panic() {
        ProcessSupervisor::new().reap_stale("bucketdrive-no-such-process");
    }
}
