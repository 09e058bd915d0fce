//! In-memory supervisor and binder for exercising the mount manager.
//!
//! [`FakeSupervisor`] and [`RecordingBinder`] write into one shared
//! [`EventLog`], so tests can assert both what was run and in which order
//! (e.g. the drive is unbound before the server is killed).
//!
//! ```
//! use bucketdrive_mount::testing::{EventLog, FakeSupervisor, RecordingBinder};
//!
//! let log = EventLog::default();
//! let supervisor = FakeSupervisor::new(log.clone());
//! let binder = RecordingBinder::new(log.clone());
//! assert!(log.events().is_empty());
//! # let _ = (supervisor, binder);
//! ```

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::drive::{DriveBinder, DriveLetter};
use crate::error::MountError;
use crate::supervisor::{LaunchSpec, SupervisedProcess, Supervisor};

/// Something the fakes were asked to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// `reap_stale(name)`
    Reap(String),
    /// `launch` with these arguments; carries the assigned pid
    Launch {
        /// Fake pid handed out
        pid: u32,
        /// Arguments passed
        args: Vec<String>,
    },
    /// `terminate` on a live process
    Terminate(u32),
    /// `bind(letter, url)`
    Bind(String, String),
    /// `try_unbind(letter)`
    Unbind(String),
}

/// Shared, ordered record of [`Event`]s.
#[derive(Debug, Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<Event>>>);

impl EventLog {
    /// Append an event.
    pub fn push(&self, event: Event) {
        self.0.lock().push(event);
    }

    /// Snapshot of all events so far.
    pub fn events(&self) -> Vec<Event> {
        self.0.lock().clone()
    }

    /// Forget everything recorded so far.
    pub fn clear(&self) {
        self.0.lock().clear();
    }

    /// Number of launches recorded.
    pub fn launches(&self) -> usize {
        self.0
            .lock()
            .iter()
            .filter(|e| matches!(e, Event::Launch { .. }))
            .count()
    }
}

/// Shared state behind a [`FakeProcess`].
#[derive(Debug)]
pub struct FakeProcessState {
    pid: u32,
    alive: AtomicBool,
    terminations: AtomicUsize,
    fail_terminate: AtomicBool,
}

impl FakeProcessState {
    /// Pid handed out at launch.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Whether the fake is still "running".
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Number of kills that actually hit a live process.
    pub fn terminations(&self) -> usize {
        self.terminations.load(Ordering::SeqCst)
    }

    /// Simulate the process exiting on its own.
    pub fn exit(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    /// Make the next kills fail with an OS error.
    pub fn fail_terminate(&self, fail: bool) {
        self.fail_terminate.store(fail, Ordering::SeqCst);
    }
}

/// A [`SupervisedProcess`] that only flips flags.
#[derive(Debug, Clone)]
pub struct FakeProcess {
    state: Arc<FakeProcessState>,
    log: Option<EventLog>,
}

impl FakeProcess {
    /// A live fake process with the given pid.
    pub fn new(pid: u32) -> Self {
        Self {
            state: Arc::new(FakeProcessState {
                pid,
                alive: AtomicBool::new(true),
                terminations: AtomicUsize::new(0),
                fail_terminate: AtomicBool::new(false),
            }),
            log: None,
        }
    }

    /// Simulate the process exiting on its own.
    pub fn exit(&self) {
        self.state.exit();
    }

    /// Shared state, observable after the process is handed to the manager.
    pub fn state(&self) -> Arc<FakeProcessState> {
        Arc::clone(&self.state)
    }
}

impl SupervisedProcess for FakeProcess {
    fn pid(&self) -> u32 {
        self.state.pid
    }

    fn is_alive(&mut self) -> bool {
        self.state.is_alive()
    }

    fn terminate(&mut self) -> Result<(), MountError> {
        if !self.state.is_alive() {
            return Ok(());
        }
        if self.state.fail_terminate.load(Ordering::SeqCst) {
            return Err(MountError::ProcessTermination {
                pid: self.state.pid,
                source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
            });
        }
        if let Some(log) = &self.log {
            log.push(Event::Terminate(self.state.pid));
        }
        self.state.terminations.fetch_add(1, Ordering::SeqCst);
        self.state.exit();
        Ok(())
    }
}

/// A [`Supervisor`] handing out [`FakeProcess`]es.
#[derive(Debug)]
pub struct FakeSupervisor {
    log: EventLog,
    next_pid: AtomicU32,
    fail_launch: AtomicBool,
    exit_on_launch: AtomicBool,
    specs: Mutex<Vec<LaunchSpec>>,
    processes: Mutex<Vec<Arc<FakeProcessState>>>,
}

impl FakeSupervisor {
    /// Supervisor recording into `log`.
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            next_pid: AtomicU32::new(1000),
            fail_launch: AtomicBool::new(false),
            exit_on_launch: AtomicBool::new(false),
            specs: Mutex::new(Vec::new()),
            processes: Mutex::new(Vec::new()),
        }
    }

    /// Make launches fail as if the executable were missing.
    pub fn fail_launch(&self, fail: bool) {
        self.fail_launch.store(fail, Ordering::SeqCst);
    }

    /// Make launched processes exit immediately.
    pub fn exit_on_launch(&self, exit: bool) {
        self.exit_on_launch.store(exit, Ordering::SeqCst);
    }

    /// Every spec passed to `launch`, successful or not.
    pub fn specs(&self) -> Vec<LaunchSpec> {
        self.specs.lock().clone()
    }

    /// State of every process handed out, in launch order.
    pub fn processes(&self) -> Vec<Arc<FakeProcessState>> {
        self.processes.lock().clone()
    }

    /// State of the most recently launched process.
    pub fn last_process(&self) -> Option<Arc<FakeProcessState>> {
        self.processes.lock().last().cloned()
    }
}

impl Supervisor for FakeSupervisor {
    fn launch(&self, spec: &LaunchSpec) -> Result<Box<dyn SupervisedProcess>, MountError> {
        self.specs.lock().push(spec.clone());
        if self.fail_launch.load(Ordering::SeqCst) {
            return Err(MountError::Launch {
                program: spec.program.display().to_string(),
                reason: "No such file or directory".to_string(),
            });
        }

        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        let mut process = FakeProcess::new(pid);
        process.log = Some(self.log.clone());
        if self.exit_on_launch.load(Ordering::SeqCst) {
            process.exit();
        }
        self.processes.lock().push(process.state());
        self.log.push(Event::Launch {
            pid,
            args: spec.args_lossy(),
        });
        Ok(Box::new(process))
    }

    fn reap_stale(&self, name: &str) {
        self.log.push(Event::Reap(name.to_string()));
    }
}

/// A [`DriveBinder`] that records calls and can be told to fail.
#[derive(Debug)]
pub struct RecordingBinder {
    log: EventLog,
    fail_bind: AtomicBool,
}

impl RecordingBinder {
    /// Binder recording into `log`.
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            fail_bind: AtomicBool::new(false),
        }
    }

    /// Make `bind` fail as if `net use` returned non-zero.
    pub fn fail_bind(&self, fail: bool) {
        self.fail_bind.store(fail, Ordering::SeqCst);
    }
}

impl DriveBinder for RecordingBinder {
    fn bind(&self, letter: &DriveLetter, url: &str) -> Result<(), MountError> {
        self.unbind(letter);
        if self.fail_bind.load(Ordering::SeqCst) {
            return Err(MountError::DriveBind {
                letter: letter.clone(),
                url: url.to_string(),
                reason: "System error 67 has occurred.".to_string(),
            });
        }
        self.log.push(Event::Bind(letter.to_string(), url.to_string()));
        Ok(())
    }

    fn try_unbind(&self, letter: &DriveLetter) -> Result<(), MountError> {
        self.log.push(Event::Unbind(letter.to_string()));
        Ok(())
    }
}
