//! Termination signal handling using signal-hook.
//!
//! The first SIGINT/SIGTERM (or SIGHUP on Unix) requests a graceful
//! shutdown so the mount can be torn down. A second one exits immediately.

use std::sync::OnceLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use signal_hook::consts::TERM_SIGNALS;
use signal_hook::flag;

#[cfg(unix)]
use signal_hook::consts::signal::SIGHUP;

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

static INSTALLED: AtomicBool = AtomicBool::new(false);

static WAKEUP: OnceLock<(Mutex<bool>, Condvar)> = OnceLock::new();

fn wakeup() -> &'static (Mutex<bool>, Condvar) {
    WAKEUP.get_or_init(|| (Mutex::new(false), Condvar::new()))
}

/// Install the handlers. Calling it again is a no-op.
pub fn install_signal_handler() -> Result<(), std::io::Error> {
    if INSTALLED.swap(true, Ordering::SeqCst) {
        return Ok(());
    }

    let flagged = Arc::new(AtomicBool::new(false));
    for &sig in TERM_SIGNALS {
        // Order matters: the conditional exit must see the flag before it is set
        flag::register_conditional_shutdown(sig, 1, Arc::clone(&flagged))?;
        flag::register(sig, Arc::clone(&flagged))?;
    }
    #[cfg(unix)]
    {
        flag::register_conditional_shutdown(SIGHUP, 1, Arc::clone(&flagged))?;
        flag::register(SIGHUP, Arc::clone(&flagged))?;
    }

    std::thread::Builder::new()
        .name("signal-watch".to_string())
        .spawn(move || {
            while !flagged.load(Ordering::Relaxed) {
                std::thread::sleep(Duration::from_millis(50));
            }
            tracing::info!("Termination signal received");
            request_shutdown();
            eprintln!("\nUnmounting (press Ctrl+C again to force exit)");
        })?;

    Ok(())
}

/// Ask every waiter to wind down.
pub fn request_shutdown() {
    SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
    let (lock, cvar) = wakeup();
    *lock.lock() = true;
    cvar.notify_all();
}

/// Whether shutdown was requested.
pub fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
}

/// Block until shutdown is requested.
pub fn wait_for_shutdown() {
    let (lock, cvar) = wakeup();
    let mut guard = lock.lock();
    while !*guard {
        cvar.wait(&mut guard);
    }
}

#[cfg(test)]
fn clear_shutdown() {
    SHUTDOWN_REQUESTED.store(false, Ordering::SeqCst);
    *wakeup().0.lock() = false;
}
