//! Asynchronous signal flags, applied synchronously.
//!
//! Handlers only set flags; the event loop reads and clears them
//! between readiness waits, so all real work happens on the one
//! thread. A signal landing while the loop is blocked in `poll(2)`
//! interrupts it with `EINTR`, which the loop treats as a wakeup.

use std::sync::atomic::{AtomicBool, Ordering};

use nix::libc;
use nix::sys::signal::{self, SigHandler, Signal};
use nix::unistd::Pid;

/// One pending-notification slot per signal of interest.
pub struct SignalFlags {
    terminate: AtomicBool,
    child_exited: AtomicBool,
    window_changed: AtomicBool,
    resumed: AtomicBool,
}

impl SignalFlags {
    pub const fn new() -> Self {
        Self {
            terminate: AtomicBool::new(false),
            child_exited: AtomicBool::new(false),
            window_changed: AtomicBool::new(false),
            resumed: AtomicBool::new(false),
        }
    }

    pub fn raise_terminate(&self) {
        self.terminate.store(true, Ordering::Relaxed);
    }

    pub fn raise_child_exited(&self) {
        self.child_exited.store(true, Ordering::Relaxed);
    }

    pub fn raise_window_changed(&self) {
        self.window_changed.store(true, Ordering::Relaxed);
    }

    pub fn raise_resumed(&self) {
        self.resumed.store(true, Ordering::Relaxed);
    }

    pub fn take_terminate(&self) -> bool {
        self.terminate.swap(false, Ordering::Relaxed)
    }

    pub fn take_child_exited(&self) -> bool {
        self.child_exited.swap(false, Ordering::Relaxed)
    }

    pub fn take_window_changed(&self) -> bool {
        self.window_changed.swap(false, Ordering::Relaxed)
    }

    pub fn take_resumed(&self) -> bool {
        self.resumed.swap(false, Ordering::Relaxed)
    }
}

impl Default for SignalFlags {
    fn default() -> Self {
        Self::new()
    }
}

/// Flags written by the process-wide handlers installed in [`init`].
pub static FLAGS: SignalFlags = SignalFlags::new();

extern "C" fn handle_sigterm(_: libc::c_int) {
    FLAGS.raise_terminate();
}

extern "C" fn handle_sigchld(_: libc::c_int) {
    FLAGS.raise_child_exited();
}

extern "C" fn handle_sigwinch(_: libc::c_int) {
    FLAGS.raise_window_changed();
}

extern "C" fn handle_sigcont(_: libc::c_int) {
    FLAGS.raise_resumed();
}

/// Install the client's signal handlers. Also called again after a
/// suspend/resume cycle, since a stop can leave dispositions reset.
pub fn init() -> nix::Result<()> {
    unsafe {
        signal::signal(Signal::SIGINT, SigHandler::SigIgn)?;
        signal::signal(Signal::SIGPIPE, SigHandler::SigIgn)?;
        signal::signal(Signal::SIGTERM, SigHandler::Handler(handle_sigterm))?;
        signal::signal(Signal::SIGCHLD, SigHandler::Handler(handle_sigchld))?;
        signal::signal(Signal::SIGWINCH, SigHandler::Handler(handle_sigwinch))?;
        signal::signal(Signal::SIGCONT, SigHandler::Handler(handle_sigcont))?;
    }
    Ok(())
}

/// Stop this process until something resumes it; SIGCONT then raises
/// the `resumed` flag.
pub fn suspend_self() {
    let _ = signal::kill(Pid::this(), Signal::SIGSTOP);
}
