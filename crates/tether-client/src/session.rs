//! Connection context, event loop and frame dispatcher.
//!
//! One thread, one blocking point: `poll(2)` on the control socket,
//! with no timeout. Signals interrupt the wait and are applied as
//! flags at the top of each iteration; all I/O is non-blocking and
//! goes through the two transport buffers.

use std::io::{self, Read, Write};
use std::os::fd::AsFd;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;
use tracing::{debug, warn};

use tether_protocol::{Frame, TransportBuf};

use crate::signals::{self, SignalFlags};
use crate::{FatalError, handshake};

const READ_CHUNK: usize = 4096;

/// Why the event loop stopped. Recorded once, read by the exit path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExitReason {
    #[default]
    None,
    TransportLost,
    ServerShutdown,
    ServerExit,
    Detached,
    ErrorReported,
}

/// The client's mutable state for its whole lifetime: the connected
/// socket, both transport buffers, and the recorded exit cause. Owned
/// by the one thread that runs the loop; nothing else touches it.
pub struct Session<'f> {
    path: PathBuf,
    stream: UnixStream,
    inbound: TransportBuf,
    outbound: TransportBuf,
    exit_reason: ExitReason,
    error_message: Option<String>,
    saw_terminate: bool,
    flags: &'f SignalFlags,
    suspend_hook: fn(),
    winsize_hook: fn() -> io::Result<(u16, u16)>,
}

impl<'f> Session<'f> {
    pub fn new(path: PathBuf, stream: UnixStream, flags: &'f SignalFlags) -> Self {
        debug!(path = %path.display(), "session established");
        Self {
            path,
            stream,
            inbound: TransportBuf::new(),
            outbound: TransportBuf::new(),
            exit_reason: ExitReason::None,
            error_message: None,
            saw_terminate: false,
            flags,
            suspend_hook: signals::suspend_self,
            winsize_hook: handshake::window_size,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exit_reason(&self) -> ExitReason {
        self.exit_reason
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    /// Whether a termination signal cut the session short.
    pub fn saw_terminate(&self) -> bool {
        self.saw_terminate
    }

    /// Outbound queue, for the identify handshake.
    pub fn outbound_mut(&mut self) -> &mut TransportBuf {
        &mut self.outbound
    }

    /// Queue a frame; its bytes leave with the next writable readiness.
    pub fn send(&mut self, frame: &Frame) {
        frame.encode_into(&mut self.outbound);
    }

    /// Replace the suspend action invoked for a Suspend frame.
    pub fn set_suspend_hook(&mut self, hook: fn()) {
        self.suspend_hook = hook;
    }

    /// Replace the terminal-geometry query used for Resize frames.
    pub fn set_winsize_hook(&mut self, hook: fn() -> io::Result<(u16, u16)>) {
        self.winsize_hook = hook;
    }

    /// Run the event loop until the session ends.
    ///
    /// Graceful endings (including transport loss) return `Ok` with
    /// the cause in [`exit_reason`](Self::exit_reason); `Err` means a
    /// protocol fault or host failure that the process must abort on.
    pub fn run(&mut self) -> Result<(), FatalError> {
        loop {
            if self.flags.take_terminate() {
                debug!("termination signal raised, notifying server");
                self.send(&Frame::Exiting);
                self.saw_terminate = true;
                self.flush_remaining();
                break;
            }
            if self.flags.take_child_exited() {
                reap_children();
            }
            if self.flags.take_window_changed() {
                let (cols, rows) = (self.winsize_hook)().map_err(|source| FatalError::Sys {
                    what: "ioctl(TIOCGWINSZ)",
                    source,
                })?;
                debug!(cols, rows, "window changed");
                self.send(&Frame::Resize { cols, rows });
            }
            if self.flags.take_resumed() {
                signals::init().map_err(|errno| FatalError::Sys {
                    what: "signal setup",
                    source: errno.into(),
                })?;
                self.send(&Frame::Wakeup);
            }

            let revents = match self.wait_ready() {
                Ok(revents) => revents,
                Err(Errno::EINTR | Errno::EAGAIN) => continue,
                Err(errno) => {
                    return Err(FatalError::Sys {
                        what: "poll",
                        source: errno.into(),
                    });
                }
            };

            if !self.transfer(revents) {
                self.exit_reason = ExitReason::TransportLost;
                debug!("lost server");
                break;
            }

            let keep_going = self.dispatch()?;
            if !keep_going || self.exit_reason != ExitReason::None {
                // let any Exiting frame queued by the dispatcher out
                // before the socket goes away
                self.flush_remaining();
                break;
            }
        }
        Ok(())
    }

    /// Block until the socket is ready: always readable-watch, plus
    /// writable-watch while there is outbound data. No timeout — only
    /// readiness or a signal wakes the loop.
    fn wait_ready(&self) -> nix::Result<PollFlags> {
        let mut events = PollFlags::POLLIN;
        if !self.outbound.is_empty() {
            events |= PollFlags::POLLOUT;
        }
        let mut fds = [PollFd::new(self.stream.as_fd(), events)];
        poll(&mut fds, PollTimeout::NONE)?;
        Ok(fds[0].revents().unwrap_or(PollFlags::empty()))
    }

    /// One non-blocking read and one non-blocking write, as readiness
    /// reports. Returns `false` on definitive connection loss.
    ///
    /// A single read per wakeup keeps frames that arrived just before
    /// a hangup dispatchable: the close is observed on a later
    /// iteration, after the buffered frames have been acted on.
    fn transfer(&mut self, revents: PollFlags) -> bool {
        if revents.contains(PollFlags::POLLNVAL) {
            return false;
        }
        if revents.intersects(PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR) {
            let mut scratch = [0u8; READ_CHUNK];
            match (&self.stream).read(&mut scratch) {
                Ok(0) => {
                    debug!("server closed the connection");
                    return false;
                }
                Ok(n) => self.inbound.append(&scratch[..n]),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => {
                    debug!("read failed: {err}");
                    return false;
                }
            }
        }
        if revents.contains(PollFlags::POLLOUT) && !self.outbound.is_empty() {
            match (&self.stream).write(self.outbound.used()) {
                Ok(n) => self.outbound.consume(n),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => {
                    debug!("write failed: {err}");
                    return false;
                }
            }
        }
        true
    }

    /// Best-effort drain of the outbound buffer on the way out. The
    /// peer may already be gone; failures are not reported.
    fn flush_remaining(&mut self) {
        while !self.outbound.is_empty() {
            match (&self.stream).write(self.outbound.used()) {
                Ok(0) => break,
                Ok(n) => self.outbound.consume(n),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
    }

    /// Act on every complete inbound frame. Returns `false` when the
    /// loop must terminate immediately; a halting frame
    /// (Detach/Exit/Shutdown) instead records its exit reason and ends
    /// the pass, letting the loop wind down after a final flush.
    fn dispatch(&mut self) -> Result<bool, FatalError> {
        loop {
            let frame = match Frame::decode(&mut self.inbound)? {
                Some(frame) => frame,
                None => return Ok(true),
            };
            match frame {
                Frame::Detach => {
                    debug!("server requested detach");
                    self.send(&Frame::Exiting);
                    self.exit_reason = ExitReason::Detached;
                    return Ok(true);
                }
                Frame::Exit => {
                    debug!("server requested exit");
                    self.send(&Frame::Exiting);
                    self.exit_reason = ExitReason::ServerExit;
                    return Ok(true);
                }
                Frame::Shutdown => {
                    debug!("server is shutting down");
                    self.send(&Frame::Exiting);
                    self.exit_reason = ExitReason::ServerShutdown;
                    return Ok(true);
                }
                // the server already knows the session is over
                Frame::Exited => return Ok(false),
                Frame::Error { message } => {
                    warn!(%message, "server reported an error");
                    self.error_message = Some(message);
                    self.exit_reason = ExitReason::ErrorReported;
                    return Ok(false);
                }
                Frame::Suspend => (self.suspend_hook)(),
                other => return Err(FatalError::Unexpected(other.kind())),
            }
        }
    }

    /// The one-line status printed when the session ends.
    pub fn status_line(&self) -> String {
        if self.saw_terminate {
            return "[terminated]".into();
        }
        match self.exit_reason {
            ExitReason::TransportLost => "[lost server]".into(),
            ExitReason::ServerShutdown => "[server exited]".into(),
            ExitReason::ServerExit | ExitReason::None => "[exited]".into(),
            ExitReason::Detached => "[detached]".into(),
            ExitReason::ErrorReported => format!(
                "[error: {}]",
                self.error_message.as_deref().unwrap_or("unknown")
            ),
        }
    }

    /// Process exit status: zero for every graceful ending.
    pub fn exit_code(&self) -> u8 {
        if self.saw_terminate {
            return 1;
        }
        match self.exit_reason {
            ExitReason::TransportLost | ExitReason::ErrorReported => 1,
            _ => 0,
        }
    }
}

/// Collect any finished children without blocking.
fn reap_children() {
    loop {
        match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) | Err(_) => break,
            Ok(status) => debug!(?status, "reaped child"),
        }
    }
}
