//! Establishes the control-socket connection, autostarting a server
//! when none is reachable.

use std::fs;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use nix::errno::Errno;
use nix::libc;
use nix::sys::stat::{SFlag, lstat};
use thiserror::Error;
use tracing::debug;

/// Capacity of `sockaddr_un.sun_path` on this platform.
const SUN_PATH_MAX: usize = std::mem::size_of::<libc::sockaddr_un>()
    - std::mem::offset_of!(libc::sockaddr_un, sun_path);

/// Why no usable connection could be produced. All variants are
/// recoverable at the caller: the client reports them and exits
/// without entering the event loop.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("server not found")]
    NotFound(#[source] io::Error),
    #[error("socket path too long")]
    NameTooLong,
    #[error("not a socket")]
    NotASocket,
    #[error("server failed to start")]
    StartFailed(#[source] io::Error),
    #[error("socket setup failed")]
    Setup(#[source] io::Error),
}

/// Starts a server bound to a socket path and hands back an
/// already-connected stream. How the server comes up is entirely the
/// launcher's business.
pub trait ServerLauncher {
    fn start(&self, path: &Path) -> io::Result<UnixStream>;
}

/// Production launcher: spawns the server program and connects to the
/// socket it binds. The spawned child is reaped later through the
/// event loop's SIGCHLD handling.
pub struct SpawnLauncher {
    program: PathBuf,
}

const SERVER_START_ATTEMPTS: u32 = 50;
const SERVER_START_BACKOFF: Duration = Duration::from_millis(20);

impl SpawnLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl ServerLauncher for SpawnLauncher {
    fn start(&self, path: &Path) -> io::Result<UnixStream> {
        debug!(program = %self.program.display(), "starting server");
        Command::new(&self.program)
            .arg("--socket")
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        for _ in 0..SERVER_START_ATTEMPTS {
            match UnixStream::connect(path) {
                Ok(stream) => return Ok(stream),
                Err(_) => thread::sleep(SERVER_START_BACKOFF),
            }
        }
        Err(io::Error::new(
            io::ErrorKind::TimedOut,
            "server did not bind its socket",
        ))
    }
}

/// Produce a connected, non-blocking stream to the server at `path`.
///
/// A missing endpoint starts a new server when `autostart` permits; a
/// connection refusal is treated as a stale socket file left behind by
/// a dead server, which is removed before retrying the same way.
pub fn connect(
    path: &Path,
    autostart: bool,
    launcher: &dyn ServerLauncher,
) -> Result<UnixStream, ConnectError> {
    let stream = match lstat(path) {
        Err(Errno::ENOENT) => {
            if !autostart {
                return Err(ConnectError::NotFound(Errno::ENOENT.into()));
            }
            debug!(path = %path.display(), "no socket present, starting a server");
            launcher.start(path).map_err(ConnectError::StartFailed)?
        }
        Err(errno) => return Err(ConnectError::NotFound(errno.into())),
        Ok(st) => {
            if st.st_mode & SFlag::S_IFMT.bits() != SFlag::S_IFSOCK.bits() {
                return Err(ConnectError::NotASocket);
            }
            connect_existing(path, autostart, launcher)?
        }
    };
    stream.set_nonblocking(true).map_err(ConnectError::Setup)?;
    Ok(stream)
}

fn connect_existing(
    path: &Path,
    autostart: bool,
    launcher: &dyn ServerLauncher,
) -> Result<UnixStream, ConnectError> {
    if path.as_os_str().as_bytes().len() >= SUN_PATH_MAX {
        return Err(ConnectError::NameTooLong);
    }
    match UnixStream::connect(path) {
        Ok(stream) => Ok(stream),
        Err(err) if err.kind() == io::ErrorKind::ConnectionRefused => {
            // nothing is listening behind the file: a dead server left
            // its socket around
            debug!(path = %path.display(), "removing stale socket");
            fs::remove_file(path).map_err(ConnectError::NotFound)?;
            if !autostart {
                return Err(ConnectError::NotFound(err));
            }
            launcher.start(path).map_err(ConnectError::StartFailed)
        }
        Err(err) => Err(ConnectError::NotFound(err)),
    }
}
