//! Client side of the tether control protocol.
//!
//! A `tether` client connects to (or autostarts) the background server
//! over a Unix domain socket, identifies the terminal it is attached
//! to, then runs a single-threaded poll loop that relays signals and
//! control frames until the server tells it why to stop.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use tether_protocol::{MsgKind, ProtocolError};

pub mod connect;
pub mod handshake;
pub mod session;
pub mod signals;

pub use connect::{ConnectError, ServerLauncher, SpawnLauncher, connect};
pub use session::{ExitReason, Session};

/// Client capability flags carried in the Identify handshake.
pub mod flags {
    /// Client never sends input to the session.
    pub const READ_ONLY: u32 = 0x1;
    /// Treat the terminal as UTF-8 capable regardless of locale.
    pub const FORCE_UTF8: u32 = 0x2;
}

/// Unrecoverable faults: protocol violations between client and server
/// builds, and host failures the client cannot work around. Kept apart
/// from [`ExitReason`] so graceful endings and aborts stay distinct.
#[derive(Debug, Error)]
pub enum FatalError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("unexpected {0:?} message from server")]
    Unexpected(MsgKind),
    #[error("{what}: {source}")]
    Sys {
        what: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("cannot determine tty name: {0}")]
    NoTty(#[source] io::Error),
    #[error("tty name does not fit the identify field")]
    TtyTooLong,
}

/// Per-user directory holding tether sockets.
pub fn socket_dir() -> PathBuf {
    dirs::runtime_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".tether")))
        .unwrap_or_else(|| PathBuf::from("/tmp/tether"))
}

/// Default control socket path.
pub fn default_socket_path() -> PathBuf {
    socket_dir().join("default.sock")
}
