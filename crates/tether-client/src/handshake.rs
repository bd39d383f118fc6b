//! Builds the Identify frame describing the attaching terminal.

use std::env;
use std::io::{self, IsTerminal};

use nix::errno::Errno;
use nix::libc;
use nix::pty::Winsize;
use nix::unistd::ttyname;
use tracing::debug;

use tether_protocol::{Frame, Identify, PATH_LEN, PROTOCOL_VERSION, TERM_LEN, TTY_LEN, TransportBuf};

use crate::FatalError;

/// Current terminal geometry as `(cols, rows)`.
pub(crate) fn window_size() -> io::Result<(u16, u16)> {
    let mut ws: Winsize = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::ioctl(libc::STDIN_FILENO, libc::TIOCGWINSZ, &mut ws) };
    if rc == -1 {
        return Err(Errno::last().into());
    }
    Ok((ws.ws_col, ws.ws_row))
}

/// Queue the one-time Identify frame, if stdin is a real terminal.
///
/// Returns whether a frame was sent. A connection that never
/// identifies is treated by the server as a non-interactive control
/// client, so a non-tty stdin is not an error. Missing cwd and TERM
/// degrade to empty fields; a terminal with no tty name is a
/// contradiction and fatal.
pub fn send_identify(flags: u32, outbound: &mut TransportBuf) -> Result<bool, FatalError> {
    if !io::stdin().is_terminal() {
        debug!("stdin is not a terminal, skipping identify");
        return Ok(false);
    }

    let (cols, rows) = window_size().map_err(|source| FatalError::Sys {
        what: "ioctl(TIOCGWINSZ)",
        source,
    })?;

    let cwd = env::current_dir()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default();
    let cwd = if cwd.len() >= PATH_LEN { String::new() } else { cwd };

    let term = env::var("TERM").unwrap_or_default();
    let term = if term.len() >= TERM_LEN {
        String::new()
    } else {
        term
    };

    let tty = ttyname(io::stdin())
        .map_err(|errno| FatalError::NoTty(errno.into()))?
        .to_string_lossy()
        .into_owned();
    if tty.len() >= TTY_LEN {
        return Err(FatalError::TtyTooLong);
    }

    debug!(cols, rows, %tty, "identifying terminal to server");
    Frame::Identify(Identify {
        version: PROTOCOL_VERSION,
        flags,
        cols,
        rows,
        cwd,
        term,
        tty,
    })
    .encode_into(outbound);
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_identify_without_a_terminal() {
        if io::stdin().is_terminal() {
            // under a real terminal the non-interactive path is
            // unreachable; nothing to check here
            return;
        }
        let mut outbound = TransportBuf::new();
        let sent = send_identify(0, &mut outbound).unwrap();
        assert!(!sent);
        assert!(outbound.is_empty());
    }
}
