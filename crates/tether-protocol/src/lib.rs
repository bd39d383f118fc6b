//! Wire protocol for the tether control socket.
//!
//! Every message is one frame: an 8-byte header (`kind`, `payload_len`,
//! both `u32` in host byte order — the socket never leaves the machine)
//! followed by exactly `payload_len` payload bytes. Payload sizes are
//! fixed per kind; a header that disagrees is a protocol fault, not
//! something to resynchronize from.

mod buffer;
mod frame;

pub use buffer::TransportBuf;
pub use frame::{
    ERROR_LEN, Frame, FrameHeader, HEADER_LEN, Identify, MsgKind, PATH_LEN, ProtocolError,
    TERM_LEN, TTY_LEN,
};

/// Handshake version; the server rejects clients it does not match.
pub const PROTOCOL_VERSION: u32 = 1;
