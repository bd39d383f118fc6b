use thiserror::Error;

use crate::buffer::TransportBuf;

/// Header size on the wire: `kind: u32` then `payload_len: u32`.
pub const HEADER_LEN: usize = 8;

/// Capacity of the Identify working-directory field.
pub const PATH_LEN: usize = 1024;
/// Capacity of the Identify TERM field.
pub const TERM_LEN: usize = 256;
/// Capacity of the Identify tty-device field.
pub const TTY_LEN: usize = 256;
/// Capacity of the Error message field.
pub const ERROR_LEN: usize = 512;

const IDENTIFY_LEN: usize = 4 + 4 + 2 + 2 + PATH_LEN + TERM_LEN + TTY_LEN;
const RESIZE_LEN: usize = 4;

/// Message kinds carried in the frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum MsgKind {
    Identify = 1,
    Resize = 2,
    Exiting = 3,
    Wakeup = 4,
    Detach = 5,
    Exit = 6,
    Exited = 7,
    Shutdown = 8,
    Suspend = 9,
    Error = 10,
}

impl MsgKind {
    fn from_wire(raw: u32) -> Option<Self> {
        Some(match raw {
            1 => Self::Identify,
            2 => Self::Resize,
            3 => Self::Exiting,
            4 => Self::Wakeup,
            5 => Self::Detach,
            6 => Self::Exit,
            7 => Self::Exited,
            8 => Self::Shutdown,
            9 => Self::Suspend,
            10 => Self::Error,
            _ => return None,
        })
    }

    /// The exact payload size this kind must carry.
    pub const fn payload_len(self) -> usize {
        match self {
            Self::Identify => IDENTIFY_LEN,
            Self::Resize => RESIZE_LEN,
            Self::Error => ERROR_LEN,
            _ => 0,
        }
    }
}

/// Fatal framing violations. Never recovered from: once the offset is
/// suspect the stream cannot be trusted again.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("unknown message kind {0}")]
    UnknownKind(u32),
    #[error("bad {kind:?} payload size {got} (expected {expected})")]
    BadSize { kind: MsgKind, got: u32, expected: u32 },
}

/// Raw frame header as read off the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub kind: u32,
    pub payload_len: u32,
}

impl FrameHeader {
    fn peek(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < HEADER_LEN {
            return None;
        }
        Some(Self {
            kind: u32::from_ne_bytes(bytes[0..4].try_into().unwrap()),
            payload_len: u32::from_ne_bytes(bytes[4..8].try_into().unwrap()),
        })
    }
}

/// Identify payload: everything the server needs to know about the
/// attaching terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identify {
    pub version: u32,
    pub flags: u32,
    pub cols: u16,
    pub rows: u16,
    pub cwd: String,
    pub term: String,
    pub tty: String,
}

/// One complete control message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Identify(Identify),
    Resize { cols: u16, rows: u16 },
    Exiting,
    Wakeup,
    Detach,
    Exit,
    Exited,
    Shutdown,
    Suspend,
    Error { message: String },
}

impl Frame {
    pub fn kind(&self) -> MsgKind {
        match self {
            Self::Identify(_) => MsgKind::Identify,
            Self::Resize { .. } => MsgKind::Resize,
            Self::Exiting => MsgKind::Exiting,
            Self::Wakeup => MsgKind::Wakeup,
            Self::Detach => MsgKind::Detach,
            Self::Exit => MsgKind::Exit,
            Self::Exited => MsgKind::Exited,
            Self::Shutdown => MsgKind::Shutdown,
            Self::Suspend => MsgKind::Suspend,
            Self::Error { .. } => MsgKind::Error,
        }
    }

    /// Serialize header plus payload onto the tail of `buf`.
    pub fn encode_into(&self, buf: &mut TransportBuf) {
        let kind = self.kind();
        buf.append(&(kind as u32).to_ne_bytes());
        buf.append(&(kind.payload_len() as u32).to_ne_bytes());
        match self {
            Self::Identify(id) => {
                buf.append(&id.version.to_ne_bytes());
                buf.append(&id.flags.to_ne_bytes());
                buf.append(&id.cols.to_ne_bytes());
                buf.append(&id.rows.to_ne_bytes());
                put_fixed_str(buf, &id.cwd, PATH_LEN);
                put_fixed_str(buf, &id.term, TERM_LEN);
                put_fixed_str(buf, &id.tty, TTY_LEN);
            }
            Self::Resize { cols, rows } => {
                buf.append(&cols.to_ne_bytes());
                buf.append(&rows.to_ne_bytes());
            }
            Self::Error { message } => {
                put_fixed_str(buf, message, ERROR_LEN);
            }
            _ => {}
        }
    }

    /// Consume and return the next complete frame, or `Ok(None)` while
    /// less than one full frame is buffered.
    ///
    /// The header is validated as soon as it is readable, so a corrupt
    /// length faults immediately instead of stalling on a payload that
    /// will never arrive.
    pub fn decode(buf: &mut TransportBuf) -> Result<Option<Frame>, ProtocolError> {
        let Some(header) = FrameHeader::peek(buf.used()) else {
            return Ok(None);
        };
        let kind =
            MsgKind::from_wire(header.kind).ok_or(ProtocolError::UnknownKind(header.kind))?;
        let expected = kind.payload_len();
        if header.payload_len as usize != expected {
            return Err(ProtocolError::BadSize {
                kind,
                got: header.payload_len,
                expected: expected as u32,
            });
        }
        if buf.len() < HEADER_LEN + expected {
            return Ok(None);
        }
        buf.consume(HEADER_LEN);
        let frame = {
            let payload = &buf.used()[..expected];
            match kind {
                MsgKind::Identify => Frame::Identify(Identify {
                    version: u32::from_ne_bytes(payload[0..4].try_into().unwrap()),
                    flags: u32::from_ne_bytes(payload[4..8].try_into().unwrap()),
                    cols: u16::from_ne_bytes(payload[8..10].try_into().unwrap()),
                    rows: u16::from_ne_bytes(payload[10..12].try_into().unwrap()),
                    cwd: take_str(&payload[12..12 + PATH_LEN]),
                    term: take_str(&payload[12 + PATH_LEN..12 + PATH_LEN + TERM_LEN]),
                    tty: take_str(&payload[12 + PATH_LEN + TERM_LEN..]),
                }),
                MsgKind::Resize => Frame::Resize {
                    cols: u16::from_ne_bytes(payload[0..2].try_into().unwrap()),
                    rows: u16::from_ne_bytes(payload[2..4].try_into().unwrap()),
                },
                MsgKind::Error => Frame::Error {
                    // force a terminator inside the fixed field: the
                    // last byte never contributes to the message
                    message: take_str(&payload[..ERROR_LEN - 1]),
                },
                MsgKind::Exiting => Frame::Exiting,
                MsgKind::Wakeup => Frame::Wakeup,
                MsgKind::Detach => Frame::Detach,
                MsgKind::Exit => Frame::Exit,
                MsgKind::Exited => Frame::Exited,
                MsgKind::Shutdown => Frame::Shutdown,
                MsgKind::Suspend => Frame::Suspend,
            }
        };
        buf.consume(expected);
        Ok(Some(frame))
    }
}

const ZEROS: [u8; PATH_LEN] = [0; PATH_LEN];

/// Write `s` into a fixed `cap`-byte field, NUL-padded. Overlong input
/// is clipped to leave room for the terminator; callers enforce their
/// own overflow policy before getting here.
fn put_fixed_str(buf: &mut TransportBuf, s: &str, cap: usize) {
    let bytes = s.as_bytes();
    let n = bytes.len().min(cap - 1);
    buf.append(&bytes[..n]);
    buf.append(&ZEROS[..cap - n]);
}

/// Read a fixed field up to its first NUL (or the field end).
fn take_str(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(frame: &Frame) -> Vec<u8> {
        let mut buf = TransportBuf::new();
        frame.encode_into(&mut buf);
        buf.used().to_vec()
    }

    fn sample_identify() -> Frame {
        Frame::Identify(Identify {
            version: crate::PROTOCOL_VERSION,
            flags: 0x3,
            cols: 80,
            rows: 24,
            cwd: "/home/user/project".into(),
            term: "xterm-256color".into(),
            tty: "/dev/pts/4".into(),
        })
    }

    #[test]
    fn test_identify_round_trip() {
        let frame = sample_identify();
        let mut buf = TransportBuf::new();
        frame.encode_into(&mut buf);
        assert_eq!(buf.len(), HEADER_LEN + MsgKind::Identify.payload_len());

        let decoded = Frame::decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, frame);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_resize_round_trip() {
        let frame = Frame::Resize {
            cols: 132,
            rows: 43,
        };
        let mut buf = TransportBuf::new();
        frame.encode_into(&mut buf);
        assert_eq!(Frame::decode(&mut buf).unwrap(), Some(frame));
    }

    #[test]
    fn test_empty_payload_kinds_round_trip() {
        for frame in [
            Frame::Exiting,
            Frame::Wakeup,
            Frame::Detach,
            Frame::Exit,
            Frame::Exited,
            Frame::Shutdown,
            Frame::Suspend,
        ] {
            let mut buf = TransportBuf::new();
            frame.encode_into(&mut buf);
            assert_eq!(buf.len(), HEADER_LEN);
            assert_eq!(Frame::decode(&mut buf).unwrap(), Some(frame));
        }
    }

    #[test]
    fn test_decode_is_chunking_invariant() {
        // Same frames, delivered one byte at a time, must come out
        // identical to a single contiguous delivery.
        let mut wire = Vec::new();
        wire.extend_from_slice(&encode(&Frame::Suspend));
        wire.extend_from_slice(&encode(&Frame::Resize { cols: 10, rows: 5 }));
        wire.extend_from_slice(&encode(&sample_identify()));
        wire.extend_from_slice(&encode(&Frame::Shutdown));

        let mut whole = TransportBuf::new();
        whole.append(&wire);
        let mut expected = Vec::new();
        while let Some(frame) = Frame::decode(&mut whole).unwrap() {
            expected.push(frame);
        }
        assert_eq!(expected.len(), 4);

        let mut trickle = TransportBuf::new();
        let mut got = Vec::new();
        for &byte in &wire {
            trickle.append(&[byte]);
            while let Some(frame) = Frame::decode(&mut trickle).unwrap() {
                got.push(frame);
            }
        }
        assert_eq!(got, expected);
        assert!(trickle.is_empty());
    }

    #[test]
    fn test_partial_header_is_not_a_frame() {
        let mut buf = TransportBuf::new();
        buf.append(&(MsgKind::Detach as u32).to_ne_bytes());
        assert_eq!(Frame::decode(&mut buf).unwrap(), None);
        // nothing consumed while incomplete
        assert_eq!(buf.len(), 4);
    }

    #[test]
    fn test_bad_size_is_fatal() {
        let mut buf = TransportBuf::new();
        buf.append(&(MsgKind::Detach as u32).to_ne_bytes());
        buf.append(&7u32.to_ne_bytes());
        assert_eq!(
            Frame::decode(&mut buf),
            Err(ProtocolError::BadSize {
                kind: MsgKind::Detach,
                got: 7,
                expected: 0,
            })
        );
    }

    #[test]
    fn test_bad_size_faults_before_payload_arrives() {
        // Resize claiming a giant payload must fault on the header
        // alone, not wait for bytes that will never come.
        let mut buf = TransportBuf::new();
        buf.append(&(MsgKind::Resize as u32).to_ne_bytes());
        buf.append(&u32::MAX.to_ne_bytes());
        assert!(matches!(
            Frame::decode(&mut buf),
            Err(ProtocolError::BadSize { .. })
        ));
    }

    #[test]
    fn test_unknown_kind_is_fatal() {
        let mut buf = TransportBuf::new();
        buf.append(&99u32.to_ne_bytes());
        buf.append(&0u32.to_ne_bytes());
        assert_eq!(Frame::decode(&mut buf), Err(ProtocolError::UnknownKind(99)));
    }

    #[test]
    fn test_error_message_round_trip() {
        let frame = Frame::Error {
            message: "session create failed".into(),
        };
        let mut buf = TransportBuf::new();
        frame.encode_into(&mut buf);
        assert_eq!(buf.len(), HEADER_LEN + ERROR_LEN);
        assert_eq!(Frame::decode(&mut buf).unwrap(), Some(frame));
    }

    #[test]
    fn test_error_without_terminator_is_truncated() {
        // A full field of non-NUL bytes still yields a terminated
        // string of ERROR_LEN - 1 characters.
        let mut buf = TransportBuf::new();
        buf.append(&(MsgKind::Error as u32).to_ne_bytes());
        buf.append(&(ERROR_LEN as u32).to_ne_bytes());
        buf.append(&[b'x'; ERROR_LEN]);

        let Some(Frame::Error { message }) = Frame::decode(&mut buf).unwrap() else {
            panic!("expected an Error frame");
        };
        assert_eq!(message.len(), ERROR_LEN - 1);
        assert!(message.bytes().all(|b| b == b'x'));
    }

    #[test]
    fn test_overlong_fixed_field_keeps_terminator() {
        let frame = Frame::Error {
            message: "y".repeat(ERROR_LEN * 2),
        };
        let mut buf = TransportBuf::new();
        frame.encode_into(&mut buf);
        assert_eq!(buf.len(), HEADER_LEN + ERROR_LEN);

        let Some(Frame::Error { message }) = Frame::decode(&mut buf).unwrap() else {
            panic!("expected an Error frame");
        };
        assert_eq!(message.len(), ERROR_LEN - 1);
    }
}
