use bytes::{Buf, BytesMut};

/// Growable byte queue used for both socket directions.
///
/// Bytes are appended at the tail and consumed from the head; `used`
/// exposes the buffered span without copying. The storage is owned
/// exclusively by the buffer.
#[derive(Debug, Default)]
pub struct TransportBuf {
    buf: BytesMut,
}

impl TransportBuf {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(4096),
        }
    }

    /// Append bytes at the tail.
    pub fn append(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// The buffered bytes, oldest first.
    pub fn used(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Drop `n` bytes from the head.
    ///
    /// Panics if `n` exceeds the buffered length; callers check `len`
    /// first, so this is never reachable from wire input.
    pub fn consume(&mut self, n: usize) {
        self.buf.advance(n);
    }
}
