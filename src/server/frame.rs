//! Fixed-capacity I/O frame.

/// Maximum number of bytes moved by a single read or write.
pub const FRAME_CAPACITY: usize = 8192;

/// A fixed-capacity byte buffer with an explicit payload length.
///
/// Each read or write on a connection moves at most one frame. The frame
/// imposes no message boundaries; framing is left to the callbacks.
///
/// The payload length is carried explicitly, so payloads containing zero
/// bytes are sent intact.
#[derive(Clone)]
pub struct Frame {
    buf: Box<[u8; FRAME_CAPACITY]>,
    len: usize,
}

impl Frame {
    pub fn new() -> Self {
        Self {
            buf: Box::new([0; FRAME_CAPACITY]),
            len: 0,
        }
    }

    pub const fn capacity(&self) -> usize {
        FRAME_CAPACITY
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Zeroes the whole buffer and empties the payload.
    pub fn clear(&mut self) {
        self.buf.fill(0);
        self.len = 0;
    }

    /// The current payload.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// Replaces the payload, truncating to the frame capacity.
    ///
    /// Returns the number of bytes stored.
    pub fn set_payload(&mut self, payload: &[u8]) -> usize {
        let n = payload.len().min(FRAME_CAPACITY);
        self.buf[..n].copy_from_slice(&payload[..n]);
        self.buf[n..].fill(0);
        self.len = n;
        n
    }

    /// The whole underlying buffer, for filling in place before
    /// [`set_len`](Self::set_len).
    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.buf[..]
    }

    /// Sets the payload length, clamped to the frame capacity.
    pub fn set_len(&mut self, len: usize) {
        self.len = len.min(FRAME_CAPACITY);
    }

    /// Length up to the first zero byte of the buffer, bounded by the
    /// capacity. Useful for callers exchanging NUL-terminated text.
    pub fn terminated_len(&self) -> usize {
        self.buf
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(FRAME_CAPACITY)
    }
}

impl Default for Frame {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame").field("len", &self.len).finish()
    }
}
