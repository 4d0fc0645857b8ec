//! Length-prefixed framing used for both input delivery and output collection.
//!
//! ```text
//! +----------------------+------------------+
//! | len: u32 big-endian  | payload (len B)  |
//! +----------------------+------------------+
//! ```

use crate::FrameError;

/// Size of the length prefix in bytes.
pub const HEADER_LEN: usize = 4;

/// Maximum payload length accepted on either side of the wire (16 MiB).
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Frame a payload: `big-endian-u32(len) ++ payload`.
///
/// # Errors
///
/// Returns [`FrameError::TooLarge`] if the payload exceeds [`MAX_FRAME_LEN`].
pub fn frame(payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    if payload.len() > MAX_FRAME_LEN {
        return Err(FrameError::TooLarge {
            len: payload.len(),
            max: MAX_FRAME_LEN,
        });
    }

    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

/// Decode the frame at the start of `bytes`.
///
/// Returns the payload and the total number of bytes consumed (header
/// included). Trailing bytes after the first frame are left untouched.
pub fn decode_frame(bytes: &[u8]) -> Result<(&[u8], usize), FrameError> {
    if bytes.len() < HEADER_LEN {
        return Err(FrameError::Incomplete {
            needed: HEADER_LEN,
            available: bytes.len(),
        });
    }

    let mut len_buf = [0u8; HEADER_LEN];
    len_buf.copy_from_slice(&bytes[..HEADER_LEN]);
    let len = u32::from_be_bytes(len_buf) as usize;

    if len > MAX_FRAME_LEN {
        return Err(FrameError::TooLarge {
            len,
            max: MAX_FRAME_LEN,
        });
    }

    let total = HEADER_LEN + len;
    if bytes.len() < total {
        return Err(FrameError::Incomplete {
            needed: total,
            available: bytes.len(),
        });
    }

    Ok((&bytes[HEADER_LEN..total], total))
}

/// Incremental decoder for a byte stream carrying back-to-back frames.
///
/// Bytes are pushed as they arrive; complete frames are popped in order.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    pending: Vec<u8>,
}

impl FrameDecoder {
    /// Create an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append newly received bytes.
    pub fn push(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    /// Pop the next complete frame payload, if one is buffered.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::TooLarge`] if the buffered header declares an
    /// oversized frame; the stream cannot be resynchronized after that.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, FrameError> {
        match decode_frame(&self.pending) {
            Ok((payload, consumed)) => {
                let payload = payload.to_vec();
                self.pending.drain(..consumed);
                Ok(Some(payload))
            }
            Err(FrameError::Incomplete { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Number of buffered bytes not yet returned as a frame.
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }
}
