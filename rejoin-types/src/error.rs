//! Error types for rejoin wire handling.

use thiserror::Error;

/// Errors that can occur while framing or parsing wire data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Payload exceeds the maximum frame length.
    #[error("frame too large: {len} > {max}")]
    TooLarge {
        /// Declared or actual payload length.
        len: usize,
        /// Maximum allowed payload length.
        max: usize,
    },

    /// Not enough bytes to hold the declared frame.
    #[error("incomplete frame: need {needed} bytes, have {available}")]
    Incomplete {
        /// Total bytes required (header plus payload).
        needed: usize,
        /// Bytes actually available.
        available: usize,
    },

    /// Payload is not a valid sequence record.
    #[error("invalid record: {0}")]
    InvalidRecord(String),
}
