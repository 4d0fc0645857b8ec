//! Sequence records for the ascending integer workload.

use std::fmt;

use crate::FrameError;

/// One element of the strictly ascending integer series fed to the cluster.
///
/// On the wire the payload is the ASCII decimal rendering of the value,
/// wrapped in a length-prefixed frame.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SequenceRecord(u64);

impl SequenceRecord {
    /// Create a record for the given value.
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// The integer carried by this record.
    pub fn value(&self) -> u64 {
        self.0
    }

    /// Unframed payload bytes (ASCII decimal).
    pub fn payload(&self) -> Vec<u8> {
        self.0.to_string().into_bytes()
    }

    /// Framed bytes ready to be written to a connection.
    pub fn to_frame(&self) -> Vec<u8> {
        // Decimal u64 is at most 20 bytes, far below MAX_FRAME_LEN.
        let payload = self.payload();
        let mut out = Vec::with_capacity(crate::HEADER_LEN + payload.len());
        out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        out.extend_from_slice(&payload);
        out
    }

    /// Parse a record from an unframed payload.
    pub fn from_payload(payload: &[u8]) -> Result<Self, FrameError> {
        let text = std::str::from_utf8(payload)
            .map_err(|e| FrameError::InvalidRecord(format!("not utf-8: {e}")))?;
        text.trim()
            .parse::<u64>()
            .map(Self)
            .map_err(|e| FrameError::InvalidRecord(format!("{text:?}: {e}")))
    }
}

impl From<u64> for SequenceRecord {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for SequenceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for SequenceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SequenceRecord({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{decode_frame, frame};

    #[test]
    fn record_frame_matches_generic_frame() {
        let record = SequenceRecord::new(200);
        assert_eq!(record.to_frame(), frame(b"200").unwrap());
    }

    #[test]
    fn record_payload_parses_back() {
        let record = SequenceRecord::new(42);
        let framed = record.to_frame();
        let (payload, _) = decode_frame(&framed).unwrap();
        assert_eq!(SequenceRecord::from_payload(payload).unwrap(), record);
    }

    #[test]
    fn record_rejects_non_numeric_payload() {
        let err = SequenceRecord::from_payload(b"forty-two").unwrap_err();
        assert!(matches!(err, FrameError::InvalidRecord(_)));
    }

    #[test]
    fn record_debug_and_display() {
        let record = SequenceRecord::from(7);
        assert_eq!(record.to_string(), "7");
        assert_eq!(format!("{:?}", record), "SequenceRecord(7)");
    }
}
