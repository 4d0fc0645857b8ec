//! # rejoin-types
//!
//! Wire format types shared by every rejoin crate:
//! - [`frame`], [`decode_frame`], [`FrameDecoder`] - big-endian u32 length-prefixed framing
//! - [`SequenceRecord`] - one element of the ascending integer workload
//! - [`FrameError`] - error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod frame;
mod record;

pub use error::FrameError;
pub use frame::{decode_frame, frame, FrameDecoder, HEADER_LEN, MAX_FRAME_LEN};
pub use record::SequenceRecord;
