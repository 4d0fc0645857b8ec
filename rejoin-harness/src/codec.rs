//! Async length-prefixed frame I/O over tokio streams.

use rejoin_types::{FrameError, HEADER_LEN, MAX_FRAME_LEN};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Errors from frame I/O.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Peer closed the stream in the middle of a frame.
    #[error("stream closed mid-frame")]
    Truncated,

    /// Frame header declared an invalid length.
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// Socket error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Read one frame, returning the header and payload exactly as received.
///
/// Returns `Ok(None)` on a clean end of stream at a frame boundary.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>, CodecError>
where
    R: AsyncRead + Unpin,
{
    // Read length prefix (4 bytes, big-endian)
    let mut len_buf = [0u8; HEADER_LEN];
    let mut filled = 0;
    while filled < HEADER_LEN {
        let n = reader.read(&mut len_buf[filled..]).await?;
        if n == 0 {
            return if filled == 0 {
                Ok(None)
            } else {
                Err(CodecError::Truncated)
            };
        }
        filled += n;
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(FrameError::TooLarge {
            len,
            max: MAX_FRAME_LEN,
        }
        .into());
    }

    // Read payload
    let mut framed = vec![0u8; HEADER_LEN + len];
    framed[..HEADER_LEN].copy_from_slice(&len_buf);
    reader
        .read_exact(&mut framed[HEADER_LEN..])
        .await
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                CodecError::Truncated
            } else {
                CodecError::Io(e)
            }
        })?;

    Ok(Some(framed))
}

/// Write a payload as one frame and flush.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), CodecError>
where
    W: AsyncWrite + Unpin,
{
    let framed = rejoin_types::frame(payload)?;
    writer.write_all(&framed).await?;
    writer.flush().await?;
    Ok(())
}
