//! Wire protocol shared between the broker and its clients.
//!
//! Every message travels as one 4-byte unsigned length prefix followed by
//! that many raw payload bytes, written as two consecutive writes on the
//! same socket. A peer closing its connection shows up as a zero-length
//! read on the length prefix, never as an in-band message.

use bytes::Bytes;
use std::io::{Error, ErrorKind};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size of the length prefix in bytes.
pub const LEN_PREFIX_SIZE: usize = 4;

/// Upper bound on a single frame's payload. Anything larger is treated as
/// a protocol violation and drops the connection.
pub const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

/// Reads one framed message.
///
/// Returns `Ok(None)` when the peer performed an orderly shutdown, i.e.
/// the connection hit end-of-stream on the first byte of the length
/// prefix. A prefix or payload cut short mid-frame is an error, as is a
/// length above [`MAX_FRAME_LEN`]; partial messages are never surfaced.
pub async fn read_frame<R>(reader: &mut R) -> std::io::Result<Option<Bytes>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; LEN_PREFIX_SIZE];
    let n = reader.read(&mut len_buf).await?;
    if n == 0 {
        // Orderly peer shutdown before the next frame started.
        return Ok(None);
    }
    if n < LEN_PREFIX_SIZE {
        reader.read_exact(&mut len_buf[n..]).await?;
    }

    // Host byte order on both ends; the prefix never crosses architectures
    // in this deployment.
    let len = u32::from_ne_bytes(len_buf);
    if len > MAX_FRAME_LEN {
        return Err(Error::new(
            ErrorKind::InvalidData,
            format!("frame length {} exceeds maximum {}", len, MAX_FRAME_LEN),
        ));
    }

    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;
    Ok(Some(Bytes::from(payload)))
}

/// Writes one framed message: the length prefix, then the payload.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|len| *len <= MAX_FRAME_LEN)
        .ok_or_else(|| {
            Error::new(
                ErrorKind::InvalidInput,
                format!("payload of {} bytes exceeds maximum frame size", payload.len()),
            )
        })?;

    writer.write_all(&len.to_ne_bytes()).await?;
    writer.write_all(payload).await?;
    Ok(())
}
