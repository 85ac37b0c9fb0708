//! Length-prefixed framing.
//!
//! Each frame is a 4-byte big-endian length followed by that many bytes.

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::ProtoError;

/// Largest frame either side will send or accept (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), ProtoError>
where
    W: AsyncWrite + Unpin,
{
    if payload.is_empty() {
        return Err(ProtoError::EmptyFrame);
    }
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|&n| n as usize <= MAX_FRAME_SIZE)
        .ok_or(ProtoError::FrameTooLarge {
            size: payload.len(),
            max: MAX_FRAME_SIZE,
        })?;
    writer.write_u32(len).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame. `Ok(None)` means the peer closed cleanly between frames.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>, ProtoError>
where
    R: AsyncRead + Unpin,
{
    let len = match reader.read_u32().await {
        Ok(n) => n as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if len == 0 {
        return Err(ProtoError::EmptyFrame);
    }
    if len > MAX_FRAME_SIZE {
        return Err(ProtoError::FrameTooLarge {
            size: len,
            max: MAX_FRAME_SIZE,
        });
    }
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(Some(buf))
}

/// Write a plaintext JSON frame (handshake only).
pub async fn write_json<W, T>(writer: &mut W, message: &T) -> Result<(), ProtoError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let bytes = serde_json::to_vec(message)?;
    write_frame(writer, &bytes).await
}

/// Read a plaintext JSON frame; a closed stream is [`ProtoError::Closed`].
pub async fn read_json<R, T>(reader: &mut R) -> Result<T, ProtoError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let frame = read_frame(reader).await?.ok_or(ProtoError::Closed)?;
    Ok(serde_json::from_slice(&frame)?)
}
