//! Length-prefixed frames exchanged with endorsing peers.
//!
//! Requests are `[opcode u8][len u32 LE][payload]`. Responses reuse the same
//! header with a status byte in place of the opcode: `0` carries the encoded
//! response, any other value is an [`RpcCode`] followed by a UTF-8 message.

use super::{RpcCode, RpcStatus};
use std::convert::TryInto;
use std::io;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const HEADER_LEN: usize = 5;
pub const OP_PROCESS_PROPOSAL: u8 = 0x01;
pub const STATUS_OK: u8 = RpcCode::Ok as u8;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame io error: {0}")]
    Io(#[from] io::Error),
    #[error("frame of {len} bytes exceeds limit of {limit} bytes")]
    TooLarge { len: usize, limit: usize },
}

impl FrameError {
    pub fn to_status(&self) -> RpcStatus {
        match self {
            FrameError::Io(err) => RpcStatus::from_io(err),
            FrameError::TooLarge { .. } => {
                RpcStatus::new(RpcCode::ResourceExhausted, self.to_string())
            }
        }
    }
}

pub async fn write_frame<W>(
    writer: &mut W,
    tag: u8,
    payload: &[u8],
    limit: usize,
) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    if payload.len() > limit || payload.len() > u32::MAX as usize {
        return Err(FrameError::TooLarge {
            len: payload.len(),
            limit,
        });
    }
    let mut header = [0u8; HEADER_LEN];
    header[0] = tag;
    header[1..5].copy_from_slice(&(payload.len() as u32).to_le_bytes());
    writer.write_all(&header).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one frame; the payload is not consumed when it exceeds `limit`.
pub async fn read_frame<R>(reader: &mut R, limit: usize) -> Result<(u8, Vec<u8>), FrameError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut header = [0u8; HEADER_LEN];
    reader.read_exact(&mut header).await?;
    let len_bytes: [u8; 4] = header[1..5]
        .try_into()
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "short frame header"))?;
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > limit {
        return Err(FrameError::TooLarge { len, limit });
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok((header[0], payload))
}

/// Interprets a response frame.
pub fn response_from_frame(status: u8, payload: Vec<u8>) -> Result<Vec<u8>, RpcStatus> {
    if status == STATUS_OK {
        return Ok(payload);
    }
    Err(RpcStatus::new(
        RpcCode::from_u8(status),
        String::from_utf8_lossy(&payload).into_owned(),
    ))
}

/// Writes a failed response frame carrying `status`.
pub async fn write_status<W>(writer: &mut W, status: &RpcStatus, limit: usize) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let code = match status.code {
        RpcCode::Ok => RpcCode::Unknown,
        code => code,
    };
    write_frame(writer, code.as_u8(), status.message.as_bytes(), limit).await
}
