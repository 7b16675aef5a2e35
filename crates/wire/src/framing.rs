// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Length-prefixed JSON framing for the TCP transport.
//!
//! Each message is a 4-byte big-endian payload length followed by the
//! JSON payload itself.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a single frame; larger prefixes are treated as a
/// protocol violation rather than an allocation request.
pub const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

/// Errors from the framed transport.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("connection closed")]
    ConnectionClosed,

    #[error("I/O timeout")]
    Timeout,

    #[error("frame length {0} exceeds limit")]
    FrameTooLarge(u32),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Encode a value into a framed byte buffer.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, ProtocolError> {
    let payload = serde_json::to_vec(value)?;
    let mut buf = Vec::with_capacity(4 + payload.len());
    buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    buf.extend_from_slice(&payload);
    Ok(buf)
}

/// Decode one framed payload from a byte slice (length prefix included).
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtocolError> {
    if bytes.len() < 4 {
        return Err(ProtocolError::ConnectionClosed);
    }
    let len = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    if bytes.len() < 4 + len {
        return Err(ProtocolError::ConnectionClosed);
    }
    Ok(serde_json::from_slice(&bytes[4..4 + len])?)
}

/// Read one raw frame payload with a timeout.
///
/// Returns the JSON payload bytes; parsing is left to the caller so a
/// malformed payload can be answered with a parse error rather than a
/// dropped connection.
pub async fn read_frame<R>(reader: &mut R, timeout: Duration) -> Result<Vec<u8>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let frame = tokio::time::timeout(timeout, async {
        let mut len_buf = [0u8; 4];
        reader
            .read_exact(&mut len_buf)
            .await
            .map_err(|_| ProtocolError::ConnectionClosed)?;
        let len = u32::from_be_bytes(len_buf);
        if len > MAX_FRAME_LEN {
            return Err(ProtocolError::FrameTooLarge(len));
        }
        let mut payload = vec![0u8; len as usize];
        reader
            .read_exact(&mut payload)
            .await
            .map_err(|_| ProtocolError::ConnectionClosed)?;
        Ok(payload)
    })
    .await
    .map_err(|_| ProtocolError::Timeout)??;
    Ok(frame)
}

/// Write one value as a frame with a timeout.
pub async fn write_frame<W, T>(
    writer: &mut W,
    value: &T,
    timeout: Duration,
) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let buf = encode(value)?;
    tokio::time::timeout(timeout, async {
        writer.write_all(&buf).await?;
        writer.flush().await?;
        Ok::<_, std::io::Error>(())
    })
    .await
    .map_err(|_| ProtocolError::Timeout)??;
    Ok(())
}

#[cfg(test)]
#[path = "framing_tests.rs"]
mod tests;
