// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire framing shared by peer links and the rendezvous service
//!
//! Every frame is a 4-byte big-endian length prefix followed by a JSON body.

use std::time::Duration;

use dsem_core::{NodeId, ProtocolMessage};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Protocol version exchanged in link handshakes
pub const PROTOCOL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Upper bound on a single frame body
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Timeout for a peer that is expected to answer
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Frames carried on a peer link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PeerFrame {
    /// First frame on every outbound link
    Hello { node_id: NodeId, version: String },
    /// A protocol message. `seq` counts frames from one sender to one
    /// receiver from zero, across reconnects.
    Message { seq: u64, message: ProtocolMessage },
    /// Receiver to sender: every frame below `next_seq` has been delivered
    Received { next_seq: u64 },
}

impl PeerFrame {
    pub fn hello(node_id: NodeId) -> Self {
        PeerFrame::Hello {
            node_id,
            version: PROTOCOL_VERSION.to_string(),
        }
    }
}

/// Framing errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("connection closed")]
    ConnectionClosed,

    #[error("timeout")]
    Timeout,
}

/// Serialize a value to a JSON frame body (no length prefix)
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, ProtocolError> {
    Ok(serde_json::to_vec(value)?)
}

/// Deserialize a JSON frame body
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtocolError> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Write one length-prefixed frame and flush
pub async fn write_message<W: AsyncWrite + Unpin>(
    writer: &mut W,
    data: &[u8],
) -> Result<(), ProtocolError> {
    if data.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            size: data.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }
    let len = data.len() as u32;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(data).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed frame.
///
/// Returns [`ProtocolError::ConnectionClosed`] only for a clean EOF at a frame
/// boundary; an EOF inside a frame is an IO error.
pub async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>, ProtocolError> {
    let mut len_buf = [0u8; 4];
    if reader.read(&mut len_buf[..1]).await? == 0 {
        return Err(ProtocolError::ConnectionClosed);
    }
    reader.read_exact(&mut len_buf[1..]).await?;

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            size: len,
            max: MAX_MESSAGE_SIZE,
        });
    }

    let mut data = vec![0u8; len];
    reader.read_exact(&mut data).await?;
    Ok(data)
}

/// Encode and write a value as one frame
pub async fn send<W, T>(writer: &mut W, value: &T) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let data = encode(value)?;
    write_message(writer, &data).await
}

/// Read and decode one frame
pub async fn recv<R, T>(reader: &mut R) -> Result<T, ProtocolError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let data = read_message(reader).await?;
    decode(&data)
}

/// [`send`] bounded by `timeout`
pub async fn send_with_timeout<W, T>(
    writer: &mut W,
    value: &T,
    timeout: Duration,
) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    tokio::time::timeout(timeout, send(writer, value))
        .await
        .map_err(|_| ProtocolError::Timeout)?
}

/// [`recv`] bounded by `timeout`
pub async fn recv_with_timeout<R, T>(reader: &mut R, timeout: Duration) -> Result<T, ProtocolError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    tokio::time::timeout(timeout, recv(reader))
        .await
        .map_err(|_| ProtocolError::Timeout)?
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
