// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Framed replies: `<status-byte><body>\0`.
//!
//! Reply bodies are text and must not contain NUL; the daemon guarantees
//! this by construction (JSON and human-readable tables only).

use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

use crate::status::CmdStatus;

/// Reply bodies larger than this abort the connection.
pub const MAX_REPLY: usize = 16 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("connection closed")]
    ConnectionClosed,

    #[error("timeout")]
    Timeout,

    #[error("reply exceeds {MAX_REPLY} bytes")]
    ReplyTooLarge,

    #[error("invalid status byte: {0}")]
    BadStatus(u8),

    #[error("line exceeds {0} bytes")]
    LineTooLong(usize),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Write one framed reply.
pub async fn write_reply<W>(
    writer: &mut W,
    status: CmdStatus,
    body: &[u8],
    limit: Duration,
) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let io = async {
        writer.write_all(&[status.byte()]).await?;
        writer.write_all(body).await?;
        writer.write_all(&[0u8]).await?;
        writer.flush().await?;
        Ok::<_, std::io::Error>(())
    };
    match timeout(limit, io).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(ProtocolError::Timeout),
    }
}

/// Read one framed reply: the status byte, then bytes up to the NUL.
pub async fn read_reply<R>(
    reader: &mut R,
    limit: Duration,
) -> Result<(CmdStatus, Vec<u8>), ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let io = async {
        let mut status_byte = [0u8; 1];
        if reader.read_exact(&mut status_byte).await.is_err() {
            return Err(ProtocolError::ConnectionClosed);
        }
        let status = CmdStatus::from_byte(status_byte[0])
            .ok_or(ProtocolError::BadStatus(status_byte[0]))?;

        let mut body = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            match reader.read_exact(&mut byte).await {
                Ok(_) if byte[0] == 0 => break,
                Ok(_) => {
                    if body.len() >= MAX_REPLY {
                        return Err(ProtocolError::ReplyTooLarge);
                    }
                    body.push(byte[0]);
                }
                Err(_) => return Err(ProtocolError::ConnectionClosed),
            }
        }
        Ok((status, body))
    };
    match timeout(limit, io).await {
        Ok(result) => result,
        Err(_) => Err(ProtocolError::Timeout),
    }
}

/// Read one LF-terminated command line, stripping the LF and optional CR.
/// Returns `None` on clean EOF before any byte of a new line.
pub async fn read_line<R>(
    reader: &mut R,
    max_len: usize,
) -> Result<Option<String>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        match reader.read_exact(&mut byte).await {
            Ok(_) if byte[0] == b'\n' => {
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
            }
            Ok(_) => {
                if line.len() >= max_len {
                    return Err(ProtocolError::LineTooLong(max_len));
                }
                line.push(byte[0]);
            }
            Err(_) if line.is_empty() => return Ok(None),
            Err(_) => return Err(ProtocolError::ConnectionClosed),
        }
    }
}

#[cfg(test)]
#[path = "frame_tests.rs"]
mod tests;
