//! Buffered decoding of RELP frames from byte streams.

use crate::error::ProtocolError;
use crate::frame::Frame;
use bytes::{Bytes, BytesMut};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Default read buffer size (8 KiB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8 * 1024;

/// Accumulates bytes and decodes frames out of them.
pub struct Decoder {
    buffer: BytesMut,
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
        }
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Appends bytes to the internal buffer.
    pub fn extend_bytes(&mut self, data: Bytes) {
        self.buffer.extend_from_slice(&data);
    }

    /// Attempts to decode the next frame from the buffer.
    pub fn decode_frame(&mut self) -> Result<Option<Frame>, ProtocolError> {
        Frame::decode(&mut self.buffer)
    }

    /// Returns whether the buffered bytes, if any, are still inside the txn token
    /// of the next frame.
    pub fn in_txn_token(&self) -> bool {
        !self.buffer.iter().any(|&b| b == b' ' || b == b'\n')
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Reads whole frames from an async byte stream.
///
/// Each reader owns one decode cursor, so frames come out in wire order.
/// `read_frame` is cancel safe: partial input stays buffered across calls.
pub struct FrameReader<R> {
    reader: R,
    decoder: Decoder,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self::with_buffer_size(reader, DEFAULT_READ_BUFFER_SIZE)
    }

    pub fn with_buffer_size(reader: R, size: usize) -> Self {
        Self {
            reader,
            decoder: Decoder::new(),
            buf: vec![0u8; size.max(1)],
        }
    }

    /// Reads the next frame.
    ///
    /// Returns `Ok(None)` at end of stream. End of input inside the txn token
    /// and a reset by the peer both count as end of stream; end of input
    /// anywhere later in a frame is `ProtocolError::Truncated`.
    pub async fn read_frame(&mut self) -> Result<Option<Frame>, ProtocolError> {
        loop {
            if let Some(frame) = self.decoder.decode_frame()? {
                tracing::trace!("Decoded frame txn={} command={}", frame.txn, frame.command);
                return Ok(Some(frame));
            }

            let n = match self.reader.read(&mut self.buf).await {
                Ok(n) => n,
                Err(e) if is_reset(&e) => {
                    tracing::debug!("Stream reset by peer: {}", e);
                    return Ok(None);
                }
                Err(e) => return Err(ProtocolError::Io(e)),
            };

            if n == 0 {
                if self.decoder.in_txn_token() {
                    return Ok(None);
                }
                return Err(ProtocolError::Truncated {
                    buffered: self.decoder.buffered(),
                });
            }

            self.decoder.extend(&self.buf[..n]);
        }
    }

    /// Returns the number of bytes read but not yet decoded.
    pub fn buffered(&self) -> usize {
        self.decoder.buffered()
    }
}

/// Encodes `frame` and writes it to `writer`, flushing afterwards.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    frame: &Frame,
) -> Result<(), ProtocolError> {
    let encoded = frame.encode()?;
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    tracing::trace!(
        "Wrote frame txn={} command={} ({} bytes)",
        frame.txn,
        frame.command,
        encoded.len()
    );
    Ok(())
}

fn is_reset(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted
    )
}
