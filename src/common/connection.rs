//! # Framed Connection Halves
//!
//! Wrappers around the two halves of a TCP stream that speak the
//! terminator-framed protocol from [`codec`](super::codec).
//!
//! The reader owns the bytes left over from the previous read, so a frame split
//! across TCP segments is reassembled before it is parsed.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::codec;
use super::error::NetError;
use super::messages::Message;

const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Reading half of a framed connection.
pub struct FrameReader<R> {
    reader: R,
    /// Trailing fragment from the previous read.
    buffer: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buffer: Vec::new(),
        }
    }

    /// Read until at least one complete message is available.
    ///
    /// # Returns
    /// - `Ok(Some(messages))`: one or more messages, in wire order
    /// - `Ok(None)`: the peer closed the stream (a dangling fragment is dropped)
    /// - `Err`: I/O failure, malformed or oversized frame
    pub async fn read_messages(&mut self) -> Result<Option<Vec<Message>>, NetError> {
        let mut chunk = [0u8; READ_CHUNK_SIZE];

        loop {
            let n = self.reader.read(&mut chunk).await?;
            if n == 0 {
                if !self.buffer.is_empty() {
                    log::debug!(
                        "Dropping {} byte fragment at end of stream",
                        self.buffer.len()
                    );
                }
                return Ok(None);
            }

            self.buffer.extend_from_slice(&chunk[..n]);
            let decoded = codec::decode(&self.buffer)?;
            self.buffer = decoded.remainder;

            if !decoded.messages.is_empty() {
                return Ok(Some(decoded.messages));
            }
        }
    }
}

/// Writing half of a framed connection.
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Encode, write and flush one message.
    pub async fn write_message(&mut self, message: &Message) -> Result<(), NetError> {
        let frame = codec::encode(message)?;
        self.writer.write_all(&frame).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Flush and shut down the write side.
    pub async fn shutdown(&mut self) -> Result<(), NetError> {
        self.writer.shutdown().await?;
        Ok(())
    }
}
