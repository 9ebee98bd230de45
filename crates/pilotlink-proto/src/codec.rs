//! Frame codec for async streams

use crate::frame::{self, MAX_FRAME_SIZE};
use crate::ProtocolError;
use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Frame codec for encoding/decoding frames over async streams
pub struct FrameCodec {
    /// Read buffer for incoming data
    read_buf: BytesMut,
    /// Maximum frame size allowed
    max_frame_size: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCodec {
    /// Create a new frame codec with default settings
    pub fn new() -> Self {
        Self::with_max_frame_size(MAX_FRAME_SIZE)
    }

    /// Create a new frame codec with custom max frame size
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            read_buf: BytesMut::with_capacity(8192),
            max_frame_size,
        }
    }

    /// Maximum payload size this codec accepts
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Encode a payload to bytes with length prefix
    pub fn encode_frame(&self, payload: &[u8]) -> Result<Bytes, ProtocolError> {
        if payload.len() > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size: payload.len(),
                max: self.max_frame_size,
            });
        }
        frame::encode(payload)
    }

    /// Write a single frame to an async writer and flush it
    pub async fn write_frame<W>(&self, writer: &mut W, payload: &[u8]) -> Result<(), ProtocolError>
    where
        W: AsyncWrite + Unpin,
    {
        let encoded = self.encode_frame(payload)?;
        writer.write_all(&encoded).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Read the next frame payload from an async reader.
    ///
    /// Frames already sitting in the buffer are returned before the reader is
    /// touched again. `Ok(None)` signals a clean EOF on a frame boundary.
    pub async fn read_frame<R>(&mut self, reader: &mut R) -> Result<Option<Bytes>, ProtocolError>
    where
        R: AsyncRead + Unpin,
    {
        loop {
            if let Some(payload) = self.try_decode_frame()? {
                return Ok(Some(payload));
            }

            let n = reader.read_buf(&mut self.read_buf).await?;
            if n == 0 {
                if self.read_buf.is_empty() {
                    return Ok(None);
                }
                return Err(ProtocolError::TruncatedFrame {
                    buffered: self.read_buf.len(),
                });
            }
        }
    }

    /// Try to decode one frame from the internal buffer
    pub fn try_decode_frame(&mut self) -> Result<Option<Bytes>, ProtocolError> {
        let consumed = match frame::decode(&self.read_buf, self.max_frame_size)? {
            (_, None) => return Ok(None),
            (consumed, Some(_)) => consumed,
        };

        let mut frame = self.read_buf.split_to(consumed);
        frame.advance(frame::LENGTH_PREFIX_LEN);
        Ok(Some(frame.freeze()))
    }

    /// Append raw bytes to the read buffer
    pub fn extend(&mut self, data: &[u8]) {
        self.read_buf.extend_from_slice(data);
    }

    /// Get the current buffer size
    pub fn buffer_size(&self) -> usize {
        self.read_buf.len()
    }
}
