//! Length-prefixed frame encoding
//!
//! A frame on the wire is a 4-byte big-endian length followed by exactly that
//! many bytes of encoded [`Message`](crate::Message). Frames are written
//! back-to-back for the lifetime of a connection.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use crate::ProtocolError;

/// Size of the big-endian length prefix
pub const LENGTH_PREFIX_LEN: usize = 4;

/// Default upper bound for a declared frame length (64MB)
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Encode a payload into a standalone frame
pub fn encode(payload: &[u8]) -> Result<Bytes, ProtocolError> {
    let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_LEN + payload.len());
    encode_into(payload, &mut buf)?;
    Ok(buf.freeze())
}

/// Append a frame carrying `payload` to `dst`
pub fn encode_into(payload: &[u8], dst: &mut BytesMut) -> Result<(), ProtocolError> {
    let len = u32::try_from(payload.len()).map_err(|_| ProtocolError::FrameTooLarge {
        size: payload.len(),
        max: u32::MAX as usize,
    })?;

    dst.reserve(LENGTH_PREFIX_LEN + payload.len());
    dst.put_u32(len);
    dst.put_slice(payload);
    Ok(())
}

/// Read the declared payload length without consuming anything
pub fn peek_length(buf: &[u8]) -> Option<usize> {
    if buf.len() < LENGTH_PREFIX_LEN {
        return None;
    }
    Some((&buf[..LENGTH_PREFIX_LEN]).get_u32() as usize)
}

/// Try to extract the first complete frame from `buf`.
///
/// Returns `(0, None)` while the buffer holds less than a full frame. Otherwise
/// returns the number of bytes the frame occupies (prefix included) and its
/// payload; the caller slices that prefix off and calls again to drain any
/// further frames already buffered.
pub fn decode(buf: &[u8], max_frame_size: usize) -> Result<(usize, Option<&[u8]>), ProtocolError> {
    let len = match peek_length(buf) {
        Some(len) => len,
        None => return Ok((0, None)),
    };

    // A length we would never have sent means we lost sync with the peer
    if len > max_frame_size {
        return Err(ProtocolError::FrameTooLarge {
            size: len,
            max: max_frame_size,
        });
    }

    let end = LENGTH_PREFIX_LEN + len;
    if buf.len() < end {
        return Ok((0, None));
    }

    Ok((end, Some(&buf[LENGTH_PREFIX_LEN..end])))
}
