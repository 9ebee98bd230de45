//! Error types for protocol operations

use thiserror::Error;
use crate::message::MessageType;

/// Protocol-specific errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Payload did not match the schema expected for its message type
    #[error("Payload decode error for {kind}: {reason}")]
    PayloadDecode {
        /// Message type whose payload was being bound
        kind: MessageType,
        /// Decoder failure
        reason: String,
    },

    /// Declared frame length exceeds what the codec accepts.
    ///
    /// Treated as a desynchronised stream; the connection must be dropped.
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge {
        /// Declared or actual frame size
        size: usize,
        /// Maximum allowed size
        max: usize,
    },

    /// Stream ended in the middle of a frame
    #[error("Stream ended mid-frame with {buffered} bytes buffered")]
    TruncatedFrame {
        /// Bytes left in the read buffer at EOF
        buffered: usize,
    },

    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Whether this error means the byte stream can no longer be trusted
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::PayloadDecode { .. })
    }
}

impl From<rmp_serde::encode::Error> for ProtocolError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        Self::Serialization(format!("MessagePack encode error: {}", err))
    }
}

impl From<rmp_serde::decode::Error> for ProtocolError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        Self::Serialization(format!("MessagePack decode error: {}", err))
    }
}
