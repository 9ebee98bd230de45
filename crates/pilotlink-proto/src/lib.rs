//! # PilotLink Protocol
//!
//! Wire framing, message envelope and typed command catalog spoken between the
//! PilotLink server and its host agents.

#![warn(missing_docs)]

/// Length-prefixed frame primitives
pub mod frame;

/// Message envelope and type codes
pub mod message;

/// Frame codec for async streams
pub mod codec;

/// Typed request/response schemas per message type
pub mod catalog;

/// Error types for protocol operations
pub mod error;

pub use catalog::Command;
pub use codec::FrameCodec;
pub use error::ProtocolError;
pub use message::{Message, MessageType, Payload, Status};
