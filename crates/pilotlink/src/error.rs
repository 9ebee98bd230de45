//! Error types for the PilotLink connection layer

use pilotlink_proto::{MessageType, ProtocolError};
use std::time::Duration;
use thiserror::Error;

/// Main error type for agent connection operations
#[derive(Debug, Error)]
pub enum PilotError {
    /// Framing or envelope errors
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The agent ran the operation and reported failure
    #[error("Agent reported failure for {kind}: {message}")]
    Remote {
        /// Message type of the failed call
        kind: MessageType,
        /// Error text sent by the agent
        message: String,
    },

    /// Response payload did not match the expected schema
    #[error("Decode error: {0}")]
    Decode(String),

    /// No response arrived in time
    #[error("Timeout after {duration:?}")]
    Timeout {
        /// Duration that was exceeded
        duration: Duration,
    },

    /// The connection closed before the operation completed
    #[error("Agent disconnected")]
    Disconnected,

    /// Identity handshake failed
    #[error("Handshake error: {0}")]
    Handshake(String),

    /// Another live connection already owns this identity
    #[error("Agent {0} is already connected")]
    DuplicateIdentity(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// A persistence or monitoring collaborator failed
    #[error("Collaborator error: {0:#}")]
    Collaborator(anyhow::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PilotError {
    /// Failures the caller may retry on the same or another connection
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Disconnected)
    }
}

impl From<toml::de::Error> for PilotError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("TOML parse error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors() {
        assert!(PilotError::Disconnected.is_transient());
        assert!(PilotError::Timeout {
            duration: Duration::from_secs(30)
        }
        .is_transient());

        let remote = PilotError::Remote {
            kind: MessageType::ServiceStart,
            message: "unit nginx.service not found".into(),
        };
        assert!(!remote.is_transient());
        assert!(!PilotError::Decode("cpu_info response".into()).is_transient());
        assert!(!PilotError::DuplicateIdentity("host-42".into()).is_transient());
    }

    #[test]
    fn test_toml_error_is_config() {
        let err: PilotError = toml::from_str::<toml::Table>("= broken").unwrap_err().into();
        assert!(matches!(err, PilotError::Config(ref msg) if msg.starts_with("TOML parse error")));
    }
}
