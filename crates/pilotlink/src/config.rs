//! Server configuration
//!
//! Loaded from a TOML file; every key is optional and falls back to the
//! defaults below.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::{PilotError, Result};

/// What to do when a second connection announces an identity that is
/// already registered
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    /// The new connection takes over; the old one is closed without
    /// flipping the identity offline
    #[default]
    Evict,
    /// The new connection is closed and the old one stays authoritative
    Reject,
}

/// Agent listener configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address of the dedicated agent listener
    pub listen_addr: SocketAddr,
    /// Timeout for every synchronous remote call, in seconds
    pub call_timeout_secs: u64,
    /// Timeout for the identity query after accept, in seconds
    pub handshake_timeout_secs: u64,
    /// Outbound messages buffered per connection before producers block
    pub outbound_queue_capacity: usize,
    /// Inbound handlers running at once per connection
    pub max_concurrent_handlers: usize,
    /// Inbound handler work queued behind the running handlers; overflowing
    /// it closes the connection
    pub handler_queue_capacity: usize,
    /// Largest frame payload accepted
    pub max_frame_size: usize,
    /// Duplicate identity handling
    pub duplicate_identity: DuplicatePolicy,
    /// Log filter used when `RUST_LOG` is unset
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8879)),
            call_timeout_secs: 30,
            handshake_timeout_secs: 10,
            outbound_queue_capacity: 50,
            max_concurrent_handlers: 64,
            handler_queue_capacity: 256,
            max_frame_size: pilotlink_proto::frame::MAX_FRAME_SIZE,
            duplicate_identity: DuplicatePolicy::Evict,
            log_level: "info".to_string(),
        }
    }
}

impl ServerConfig {
    /// Load and validate a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| PilotError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_toml(&content)
    }

    /// Parse and validate TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would stall or disable the connection layer
    pub fn validate(&self) -> Result<()> {
        let checks = [
            ("call_timeout_secs", self.call_timeout_secs as usize),
            ("handshake_timeout_secs", self.handshake_timeout_secs as usize),
            ("outbound_queue_capacity", self.outbound_queue_capacity),
            ("max_concurrent_handlers", self.max_concurrent_handlers),
            ("max_frame_size", self.max_frame_size),
        ];
        for (key, value) in checks {
            if value == 0 {
                return Err(PilotError::Config(format!("{key} must be greater than zero")));
            }
        }
        if self.max_frame_size > u32::MAX as usize {
            return Err(PilotError::Config(format!(
                "max_frame_size {} does not fit the 4-byte length prefix",
                self.max_frame_size
            )));
        }
        Ok(())
    }

    /// Per-call timeout
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    /// Handshake timeout
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }
}
