//! # PilotLink
//!
//! Server side of the PilotLink agent protocol.
//!
//! Host agents keep one persistent TCP connection to the server. Over it the
//! server issues synchronous calls (run a command, query CPU info, restart a
//! service) while the agent pushes notifications such as heartbeats and
//! config-file changes. This crate owns that connection: correlating calls
//! with responses, routing notifications to handlers, the identity handshake,
//! and the registry the control plane uses to find an agent by identity.
//!
//! ```no_run
//! use pilotlink::{AgentListener, ServerConfig, Services};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> pilotlink::Result<()> {
//! let services = Services::in_memory();
//! let registry = services.registry.clone();
//! let listener = AgentListener::bind(ServerConfig::default(), services).await?;
//! tokio::spawn(listener.serve(CancellationToken::new()));
//!
//! if let Some(agent) = registry.get("host-42").await {
//!     let output = agent.run_command("uname -r").await?;
//!     println!("{}", output.stdout);
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub use pilotlink_proto as proto;

/// Error types for the connection layer
pub mod error;

/// Inbound message routing and call correlation
pub mod dispatcher;

/// Agent connection lifecycle
pub mod agent;

/// Typed remote operations
pub mod remote;

/// Registry of live agents
pub mod registry;

/// Persistence and monitoring collaborators
pub mod collaborator;

/// TCP listener
pub mod listener;

/// Server configuration
pub mod config;

pub use agent::{Agent, AgentState};
pub use collaborator::{
    AgentEvent, BroadcastEventSink, EventSink, LogEventSink, MachineStatus, MachineStore,
    MemoryMachineStore, Services,
};
pub use config::{DuplicatePolicy, ServerConfig};
pub use dispatcher::{Dispatched, Dispatcher, MessageHandler};
pub use error::PilotError;
pub use listener::AgentListener;
pub use registry::{AgentRegistry, Registry};

/// Result type alias for PilotLink operations
pub type Result<T> = std::result::Result<T, PilotError>;
