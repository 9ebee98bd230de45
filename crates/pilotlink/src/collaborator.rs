//! Collaborators consumed by agent connections
//!
//! The connection layer does not own durable machine state or alerting. It
//! reports lifecycle changes to a [`MachineStore`] and an [`EventSink`], which
//! the embedding server wires to its database and event bus.

use async_trait::async_trait;
use pilotlink_proto::catalog::ConfigFile;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{info, warn};

use crate::registry::AgentRegistry;

/// Durable machine status and config-file persistence
#[async_trait]
pub trait MachineStore: Send + Sync {
    /// Record that `identity` is reachable at `addr`
    async fn mark_online(&self, identity: &str, addr: SocketAddr) -> anyhow::Result<()>;

    /// Record that `identity` lost its connection
    async fn mark_offline(&self, identity: &str) -> anyhow::Result<()>;

    /// Store the latest contents of a watched config file
    async fn record_config_file(&self, identity: &str, file: &ConfigFile) -> anyhow::Result<()>;
}

/// Lifecycle and monitoring notices raised by agent connections
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentEvent {
    /// Handshake finished and the agent is registered
    Connected {
        /// Agent identity
        identity: String,
        /// Agent software version
        version: String,
        /// Peer address
        addr: SocketAddr,
    },
    /// The authoritative connection for an identity went away
    Disconnected {
        /// Agent identity
        identity: String,
        /// Peer address
        addr: SocketAddr,
    },
    /// A watched config file changed on the agent
    ConfigFileChanged {
        /// Agent identity
        identity: String,
        /// Path of the file
        path: String,
    },
    /// File monitor notice forwarded by the agent
    FileChanged {
        /// Agent identity
        identity: String,
        /// Text reported by the agent
        detail: String,
    },
}

impl AgentEvent {
    /// Identity the event is about
    pub fn identity(&self) -> &str {
        match self {
            Self::Connected { identity, .. }
            | Self::Disconnected { identity, .. }
            | Self::ConfigFileChanged { identity, .. }
            | Self::FileChanged { identity, .. } => identity,
        }
    }
}

/// Monitoring/alerting collaborator
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Publish one event
    async fn publish(&self, event: AgentEvent) -> anyhow::Result<()>;
}

/// Last known status of a machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineStatus {
    /// Connected from the given address
    Online(SocketAddr),
    /// Not connected
    Offline,
}

/// In-process [`MachineStore`], for tests and single-node deployments
#[derive(Debug, Default)]
pub struct MemoryMachineStore {
    statuses: RwLock<HashMap<String, MachineStatus>>,
    config_files: RwLock<HashMap<(String, String), ConfigFile>>,
}

impl MemoryMachineStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Last recorded status for an identity
    pub async fn status(&self, identity: &str) -> Option<MachineStatus> {
        self.statuses.read().await.get(identity).copied()
    }

    /// Latest recorded contents of a config file
    pub async fn config_file(&self, identity: &str, path: &str) -> Option<ConfigFile> {
        self.config_files
            .read()
            .await
            .get(&(identity.to_string(), path.to_string()))
            .cloned()
    }

    /// Identities currently marked online
    pub async fn online(&self) -> Vec<String> {
        let mut online: Vec<String> = self
            .statuses
            .read()
            .await
            .iter()
            .filter(|(_, status)| matches!(status, MachineStatus::Online(_)))
            .map(|(identity, _)| identity.clone())
            .collect();
        online.sort();
        online
    }
}

#[async_trait]
impl MachineStore for MemoryMachineStore {
    async fn mark_online(&self, identity: &str, addr: SocketAddr) -> anyhow::Result<()> {
        self.statuses
            .write()
            .await
            .insert(identity.to_string(), MachineStatus::Online(addr));
        Ok(())
    }

    async fn mark_offline(&self, identity: &str) -> anyhow::Result<()> {
        self.statuses
            .write()
            .await
            .insert(identity.to_string(), MachineStatus::Offline);
        Ok(())
    }

    async fn record_config_file(&self, identity: &str, file: &ConfigFile) -> anyhow::Result<()> {
        self.config_files
            .write()
            .await
            .insert((identity.to_string(), file.path.clone()), file.clone());
        Ok(())
    }
}

/// Fans events out to any number of subscribers
#[derive(Debug, Clone)]
pub struct BroadcastEventSink {
    tx: broadcast::Sender<AgentEvent>,
}

impl BroadcastEventSink {
    /// Create a sink that buffers up to `capacity` events per lagging subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Receive every event published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl EventSink for BroadcastEventSink {
    async fn publish(&self, event: AgentEvent) -> anyhow::Result<()> {
        // No subscribers is not an error; the event just has no audience
        let _ = self.tx.send(event);
        Ok(())
    }
}

/// Writes events to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogEventSink;

#[async_trait]
impl EventSink for LogEventSink {
    async fn publish(&self, event: AgentEvent) -> anyhow::Result<()> {
        match &event {
            AgentEvent::Connected { identity, version, addr } => {
                info!(%identity, %version, %addr, "Agent connected");
            }
            AgentEvent::Disconnected { identity, addr } => {
                warn!(%identity, %addr, "Agent disconnected");
            }
            AgentEvent::ConfigFileChanged { identity, path } => {
                info!(%identity, %path, "Config file changed");
            }
            AgentEvent::FileChanged { identity, detail } => {
                warn!(%identity, %detail, "File monitor notice");
            }
        }
        Ok(())
    }
}

/// Everything a connection needs from the rest of the server
#[derive(Clone)]
pub struct Services {
    /// Machine status persistence
    pub store: Arc<dyn MachineStore>,
    /// Monitoring sink
    pub events: Arc<dyn EventSink>,
    /// Directory of live agents
    pub registry: Arc<AgentRegistry>,
}

impl Services {
    /// Bundle collaborators with a fresh, empty registry
    pub fn new(store: Arc<dyn MachineStore>, events: Arc<dyn EventSink>) -> Self {
        Self {
            store,
            events,
            registry: Arc::new(AgentRegistry::new()),
        }
    }

    /// In-memory store and log sink
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryMachineStore::new()), Arc::new(LogEventSink))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "10.0.0.7:40112".parse().unwrap()
    }

    #[tokio::test]
    async fn test_memory_store_tracks_status() {
        let store = MemoryMachineStore::new();
        assert_eq!(store.status("host-42").await, None);

        store.mark_online("host-42", addr()).await.unwrap();
        assert_eq!(store.status("host-42").await, Some(MachineStatus::Online(addr())));
        assert_eq!(store.online().await, vec!["host-42".to_string()]);

        store.mark_offline("host-42").await.unwrap();
        assert_eq!(store.status("host-42").await, Some(MachineStatus::Offline));
        assert!(store.online().await.is_empty());
    }

    #[tokio::test]
    async fn test_memory_store_keeps_latest_config_file() {
        let store = MemoryMachineStore::new();
        let mut file = ConfigFile {
            machine_uuid: "host-42".into(),
            path: "/etc/ssh/sshd_config".into(),
            content: "PermitRootLogin no".into(),
        };
        store.record_config_file("host-42", &file).await.unwrap();

        file.content = "PermitRootLogin yes".into();
        store.record_config_file("host-42", &file).await.unwrap();

        let stored = store.config_file("host-42", "/etc/ssh/sshd_config").await.unwrap();
        assert_eq!(stored.content, "PermitRootLogin yes");
        assert!(store.config_file("host-7", "/etc/ssh/sshd_config").await.is_none());
    }

    #[tokio::test]
    async fn test_broadcast_sink_fans_out() {
        let sink = BroadcastEventSink::new(8);
        let mut a = sink.subscribe();
        let mut b = sink.subscribe();

        let event = AgentEvent::FileChanged {
            identity: "host-42".into(),
            detail: "/etc/passwd modified".into(),
        };
        sink.publish(event.clone()).await.unwrap();

        assert_eq!(a.recv().await.unwrap(), event);
        assert_eq!(b.recv().await.unwrap(), event);
        assert_eq!(event.identity(), "host-42");
    }

    #[tokio::test]
    async fn test_broadcast_sink_without_subscribers() {
        let sink = BroadcastEventSink::new(1);
        let event = AgentEvent::Disconnected { identity: "host-42".into(), addr: addr() };
        assert!(sink.publish(event).await.is_ok());
    }
}
