//! Shared fixtures for integration tests
//!
//! [`FakeAgent`] speaks the wire protocol from the agent side over a real
//! loopback socket; [`TestServer`] runs an [`AgentListener`] with in-memory
//! collaborators that count what they were told.

#![allow(dead_code)]

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use pilotlink::proto::catalog::{AgentIdentity, ConfigFile};
use pilotlink::proto::{FrameCodec, Message, MessageType, Payload};
use pilotlink::{
    Agent, AgentEvent, AgentListener, AgentState, BroadcastEventSink, MachineStatus, MachineStore,
    MemoryMachineStore, ServerConfig, Services,
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;

/// How long any single expectation may take
pub const PATIENCE: Duration = Duration::from_secs(5);

/// Agent end of a connection, driven step by step by the test
pub struct FakeAgent {
    stream: TcpStream,
    codec: FrameCodec,
    identity: AgentIdentity,
}

impl FakeAgent {
    /// Open a socket to the server; nothing is exchanged yet
    pub async fn connect(server: SocketAddr, uuid: &str, version: &str) -> Result<Self> {
        let stream = TcpStream::connect(server)
            .await
            .with_context(|| format!("connect to {server}"))?;
        Ok(Self {
            stream,
            codec: FrameCodec::new(),
            identity: AgentIdentity {
                agent_uuid: uuid.to_string(),
                agent_version: version.to_string(),
                ip: "127.0.0.1".to_string(),
            },
        })
    }

    /// Address the server sees for this agent
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.stream.local_addr()?)
    }

    /// Write one envelope
    pub async fn send(&mut self, message: &Message) -> Result<()> {
        let encoded = message.to_msgpack()?;
        self.codec.write_frame(&mut self.stream, &encoded).await?;
        Ok(())
    }

    /// Read the next envelope; `None` once the server closed the socket
    pub async fn recv(&mut self) -> Result<Option<Message>> {
        let frame = timeout(PATIENCE, self.codec.read_frame(&mut self.stream))
            .await
            .context("timed out waiting for a frame")?;
        match frame {
            Ok(Some(frame)) => Ok(Some(Message::from_msgpack(&frame)?)),
            Ok(None) => Ok(None),
            // A reset is as good as a close here
            Err(pilotlink::proto::ProtocolError::Io(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Read the next envelope and check its type
    pub async fn expect(&mut self, kind: MessageType) -> Result<Message> {
        match self.recv().await? {
            Some(message) if message.kind == kind => Ok(message),
            Some(message) => bail!("expected {kind}, got {message}"),
            None => bail!("connection closed while waiting for {kind}"),
        }
    }

    /// Answer the identity query the server sends after accept
    pub async fn handshake(&mut self) -> Result<()> {
        let query = self.expect(MessageType::AgentInfo).await?;
        let reply = query.reply(Payload::encode(&self.identity)?);
        self.send(&reply).await
    }

    /// Push a notification the way a real agent reports events
    pub async fn notify<T: serde::Serialize>(&mut self, kind: MessageType, body: &T) -> Result<()> {
        self.send(&Message::notification(kind, Payload::encode(body)?)).await
    }

    /// Report a changed config file
    pub async fn config_changed(&mut self, path: &str, content: &str) -> Result<()> {
        let file = ConfigFile {
            machine_uuid: self.identity.agent_uuid.clone(),
            path: path.to_string(),
            content: content.to_string(),
        };
        self.notify(MessageType::ConfigFileChanged, &file).await
    }

    /// Wait until the server drops the connection
    pub async fn closed(&mut self) -> Result<()> {
        loop {
            if self.recv().await?.is_none() {
                return Ok(());
            }
        }
    }
}

/// [`MemoryMachineStore`] that also counts calls
#[derive(Default)]
pub struct CountingStore {
    pub inner: MemoryMachineStore,
    online: AtomicUsize,
    offline: AtomicUsize,
    offline_delay: Option<Duration>,
}

impl CountingStore {
    /// A store whose offline marks take `delay` to land
    pub fn with_offline_delay(delay: Duration) -> Self {
        Self {
            offline_delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn online_marks(&self) -> usize {
        self.online.load(Ordering::SeqCst)
    }

    pub fn offline_marks(&self) -> usize {
        self.offline.load(Ordering::SeqCst)
    }

    pub async fn status(&self, identity: &str) -> Option<MachineStatus> {
        self.inner.status(identity).await
    }
}

#[async_trait]
impl MachineStore for CountingStore {
    async fn mark_online(&self, identity: &str, addr: SocketAddr) -> anyhow::Result<()> {
        self.online.fetch_add(1, Ordering::SeqCst);
        self.inner.mark_online(identity, addr).await
    }

    async fn mark_offline(&self, identity: &str) -> anyhow::Result<()> {
        self.offline.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.offline_delay {
            sleep(delay).await;
        }
        self.inner.mark_offline(identity).await
    }

    async fn record_config_file(&self, identity: &str, file: &ConfigFile) -> anyhow::Result<()> {
        self.inner.record_config_file(identity, file).await
    }
}

/// A listener on an ephemeral loopback port
pub struct TestServer {
    pub addr: SocketAddr,
    pub services: Services,
    pub store: Arc<CountingStore>,
    pub events: broadcast::Receiver<AgentEvent>,
    pub shutdown: CancellationToken,
    handle: JoinHandle<pilotlink::Result<()>>,
}

impl TestServer {
    pub async fn start() -> Result<Self> {
        Self::with_config(ServerConfig::default()).await
    }

    pub async fn with_config(config: ServerConfig) -> Result<Self> {
        Self::with_store(config, Arc::new(CountingStore::default())).await
    }

    pub async fn with_store(mut config: ServerConfig, store: Arc<CountingStore>) -> Result<Self> {
        config.listen_addr = "127.0.0.1:0".parse()?;

        let sink = BroadcastEventSink::new(256);
        let events = sink.subscribe();
        let services = Services::new(store.clone(), Arc::new(sink));

        let listener = AgentListener::bind(config, services.clone()).await?;
        let addr = listener.local_addr()?;
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(listener.serve(shutdown.clone()));

        Ok(Self {
            addr,
            services,
            store,
            events,
            shutdown,
            handle,
        })
    }

    /// Connect a fake agent, answer the handshake and return the server-side
    /// handle for it
    pub async fn connect(&self, uuid: &str, version: &str) -> Result<(FakeAgent, Arc<Agent>)> {
        let mut fake = FakeAgent::connect(self.addr, uuid, version).await?;
        fake.handshake().await?;
        let peer = fake.local_addr()?;
        let agent = self
            .registered_from(uuid, peer)
            .await
            .with_context(|| format!("{uuid} never registered"))?;

        // Active is set once the online mark and the Connected event are done
        let mut state = agent.watch_state();
        timeout(PATIENCE, state.wait_for(|state| *state == AgentState::Active))
            .await
            .context("agent never became active")??;
        Ok((fake, agent))
    }

    /// Wait for `identity` to be registered by the connection from `peer`
    pub async fn registered_from(&self, identity: &str, peer: SocketAddr) -> Result<Arc<Agent>> {
        let deadline = Instant::now() + PATIENCE;
        loop {
            if let Some(agent) = self.services.registry.get(identity).await {
                if agent.addr() == peer {
                    return Ok(agent);
                }
            }
            if Instant::now() > deadline {
                bail!("{identity} from {peer} not registered");
            }
            sleep(Duration::from_millis(10)).await;
        }
    }

    /// Wait until nothing is registered under `identity`
    pub async fn unregistered(&self, identity: &str) -> Result<()> {
        let deadline = Instant::now() + PATIENCE;
        while self.services.registry.get(identity).await.is_some() {
            if Instant::now() > deadline {
                bail!("{identity} still registered");
            }
            sleep(Duration::from_millis(10)).await;
        }
        Ok(())
    }

    /// Next published event
    pub async fn next_event(&mut self) -> Result<AgentEvent> {
        Ok(timeout(PATIENCE, self.events.recv())
            .await
            .context("no event published")??)
    }

    /// Events published so far that nobody consumed yet
    pub fn drain_events(&mut self) -> Vec<AgentEvent> {
        let mut drained = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            drained.push(event);
        }
        drained
    }

    /// Stop accepting and close every agent
    pub async fn stop(self) -> Result<()> {
        self.shutdown.cancel();
        timeout(PATIENCE, self.handle).await???;
        Ok(())
    }
}
