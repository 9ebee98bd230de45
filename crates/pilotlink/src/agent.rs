//! One live agent connection
//!
//! An [`Agent`] owns a socket for its whole life. A supervisor task runs the
//! receive loop and the single writer, and tears the connection down exactly
//! once when either side fails, a handler faults or the server closes it.
//!
//! ```text
//!   socket ──► receive loop ──► Dispatcher ──► pending call / handler task
//!                                                   │
//!   socket ◄── send loop ◄── outbound queue ◄───────┘
//! ```

use bytes::Bytes;
use pilotlink_proto::catalog::{AgentIdentity, ConfigFile, GetAgentInfo};
use pilotlink_proto::{FrameCodec, Message, MessageType, Payload, ProtocolError};
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::collaborator::{AgentEvent, Services};
use crate::config::{DuplicatePolicy, ServerConfig};
use crate::dispatcher::{Dispatcher, MessageHandler};
use crate::{PilotError, Result};

/// Connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    /// Accepted, identity not yet known
    Initializing,
    /// Identified and registered
    Active,
    /// Torn down; never reused
    Closed,
}

/// A connected host agent
pub struct Agent {
    /// Per-connection ID, distinct from the agent's identity
    conn_id: Uuid,
    /// Peer address
    addr: SocketAddr,
    /// Set once the handshake succeeds
    identity: OnceLock<AgentIdentity>,
    /// Lifecycle, observable by the control plane
    state: watch::Sender<AgentState>,
    /// Inbound routing and pending calls
    dispatcher: Dispatcher<Arc<Agent>>,
    /// Encoded envelopes waiting for the writer
    outbound: mpsc::Sender<Bytes>,
    /// Default timeout for calls
    call_timeout: Duration,
    /// Largest envelope the peer will accept
    max_frame_size: usize,
    /// What to do if the identity is already registered
    duplicate_policy: DuplicatePolicy,
    /// Cancelled to stop the supervisor
    shutdown: CancellationToken,
    /// Set by the first teardown
    closed: AtomicBool,
    /// Set once a supervisor owns the socket
    supervised: AtomicBool,
    /// Orders this connection's registration against its own teardown
    lifecycle: Mutex<()>,
    /// When the last heartbeat arrived
    last_heartbeat: RwLock<Option<Instant>>,
    /// Store, event sink and registry
    services: Services,
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent")
            .field("conn_id", &self.conn_id)
            .field("addr", &self.addr)
            .field("identity", &self.identity())
            .field("state", &self.state())
            .finish()
    }
}

impl Agent {
    /// Build an agent and the receiving end of its outbound queue.
    ///
    /// Nothing runs until the caller starts a supervisor with the receiver.
    /// `shutdown` closes the connection when cancelled.
    pub(crate) fn new(
        addr: SocketAddr,
        config: &ServerConfig,
        services: Services,
        shutdown: CancellationToken,
    ) -> (Arc<Self>, mpsc::Receiver<Bytes>) {
        let (outbound, outbound_rx) = mpsc::channel(config.outbound_queue_capacity.max(1));
        let (state, _) = watch::channel(AgentState::Initializing);

        let agent = Arc::new(Self {
            conn_id: Uuid::new_v4(),
            addr,
            identity: OnceLock::new(),
            state,
            dispatcher: Dispatcher::new(config.max_concurrent_handlers, config.handler_queue_capacity),
            outbound,
            call_timeout: config.call_timeout(),
            max_frame_size: config.max_frame_size,
            duplicate_policy: config.duplicate_identity,
            shutdown,
            closed: AtomicBool::new(false),
            supervised: AtomicBool::new(false),
            lifecycle: Mutex::new(()),
            last_heartbeat: RwLock::new(None),
            services,
        });
        (agent, outbound_rx)
    }

    /// Take over an accepted socket.
    ///
    /// Binds the standing handlers, starts the connection tasks, asks the
    /// peer who it is and registers it under that identity. The agent is
    /// only visible in the registry once this returns `Ok`. On failure the
    /// connection is already closed.
    pub async fn accept<S>(
        stream: S,
        addr: SocketAddr,
        config: &ServerConfig,
        services: Services,
    ) -> Result<Arc<Self>>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        Self::accept_until(stream, addr, config, services, &CancellationToken::new()).await
    }

    /// Like [`Agent::accept`], but the connection also closes when `parent`
    /// is cancelled, including while the handshake is still running.
    pub async fn accept_until<S>(
        stream: S,
        addr: SocketAddr,
        config: &ServerConfig,
        services: Services,
        parent: &CancellationToken,
    ) -> Result<Arc<Self>>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (agent, outbound_rx) = Self::new(addr, config, services, parent.child_token());
        agent.bind_standing_handlers().await;

        let (reader, writer) = tokio::io::split(stream);
        tokio::spawn(agent.clone().supervise(reader, writer, outbound_rx));

        let identity = match agent.handshake(config.handshake_timeout()).await {
            Ok(identity) => identity,
            Err(e) => {
                error!(%addr, "Agent handshake failed: {}", e);
                agent.close().await;
                return Err(e);
            }
        };

        agent.clone().register(identity).await?;
        Ok(agent)
    }

    /// Connection ID
    pub fn conn_id(&self) -> Uuid {
        self.conn_id
    }

    /// Peer address
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stable identity, known after the handshake
    pub fn identity(&self) -> Option<&str> {
        self.identity.get().map(|id| id.agent_uuid.as_str())
    }

    /// Agent software version, known after the handshake
    pub fn version(&self) -> Option<&str> {
        self.identity.get().map(|id| id.agent_version.as_str())
    }

    /// Everything the agent announced in the handshake
    pub fn announced(&self) -> Option<&AgentIdentity> {
        self.identity.get()
    }

    /// Current lifecycle state
    pub fn state(&self) -> AgentState {
        *self.state.borrow()
    }

    /// Watch lifecycle changes
    pub fn watch_state(&self) -> watch::Receiver<AgentState> {
        self.state.subscribe()
    }

    /// Whether teardown has started
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// When the last heartbeat notification arrived
    pub async fn last_heartbeat(&self) -> Option<Instant> {
        *self.last_heartbeat.read().await
    }

    /// Default timeout applied by [`Agent::call`]
    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    /// Number of calls waiting for a response
    pub async fn pending_calls(&self) -> usize {
        self.dispatcher.pending_count().await
    }

    /// Bind a handler for inbound messages of `kind`, replacing any previous one
    pub async fn bind<H>(&self, kind: MessageType, handler: H)
    where
        H: MessageHandler<Arc<Agent>> + 'static,
    {
        self.dispatcher.bind(kind, handler).await;
    }

    /// Issue a call and wait for its response with the default timeout
    pub async fn call(&self, kind: MessageType, payload: Payload) -> Result<Payload> {
        self.call_with_timeout(kind, payload, self.call_timeout).await
    }

    /// Issue a call and wait at most `timeout` for its response.
    ///
    /// The timeout covers waiting for queue space as well as the reply. On
    /// timeout the pending entry is dropped, so a late reply is discarded.
    pub async fn call_with_timeout(
        &self,
        kind: MessageType,
        payload: Payload,
        timeout: Duration,
    ) -> Result<Payload> {
        let request = Message::request(kind, payload);
        let id = request.id;
        let slot = self.dispatcher.expect_response(id).await;

        let exchange = async {
            self.send(&request).await?;
            slot.await.map_err(|_| PilotError::Disconnected)
        };

        let response = match tokio::time::timeout(timeout, exchange).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                self.dispatcher.cancel(id).await;
                return Err(e);
            }
            Err(_) => {
                self.dispatcher.cancel(id).await;
                warn!(addr = %self.addr, %id, %kind, ?timeout, "Call timed out");
                return Err(PilotError::Timeout { duration: timeout });
            }
        };

        response
            .into_result()
            .map_err(|(kind, message)| PilotError::Remote { kind, message })
    }

    /// Send a fire-and-forget message
    pub async fn notify(&self, kind: MessageType, payload: Payload) -> Result<()> {
        self.send(&Message::notification(kind, payload)).await
    }

    /// Enqueue an envelope for the writer.
    ///
    /// Blocks while the outbound queue is full. Replies from handlers go
    /// through here with the request's correlation ID.
    pub async fn send(&self, message: &Message) -> Result<()> {
        if self.is_closed() {
            return Err(PilotError::Disconnected);
        }

        let encoded = message.to_msgpack()?;
        if encoded.len() > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size: encoded.len(),
                max: self.max_frame_size,
            }
            .into());
        }

        debug!(addr = %self.addr, "Sending {}", message);
        tokio::select! {
            sent = self.outbound.send(encoded) => sent.map_err(|_| PilotError::Disconnected),
            _ = self.shutdown.cancelled() => Err(PilotError::Disconnected),
        }
    }

    /// Close the connection and wait for teardown to finish.
    ///
    /// Teardown belongs to the supervisor. An agent that never got one has
    /// no socket and was never registered, so it is closed in place.
    pub async fn close(&self) {
        self.shutdown.cancel();
        if !self.supervised.load(Ordering::SeqCst) && !self.closed.swap(true, Ordering::SeqCst) {
            self.dispatcher.fail_pending().await;
            self.state.send_replace(AgentState::Closed);
            return;
        }
        let mut state = self.state.subscribe();
        // The sender lives in `self`, so this only ends once the state is Closed
        let _ = state.wait_for(|state| *state == AgentState::Closed).await;
    }

    async fn handshake(&self, timeout: Duration) -> Result<AgentIdentity> {
        let identity = self
            .request_with_timeout::<GetAgentInfo>(&(), timeout)
            .await
            .map_err(|e| match e {
                PilotError::Disconnected => PilotError::Disconnected,
                other => PilotError::Handshake(other.to_string()),
            })?;

        if identity.agent_uuid.is_empty() {
            return Err(PilotError::Handshake("agent announced an empty identity".into()));
        }
        if self.identity.set(identity.clone()).is_err() {
            return Err(PilotError::Handshake("identity already assigned".into()));
        }

        info!(
            addr = %self.addr,
            identity = %identity.agent_uuid,
            version = %identity.agent_version,
            "Agent handshake completed"
        );
        Ok(identity)
    }

    /// Publish the agent under its identity and mark it online
    async fn register(self: Arc<Self>, identity: AgentIdentity) -> Result<()> {
        let registry = &self.services.registry;
        let evicted = {
            let lifecycle = self.lifecycle.lock().await;
            if self.is_closed() {
                return Err(PilotError::Disconnected);
            }
            // Held until the online mark lands, so a teardown of an older
            // connection for this identity is either fully before or after
            let transition = registry.lock_identity(&identity.agent_uuid).await;

            let evicted = match self.duplicate_policy {
                DuplicatePolicy::Reject => {
                    if let Err(holder) = registry.try_put(identity.agent_uuid.clone(), self.clone()).await {
                        warn!(
                            identity = %identity.agent_uuid,
                            addr = %self.addr,
                            holder = %holder.addr,
                            "Rejecting duplicate agent connection"
                        );
                        drop(transition);
                        drop(lifecycle);
                        self.close().await;
                        return Err(PilotError::DuplicateIdentity(identity.agent_uuid));
                    }
                    None
                }
                DuplicatePolicy::Evict => registry
                    .put(identity.agent_uuid.clone(), self.clone())
                    .await
                    .filter(|old| !Arc::ptr_eq(old, &self)),
            };

            if let Err(e) = self.services.store.mark_online(&identity.agent_uuid, self.addr).await {
                warn!(identity = %identity.agent_uuid, "Failed to mark agent online: {:#}", e);
            }
            self.publish(AgentEvent::Connected {
                identity: identity.agent_uuid.clone(),
                version: identity.agent_version.clone(),
                addr: self.addr,
            })
            .await;

            self.state.send_replace(AgentState::Active);
            evicted
        };

        if let Some(old) = evicted {
            warn!(
                identity = %identity.agent_uuid,
                old = %old.addr,
                new = %self.addr,
                "Replacing existing agent connection"
            );
            old.close().await;
        }
        Ok(())
    }

    async fn supervise<R, W>(self: Arc<Self>, reader: R, writer: W, outbound: mpsc::Receiver<Bytes>)
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        self.supervised.store(true, Ordering::SeqCst);
        let fault = self.dispatcher.fault_token();
        let identity = || self.identity().unwrap_or("-").to_string();

        tokio::select! {
            result = self.clone().receive_loop(reader) => match result {
                Ok(()) => warn!(addr = %self.addr, identity = %identity(), "Agent closed the connection"),
                Err(e) => error!(addr = %self.addr, identity = %identity(), "Receive failed: {}", e),
            },
            result = Self::send_loop(writer, outbound, self.max_frame_size) => {
                if let Err(e) = result {
                    error!(addr = %self.addr, identity = %identity(), "Send failed: {}", e);
                }
            }
            _ = fault.cancelled() => {
                error!(addr = %self.addr, identity = %identity(), "Handler fault, closing connection");
            }
            _ = self.shutdown.cancelled() => {
                debug!(addr = %self.addr, identity = %identity(), "Connection closed by server");
            }
        }

        self.teardown().await;
    }

    async fn receive_loop<R>(self: Arc<Self>, mut reader: R) -> std::result::Result<(), ProtocolError>
    where
        R: AsyncRead + Unpin,
    {
        let mut codec = FrameCodec::with_max_frame_size(self.max_frame_size);
        while let Some(frame) = codec.read_frame(&mut reader).await? {
            let message = match Message::from_msgpack(&frame) {
                Ok(message) => message,
                Err(e) => {
                    // The frame boundary is intact, so only this message is lost
                    warn!(addr = %self.addr, "Dropping undecodable message: {}", e);
                    continue;
                }
            };
            debug!(addr = %self.addr, "Received {}", message);
            self.dispatcher.dispatch(self.clone(), message).await;
        }
        Ok(())
    }

    async fn send_loop<W>(
        mut writer: W,
        mut outbound: mpsc::Receiver<Bytes>,
        max_frame_size: usize,
    ) -> std::result::Result<(), ProtocolError>
    where
        W: AsyncWrite + Unpin,
    {
        let codec = FrameCodec::with_max_frame_size(max_frame_size);
        while let Some(encoded) = outbound.recv().await {
            codec.write_frame(&mut writer, &encoded).await?;
        }
        Ok(())
    }

    /// Runs once per connection no matter how many paths observe the end
    async fn teardown(self: Arc<Self>) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shutdown.cancel();
        let failed = self.dispatcher.fail_pending().await;

        let authoritative = {
            let _lifecycle = self.lifecycle.lock().await;
            match self.identity() {
                Some(identity) => {
                    // Removal and the offline mark are one step for this
                    // identity; a reconnect registers only after both
                    let _transition = self.services.registry.lock_identity(identity).await;
                    let authoritative = self.services.registry.remove_if_same(identity, &self).await;
                    if authoritative {
                        if let Err(e) = self.services.store.mark_offline(identity).await {
                            warn!(%identity, "Failed to mark agent offline: {:#}", e);
                        }
                        self.publish(AgentEvent::Disconnected {
                            identity: identity.to_string(),
                            addr: self.addr,
                        })
                        .await;
                    }
                    authoritative
                }
                None => false,
            }
        };

        info!(
            addr = %self.addr,
            identity = %self.identity().unwrap_or("-"),
            failed_calls = failed,
            authoritative,
            "Agent disconnected"
        );
        self.state.send_replace(AgentState::Closed);
    }

    async fn publish(&self, event: AgentEvent) {
        if let Err(e) = self.services.events.publish(event).await {
            warn!(addr = %self.addr, "Failed to publish agent event: {:#}", e);
        }
    }

    async fn bind_standing_handlers(&self) {
        self.dispatcher.bind(MessageType::Heartbeat, on_heartbeat).await;
        self.dispatcher.bind(MessageType::AgentInfo, on_agent_info).await;
        self.dispatcher.bind(MessageType::ConfigFileChanged, on_config_file_changed).await;
        self.dispatcher.bind(MessageType::FileMonitor, on_file_monitor).await;
    }

    /// Identity for messages that arrive before the handshake finished
    fn reporter(&self, fallback: &str) -> String {
        self.identity().unwrap_or(fallback).to_string()
    }
}

async fn on_heartbeat(agent: Arc<Agent>, message: Message) -> anyhow::Result<()> {
    *agent.last_heartbeat.write().await = Some(Instant::now());
    debug!(addr = %agent.addr, identity = %agent.reporter("-"), id = %message.id, "Heartbeat");
    Ok(())
}

async fn on_agent_info(agent: Arc<Agent>, message: Message) -> anyhow::Result<()> {
    let announced: AgentIdentity = message.bind()?;
    info!(
        addr = %agent.addr,
        identity = %announced.agent_uuid,
        version = %announced.agent_version,
        "Agent re-announced itself"
    );
    Ok(())
}

async fn on_config_file_changed(agent: Arc<Agent>, message: Message) -> anyhow::Result<()> {
    let file: ConfigFile = message.bind()?;
    let identity = agent.reporter(&file.machine_uuid);
    info!(addr = %agent.addr, %identity, path = %file.path, "Config file changed on agent");

    agent
        .services
        .store
        .record_config_file(&identity, &file)
        .await
        .map_err(PilotError::Collaborator)?;
    agent
        .publish(AgentEvent::ConfigFileChanged {
            identity,
            path: file.path,
        })
        .await;
    Ok(())
}

async fn on_file_monitor(agent: Arc<Agent>, message: Message) -> anyhow::Result<()> {
    let detail: String = message.bind()?;
    info!(addr = %agent.addr, identity = %agent.reporter("-"), %detail, "File monitor notice");
    agent
        .publish(AgentEvent::FileChanged {
            identity: agent.reporter("-"),
            detail,
        })
        .await;
    Ok(())
}
