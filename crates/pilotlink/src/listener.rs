//! Dedicated TCP listener for agent connections

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agent::Agent;
use crate::collaborator::Services;
use crate::config::ServerConfig;
use crate::Result;

/// Accepts agent sockets and turns each into an [`Agent`]
pub struct AgentListener {
    listener: TcpListener,
    config: Arc<ServerConfig>,
    services: Services,
}

impl AgentListener {
    /// Bind to `config.listen_addr`
    pub async fn bind(config: ServerConfig, services: Services) -> Result<Self> {
        config.validate()?;
        let listener = TcpListener::bind(config.listen_addr).await?;
        info!(addr = %listener.local_addr()?, "Agent listener bound");

        Ok(Self {
            listener,
            config: Arc::new(config),
            services,
        })
    }

    /// Address actually bound, useful when the configured port is 0
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Shared collaborators, including the registry of live agents
    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Accept connections until `shutdown` is cancelled, then close every agent
    pub async fn serve(self, shutdown: CancellationToken) -> Result<()> {
        // Parent of every connection, cancelled only after the registry snapshot
        let connections = CancellationToken::new();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        info!(%addr, "Agent connection accepted");
                        if let Err(e) = stream.set_nodelay(true) {
                            debug!(%addr, "Could not disable Nagle: {}", e);
                        }

                        let config = self.config.clone();
                        let services = self.services.clone();
                        let connections = connections.clone();
                        tokio::spawn(async move {
                            if let Err(e) = Agent::accept_until(stream, addr, &config, services, &connections).await {
                                warn!(%addr, "Agent not admitted: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        // Usually fd exhaustion; back off instead of spinning
                        warn!("Accept failed: {}", e);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
            }
        }

        let agents = self.services.registry.agents().await;
        info!(count = agents.len(), "Agent listener stopping");
        connections.cancel();
        for agent in agents {
            agent.close().await;
        }
        Ok(())
    }
}
