//! P2P Node implementation
//!
//! The main node that orchestrates all networking components.

use crate::core::{Chain, Difficulty, Network, SharedChain};
use crate::crypto::BlockHash;
use crate::network::handshake::{Handshake, HandshakeConfig, DEFAULT_HANDSHAKE_TIMEOUT};
use crate::network::message::{Capabilities, ChainStatus, Message, UserAgent, PROTOCOL_VERSION};
use crate::network::nonce::NonceRegistry;
use crate::network::peer::{PeerError, PeerManager, MAX_PEERS};
use crate::network::server::{connect_to_peer, handle_connection, ConnectionContext, NodeEvent, Server};
use crate::network::sync::ChainSync;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{interval_at, Instant};

/// Default listening port
pub const DEFAULT_PORT: u16 = 13414;

/// Buffered events between connection tasks and the node
const EVENT_CHANNEL_SIZE: usize = 1000;

/// P2P Node configuration
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub network: Network,
    /// Port to listen on
    pub port: u16,
    /// Initial peers to connect to (`host:port`)
    pub bootstrap_peers: Vec<String>,
    pub protocol_version: u32,
    pub capabilities: Capabilities,
    pub user_agent: UserAgent,
    /// Bound on each handshake read/write, also used for connecting
    pub handshake_timeout: Duration,
    /// Longest a peer may stay silent before we disconnect it
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub ping_interval: Duration,
    pub max_peers: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            network: Network::default(),
            port: DEFAULT_PORT,
            bootstrap_peers: Vec::new(),
            protocol_version: PROTOCOL_VERSION,
            capabilities: Capabilities::FULL_NODE,
            user_agent: UserAgent::default(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            read_timeout: Duration::from_secs(90),
            write_timeout: Duration::from_secs(10),
            ping_interval: Duration::from_secs(30),
            max_peers: MAX_PEERS,
        }
    }
}

impl NodeConfig {
    pub fn handshake_config(&self) -> HandshakeConfig {
        HandshakeConfig {
            protocol_version: self.protocol_version,
            capabilities: self.capabilities,
            user_agent: self.user_agent.clone(),
            timeout: self.handshake_timeout,
        }
    }
}

/// The main P2P node
pub struct Node {
    pub config: NodeConfig,
    pub chain: SharedChain,
    pub peer_manager: Arc<PeerManager>,
    pub chain_sync: Arc<ChainSync>,
    handshake: Handshake,
    events_tx: mpsc::Sender<NodeEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<NodeEvent>>>,
    shutdown_tx: mpsc::Sender<()>,
    shutdown_rx: Mutex<Option<mpsc::Receiver<()>>>,
}

impl Node {
    /// Create a node holding only the configured network's genesis block
    pub fn new(config: NodeConfig) -> Self {
        let chain = Chain::new(config.network);
        Self::with_chain(config, chain)
    }

    /// Create a node around an existing chain
    pub fn with_chain(config: NodeConfig, chain: Chain) -> Self {
        let chain = chain.into_shared();
        let peer_manager = Arc::new(PeerManager::new(config.max_peers));
        let chain_sync = Arc::new(ChainSync::new(chain.clone(), peer_manager.clone()));
        let handshake = Handshake::new(config.handshake_config(), Arc::new(NonceRegistry::new()));
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        Self {
            config,
            chain,
            peer_manager,
            chain_sync,
            handshake,
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            shutdown_tx,
            shutdown_rx: Mutex::new(Some(shutdown_rx)),
        }
    }

    fn connection_context(&self) -> ConnectionContext {
        ConnectionContext {
            handshake: self.handshake.clone(),
            chain: self.chain.clone(),
            peer_manager: self.peer_manager.clone(),
            events: self.events_tx.clone(),
            read_timeout: self.config.read_timeout,
            write_timeout: self.config.write_timeout,
        }
    }

    /// Start the node on the configured port and run until shutdown
    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let server = Server::bind(self.config.port).await?;
        self.run(server).await
    }

    /// Run the node on an already bound server until shutdown
    pub async fn run(&self, server: Server) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let mut events_rx = self.events_rx.lock().await.take().ok_or("node is already running")?;
        let mut shutdown_rx = self
            .shutdown_rx
            .lock()
            .await
            .take()
            .ok_or("node is already running")?;

        log::info!(
            "Node started on port {} ({}, genesis {})",
            server.port(),
            self.config.network,
            self.chain.read().await.genesis().hash()
        );

        // Spawn connection acceptor
        let ctx = self.connection_context();
        let max_peers = self.config.max_peers;
        let acceptor = tokio::spawn(async move {
            loop {
                match server.accept().await {
                    Ok((stream, addr)) => {
                        if ctx.peer_manager.peer_count().await >= max_peers {
                            log::info!("Rejecting {}: max peers reached", addr);
                            continue;
                        }
                        log::info!("Incoming connection from {}", addr);

                        let ctx = ctx.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, false, ctx).await {
                                log::debug!("Connection with {} ended: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        log::error!("Accept error: {}", e);
                    }
                }
            }
        });

        // Connect to bootstrap peers
        for peer_addr in &self.config.bootstrap_peers {
            if let Err(e) = self.connect_to(peer_addr).await {
                log::warn!("Failed to connect to bootstrap peer {}: {}", peer_addr, e);
            }
        }

        let mut ping = interval_at(Instant::now() + self.config.ping_interval, self.config.ping_interval);

        // Message handling loop
        loop {
            tokio::select! {
                Some(event) = events_rx.recv() => {
                    self.handle_event(event).await;
                }
                _ = ping.tick() => {
                    let status = self.chain_status().await;
                    self.peer_manager.broadcast(Message::Ping(status)).await;
                    self.chain_sync.check_sync().await;
                    self.chain_sync.retry_bodies().await;
                }
                _ = shutdown_rx.recv() => {
                    log::info!("Node shutting down...");
                    break;
                }
            }
        }

        acceptor.abort();
        Ok(())
    }

    /// Connect to a peer given as `host:port`
    pub async fn connect_to(&self, addr: &str) -> Result<(), PeerError> {
        log::info!("Connecting to peer: {}", addr);

        let peer_addr = tokio::net::lookup_host(addr)
            .await?
            .next()
            .ok_or_else(|| PeerError::ConnectionFailed(format!("{}: no address", addr)))?;
        if self.peer_manager.is_connected(&peer_addr).await {
            return Err(PeerError::AlreadyConnected(peer_addr));
        }

        let stream = connect_to_peer(peer_addr, self.config.handshake_timeout).await?;

        let ctx = self.connection_context();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, true, ctx).await {
                log::warn!("Connection error with {}: {}", peer_addr, e);
            }
        });

        Ok(())
    }

    async fn handle_event(&self, event: NodeEvent) {
        match event {
            NodeEvent::PeerConnected(addr) => {
                log::debug!("Peer {} ready", addr);
                self.chain_sync.check_sync().await;
            }
            NodeEvent::Message(from, msg) => self.handle_message(from, msg).await,
            NodeEvent::PeerDisconnected(addr) => {
                log::debug!("Peer {} gone", addr);
                self.chain_sync.peer_disconnected(addr).await;
            }
        }
    }

    /// Handle incoming messages
    async fn handle_message(&self, from: SocketAddr, msg: Message) {
        match msg {
            Message::Hand(_) | Message::Shake(_) => {
                log::warn!("Unexpected {} from {} after handshake", msg.type_name(), from);
            }

            Message::Ping(status) => {
                self.peer_manager.update_status(&from, &status).await;
                let ours = self.chain_status().await;
                if let Err(e) = self.peer_manager.send_to(&from, Message::Pong(ours)).await {
                    log::warn!("Failed to send pong: {}", e);
                }
                self.chain_sync.check_sync().await;
            }

            Message::Pong(status) => {
                self.peer_manager.update_status(&from, &status).await;
                self.chain_sync.check_sync().await;
            }

            Message::GetHeaders(locator) => {
                self.chain_sync.handle_get_headers(&locator, from).await;
            }

            Message::Headers(headers) => {
                // Rejections are logged by the sync layer
                let _ = self.chain_sync.handle_headers(headers, from).await;
            }

            Message::GetBlock(hash) => {
                self.chain_sync.handle_get_block(&hash, from).await;
            }

            Message::Block(block) => {
                let _ = self.chain_sync.handle_block(block, from).await;
            }
        }
    }

    async fn chain_status(&self) -> ChainStatus {
        let chain = self.chain.read().await;
        ChainStatus {
            total_difficulty: chain.total_difficulty(),
            height: chain.height(),
        }
    }

    /// Get node status
    pub async fn status(&self) -> NodeStatus {
        let chain = self.chain.read().await;
        let peers = self.peer_manager.peer_count().await;

        NodeStatus {
            network: self.config.network,
            port: self.config.port,
            height: chain.height(),
            total_difficulty: chain.total_difficulty(),
            head_hash: chain.head_hash(),
            peers,
            syncing: self.chain_sync.is_syncing().await,
        }
    }

    /// Shutdown the node
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

/// Node status information
#[derive(Debug, Clone)]
pub struct NodeStatus {
    pub network: Network,
    pub port: u16,
    pub height: u64,
    pub total_difficulty: Difficulty,
    pub head_hash: BlockHash,
    pub peers: usize,
    pub syncing: bool,
}
