//! Peer management for P2P networking
//!
//! Tracks handshaken peers, what they told us about their chain, and the
//! channel used to send them messages.

use crate::core::Difficulty;
use crate::network::handshake::HandshakeError;
use crate::network::message::{Capabilities, ChainStatus, Hand, Message, Shake, UserAgent};
use crate::ser::WireError;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};

/// Default maximum number of connected peers
pub const MAX_PEERS: usize = 8;

/// Peer connection errors
#[derive(Error, Debug)]
pub enum PeerError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Wire error: {0}")]
    Wire(#[from] WireError),
    #[error("Handshake failed: {0}")]
    Handshake(#[from] HandshakeError),
    #[error("Peer disconnected")]
    Disconnected,
    #[error("Max peers reached")]
    MaxPeersReached,
    #[error("Already connected to {0}")]
    AlreadyConnected(SocketAddr),
    #[error("Peer idle for {0:?}")]
    Timeout(Duration),
}

/// Peer connection state
#[derive(Debug, Clone, PartialEq)]
pub enum PeerState {
    Connected,
    Disconnected,
}

/// Information about a connected peer
#[derive(Debug, Clone)]
pub struct PeerInfo {
    /// Peer's address
    pub addr: SocketAddr,
    /// Connection state
    pub state: PeerState,
    pub version: u32,
    pub capabilities: Capabilities,
    /// Last total difficulty the peer reported
    pub total_difficulty: Difficulty,
    /// Last height the peer reported (unknown until the first ping/pong)
    pub height: Option<u64>,
    pub user_agent: UserAgent,
    /// Whether this is an outbound connection
    pub outbound: bool,
}

impl PeerInfo {
    /// Inbound peer, described by the `hand` it sent
    pub fn from_hand(addr: SocketAddr, hand: &Hand) -> Self {
        Self {
            addr,
            state: PeerState::Connected,
            version: hand.version,
            capabilities: hand.capabilities,
            total_difficulty: hand.total_difficulty,
            height: None,
            user_agent: hand.user_agent.clone(),
            outbound: false,
        }
    }

    /// Outbound peer, described by the `shake` it replied with
    pub fn from_shake(addr: SocketAddr, shake: &Shake) -> Self {
        Self {
            addr,
            state: PeerState::Connected,
            version: shake.version,
            capabilities: shake.capabilities,
            total_difficulty: shake.total_difficulty,
            height: None,
            user_agent: shake.user_agent.clone(),
            outbound: true,
        }
    }

    pub fn update_status(&mut self, status: &ChainStatus) {
        self.total_difficulty = status.total_difficulty;
        self.height = Some(status.height);
    }
}

/// Handle for sending messages to a peer
#[derive(Clone, Debug)]
pub struct PeerHandle {
    pub addr: SocketAddr,
    pub tx: mpsc::Sender<Message>,
}

impl PeerHandle {
    pub async fn send(&self, msg: Message) -> Result<(), PeerError> {
        self.tx.send(msg).await.map_err(|_| PeerError::Disconnected)
    }
}

/// Manages all peer connections
pub struct PeerManager {
    /// Connected peers info
    peers: RwLock<HashMap<SocketAddr, PeerInfo>>,
    /// Peer message senders
    handles: RwLock<HashMap<SocketAddr, PeerHandle>>,
    max_peers: usize,
}

impl PeerManager {
    pub fn new(max_peers: usize) -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
            handles: RwLock::new(HashMap::new()),
            max_peers,
        }
    }

    pub fn max_peers(&self) -> usize {
        self.max_peers
    }

    /// Register a handshaken peer
    pub async fn add_peer(&self, info: PeerInfo, handle: PeerHandle) -> Result<(), PeerError> {
        let mut peers = self.peers.write().await;

        if peers.contains_key(&info.addr) {
            return Err(PeerError::AlreadyConnected(info.addr));
        }
        if peers.len() >= self.max_peers {
            return Err(PeerError::MaxPeersReached);
        }

        log::info!(
            "Added peer: {} (outbound: {}, agent: {}, total_difficulty: {})",
            info.addr,
            info.outbound,
            info.user_agent,
            info.total_difficulty
        );

        let addr = info.addr;
        peers.insert(addr, info);
        self.handles.write().await.insert(addr, handle);
        Ok(())
    }

    /// Remove a peer
    pub async fn remove_peer(&self, addr: &SocketAddr) {
        let removed = self.peers.write().await.remove(addr).is_some();
        self.handles.write().await.remove(addr);

        if removed {
            log::info!("Removed peer: {}", addr);
        }
    }

    /// Record the chain summary from a ping or pong
    pub async fn update_status(&self, addr: &SocketAddr, status: &ChainStatus) {
        let mut peers = self.peers.write().await;
        if let Some(peer) = peers.get_mut(addr) {
            peer.update_status(status);
            log::debug!(
                "Peer {} status: height={}, total_difficulty={}",
                addr,
                status.height,
                status.total_difficulty
            );
        }
    }

    /// Get all connected peer addresses
    pub async fn get_peers(&self) -> Vec<SocketAddr> {
        self.peers.read().await.keys().cloned().collect()
    }

    /// Get peer info
    pub async fn get_peer_info(&self, addr: &SocketAddr) -> Option<PeerInfo> {
        self.peers.read().await.get(addr).cloned()
    }

    pub async fn get_all_peer_info(&self) -> Vec<PeerInfo> {
        self.peers.read().await.values().cloned().collect()
    }

    /// Get peer count
    pub async fn peer_count(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn is_connected(&self, addr: &SocketAddr) -> bool {
        self.peers.read().await.contains_key(addr)
    }

    /// Broadcast a message to all peers
    pub async fn broadcast(&self, msg: Message) {
        let handles = self.handles.read().await;
        for (addr, handle) in handles.iter() {
            if let Err(e) = handle.send(msg.clone()).await {
                log::warn!("Failed to send to {}: {}", addr, e);
            }
        }
    }

    /// Send a message to a specific peer
    pub async fn send_to(&self, addr: &SocketAddr, msg: Message) -> Result<(), PeerError> {
        let handle = self.handles.read().await.get(addr).cloned();
        match handle {
            Some(handle) => handle.send(msg).await,
            None => Err(PeerError::Disconnected),
        }
    }

    /// The connected peer claiming the most total difficulty
    pub async fn get_best_peer(&self) -> Option<(SocketAddr, Difficulty)> {
        let peers = self.peers.read().await;
        peers
            .iter()
            .filter(|(_, p)| p.state == PeerState::Connected)
            .max_by_key(|(_, p)| p.total_difficulty)
            .map(|(addr, p)| (*addr, p.total_difficulty))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::message::PROTOCOL_VERSION;

    fn shake(td: u64) -> Shake {
        Shake {
            version: PROTOCOL_VERSION,
            capabilities: Capabilities::FULL_NODE,
            total_difficulty: Difficulty::from_num(td),
            user_agent: UserAgent::default(),
        }
    }

    fn handle(addr: SocketAddr) -> (PeerHandle, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(8);
        (PeerHandle { addr, tx }, rx)
    }

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[tokio::test]
    async fn test_add_and_remove_peer() {
        let manager = PeerManager::new(MAX_PEERS);
        let (h, _rx) = handle(addr(1));
        manager
            .add_peer(PeerInfo::from_shake(addr(1), &shake(10)), h.clone())
            .await
            .unwrap();

        assert_eq!(manager.peer_count().await, 1);
        assert!(manager.is_connected(&addr(1)).await);
        assert!(matches!(
            manager
                .add_peer(PeerInfo::from_shake(addr(1), &shake(10)), h)
                .await,
            Err(PeerError::AlreadyConnected(_))
        ));

        manager.remove_peer(&addr(1)).await;
        assert_eq!(manager.peer_count().await, 0);
        assert!(matches!(
            manager.send_to(&addr(1), Message::GetBlock(Default::default())).await,
            Err(PeerError::Disconnected)
        ));
    }

    #[tokio::test]
    async fn test_max_peers() {
        let manager = PeerManager::new(2);
        let mut receivers = Vec::new();
        for port in 1..=2 {
            let (h, rx) = handle(addr(port));
            receivers.push(rx);
            manager
                .add_peer(PeerInfo::from_shake(addr(port), &shake(1)), h)
                .await
                .unwrap();
        }

        let (h, _rx) = handle(addr(3));
        assert!(matches!(
            manager
                .add_peer(PeerInfo::from_shake(addr(3), &shake(1)), h)
                .await,
            Err(PeerError::MaxPeersReached)
        ));
    }

    #[tokio::test]
    async fn test_best_peer_by_total_difficulty() {
        let manager = PeerManager::new(MAX_PEERS);
        assert!(manager.get_best_peer().await.is_none());

        let mut receivers = Vec::new();
        for (port, td) in [(1, 1000), (2, 5000), (3, 3000)] {
            let (h, rx) = handle(addr(port));
            receivers.push(rx);
            manager
                .add_peer(PeerInfo::from_shake(addr(port), &shake(td)), h)
                .await
                .unwrap();
        }
        assert_eq!(
            manager.get_best_peer().await,
            Some((addr(2), Difficulty::from_num(5000)))
        );

        // A ping moves peer 3 ahead
        manager
            .update_status(
                &addr(3),
                &ChainStatus {
                    total_difficulty: Difficulty::from_num(9000),
                    height: 40,
                },
            )
            .await;
        assert_eq!(
            manager.get_best_peer().await,
            Some((addr(3), Difficulty::from_num(9000)))
        );
        let info = manager.get_peer_info(&addr(3)).await.unwrap();
        assert_eq!(info.height, Some(40));
    }

    #[tokio::test]
    async fn test_send_and_broadcast() {
        let manager = PeerManager::new(MAX_PEERS);
        let (h1, mut rx1) = handle(addr(1));
        let (h2, mut rx2) = handle(addr(2));
        manager
            .add_peer(PeerInfo::from_shake(addr(1), &shake(1)), h1)
            .await
            .unwrap();
        manager
            .add_peer(PeerInfo::from_shake(addr(2), &shake(1)), h2)
            .await
            .unwrap();

        let status = ChainStatus {
            total_difficulty: Difficulty::from_num(7),
            height: 1,
        };
        manager.send_to(&addr(1), Message::Pong(status)).await.unwrap();
        assert_eq!(rx1.recv().await, Some(Message::Pong(status)));

        manager.broadcast(Message::Ping(status)).await;
        assert_eq!(rx1.recv().await, Some(Message::Ping(status)));
        assert_eq!(rx2.recv().await, Some(Message::Ping(status)));
    }
}
