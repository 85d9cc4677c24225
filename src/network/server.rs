//! TCP server and connection handling
//!
//! Accepts incoming peer connections, runs the handshake on every new
//! socket and then pumps framed messages between the peer and the node.

use crate::core::SharedChain;
use crate::network::handshake::{Handshake, HandshakeError};
use crate::network::message::Message;
use crate::network::peer::{PeerError, PeerHandle, PeerInfo, PeerManager};
use futures::sink::SinkExt;
use futures::stream::StreamExt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;

/// Outgoing message queue per peer
const PEER_CHANNEL_SIZE: usize = 256;

/// What connections report back to the node
#[derive(Debug, Clone, PartialEq)]
pub enum NodeEvent {
    /// Handshake finished and the peer is registered
    PeerConnected(SocketAddr),
    /// Message received from a registered peer
    Message(SocketAddr, Message),
    PeerDisconnected(SocketAddr),
}

/// TCP server for accepting peer connections
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Server {
    /// Bind to a port on all interfaces
    pub async fn bind(port: u16) -> Result<Self, std::io::Error> {
        Self::bind_addr(SocketAddr::from(([0, 0, 0, 0], port))).await
    }

    pub async fn bind_addr(addr: SocketAddr) -> Result<Self, std::io::Error> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        log::info!("Server listening on {}", local_addr);

        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Get the listening port
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept incoming connections
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr), std::io::Error> {
        self.listener.accept().await
    }
}

/// Connect to a peer
pub async fn connect_to_peer(addr: SocketAddr, connect_timeout: Duration) -> Result<TcpStream, PeerError> {
    match timeout(connect_timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(PeerError::ConnectionFailed(format!("{}: {}", addr, e))),
        Err(_) => Err(PeerError::ConnectionFailed(format!("{}: timed out", addr))),
    }
}

/// Everything a connection task needs from its node
#[derive(Clone)]
pub struct ConnectionContext {
    pub handshake: Handshake,
    pub chain: SharedChain,
    pub peer_manager: Arc<PeerManager>,
    pub events: mpsc::Sender<NodeEvent>,
    /// Longest wait for the next message from an established peer
    pub read_timeout: Duration,
    pub write_timeout: Duration,
}

/// Handle a peer connection (both inbound and outbound)
///
/// Returns once the peer is gone. A connection that turns out to be to
/// ourselves is closed and reported as `Ok`.
pub async fn handle_connection(
    stream: TcpStream,
    outbound: bool,
    ctx: ConnectionContext,
) -> Result<(), PeerError> {
    let addr = stream.peer_addr()?;
    let local_addr = stream.local_addr()?;
    let mut framed = ctx.handshake.framed(stream);
    let total_difficulty = ctx.chain.read().await.total_difficulty();

    let handshake = if outbound {
        ctx.handshake
            .initiate(&mut framed, total_difficulty, local_addr, addr)
            .await
            .map(|shake| PeerInfo::from_shake(addr, &shake))
    } else {
        ctx.handshake
            .accept(&mut framed, total_difficulty)
            .await
            .map(|hand| PeerInfo::from_hand(addr, &hand))
    };

    let info = match handshake {
        Ok(info) => info,
        Err(HandshakeError::SelfConnection { .. }) => {
            log::debug!("Dropping connection to ourselves via {}", addr);
            return Ok(());
        }
        Err(e) => {
            if e.is_version_mismatch() {
                log::info!("Peer {} speaks another protocol version: {}", addr, e);
            } else if e.is_peer_fault() {
                log::warn!("Peer {} failed the handshake: {}", addr, e);
            } else {
                log::debug!("Handshake with {} aborted: {}", addr, e);
            }
            return Err(e.into());
        }
    };

    // Create channel for sending to this peer
    let (tx, mut rx) = mpsc::channel::<Message>(PEER_CHANNEL_SIZE);
    ctx.peer_manager.add_peer(info, PeerHandle { addr, tx }).await?;
    // Node is gone if this fails; the read loop below notices too
    let _ = ctx.events.send(NodeEvent::PeerConnected(addr)).await;

    let (mut writer, mut reader) = framed.split();
    let write_timeout = ctx.write_timeout;

    // Spawn writer task
    let write_handle = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match timeout(write_timeout, writer.send(msg)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    log::warn!("Error writing to {}: {}", addr, e);
                    break;
                }
                Err(_) => {
                    log::warn!("Write to {} timed out", addr);
                    break;
                }
            }
        }
        // Peer removed from the manager: send FIN so the remote side sees EOF
        let _ = timeout(write_timeout, writer.close()).await;
    });

    // Read messages
    let result = loop {
        match timeout(ctx.read_timeout, reader.next()).await {
            Ok(Some(Ok(msg))) => {
                log::debug!("Received {} from {}", msg.type_name(), addr);
                // Forward message to node
                if ctx.events.send(NodeEvent::Message(addr, msg)).await.is_err() {
                    break Ok(());
                }
            }
            Ok(Some(Err(e))) => {
                log::warn!("Error reading from {}: {}", addr, e);
                break Err(PeerError::Wire(e));
            }
            Ok(None) => {
                log::info!("Peer {} disconnected", addr);
                break Ok(());
            }
            Err(_) => {
                log::info!("Peer {} idle for {:?}, disconnecting", addr, ctx.read_timeout);
                break Err(PeerError::Timeout(ctx.read_timeout));
            }
        }
    };

    // Cleanup
    write_handle.abort();
    ctx.peer_manager.remove_peer(&addr).await;
    let _ = ctx.events.send(NodeEvent::PeerDisconnected(addr)).await;

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Chain, Difficulty, Network};
    use crate::network::handshake::HandshakeConfig;
    use crate::network::message::ChainStatus;
    use crate::network::nonce::NonceRegistry;
    use crate::network::peer::MAX_PEERS;

    fn context(network: Network, nonces: Arc<NonceRegistry>) -> (ConnectionContext, mpsc::Receiver<NodeEvent>) {
        let (events, rx) = mpsc::channel(64);
        let ctx = ConnectionContext {
            handshake: Handshake::new(HandshakeConfig::default(), nonces),
            chain: Chain::new(network).into_shared(),
            peer_manager: Arc::new(PeerManager::new(MAX_PEERS)),
            events,
            read_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(5),
        };
        (ctx, rx)
    }

    async fn loopback() -> Server {
        Server::bind_addr("127.0.0.1:0".parse().unwrap()).await.unwrap()
    }

    #[tokio::test]
    async fn test_loopback_peers_register_and_exchange() {
        let server = loopback().await;
        let addr = server.local_addr();
        let (server_ctx, mut server_events) = context(Network::Mainnet, Arc::new(NonceRegistry::new()));
        let (client_ctx, mut client_events) = context(Network::Mainnet, Arc::new(NonceRegistry::new()));

        let inbound_ctx = server_ctx.clone();
        let inbound = tokio::spawn(async move {
            let (stream, _) = server.accept().await.unwrap();
            handle_connection(stream, false, inbound_ctx).await
        });

        let stream = connect_to_peer(addr, Duration::from_secs(5))
            .await
            .unwrap();
        let client_manager = client_ctx.peer_manager.clone();
        let outbound = tokio::spawn(handle_connection(stream, true, client_ctx));

        let server_addr = match client_events.recv().await {
            Some(NodeEvent::PeerConnected(addr)) => addr,
            other => panic!("expected PeerConnected, got {:?}", other),
        };
        let client_addr = match server_events.recv().await {
            Some(NodeEvent::PeerConnected(addr)) => addr,
            other => panic!("expected PeerConnected, got {:?}", other),
        };

        // Both learned the genesis total difficulty
        let info = client_manager.get_peer_info(&server_addr).await.unwrap();
        assert!(info.outbound);
        assert_eq!(info.total_difficulty, Difficulty::from_num(1000));
        let info = server_ctx.peer_manager.get_peer_info(&client_addr).await.unwrap();
        assert!(!info.outbound);
        assert_eq!(info.total_difficulty, Difficulty::from_num(1000));

        let status = ChainStatus {
            total_difficulty: Difficulty::from_num(1000),
            height: 0,
        };
        client_manager
            .send_to(&server_addr, Message::Ping(status))
            .await
            .unwrap();
        assert_eq!(
            server_events.recv().await,
            Some(NodeEvent::Message(client_addr, Message::Ping(status)))
        );

        // Removing the peer closes the client's write side, which ends both tasks
        client_manager.remove_peer(&server_addr).await;
        assert!(inbound.await.unwrap().is_ok());
        assert!(outbound.await.unwrap().is_ok());
        assert_eq!(server_ctx.peer_manager.peer_count().await, 0);
    }

    #[tokio::test]
    async fn test_self_connection_is_dropped() {
        let server = loopback().await;
        let addr = server.local_addr();
        let (ctx, _events) = context(Network::Mainnet, Arc::new(NonceRegistry::new()));

        let inbound_ctx = ctx.clone();
        let inbound = tokio::spawn(async move {
            let (stream, _) = server.accept().await.unwrap();
            handle_connection(stream, false, inbound_ctx).await
        });

        let stream = connect_to_peer(addr, Duration::from_secs(5))
            .await
            .unwrap();
        let outbound = handle_connection(stream, true, ctx.clone()).await;

        assert!(inbound.await.unwrap().is_ok());
        assert!(matches!(
            outbound,
            Err(PeerError::Handshake(HandshakeError::ConnectionClosed))
        ));
        assert_eq!(ctx.peer_manager.peer_count().await, 0);
    }

    #[tokio::test]
    async fn test_idle_peer_is_disconnected() {
        let server = loopback().await;
        let addr = server.local_addr();
        let (mut server_ctx, _server_events) = context(Network::Testnet1, Arc::new(NonceRegistry::new()));
        server_ctx.read_timeout = Duration::from_millis(100);
        let (client_ctx, _client_events) = context(Network::Testnet1, Arc::new(NonceRegistry::new()));

        let inbound = tokio::spawn(async move {
            let (stream, _) = server.accept().await.unwrap();
            handle_connection(stream, false, server_ctx).await
        });

        let stream = connect_to_peer(addr, Duration::from_secs(5))
            .await
            .unwrap();
        let outbound = tokio::spawn(handle_connection(stream, true, client_ctx));

        assert!(matches!(
            inbound.await.unwrap(),
            Err(PeerError::Timeout(_))
        ));
        // Server closed the socket, the client sees a clean disconnect
        assert!(outbound.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let server = loopback().await;
        let addr = server.local_addr();
        drop(server);

        assert!(matches!(
            connect_to_peer(addr, Duration::from_secs(5)).await,
            Err(PeerError::ConnectionFailed(_))
        ));
    }
}
