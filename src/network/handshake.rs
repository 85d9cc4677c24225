//! Hand/shake exchange
//!
//! A fresh connection runs exactly one exchange before any chain data is
//! trusted:
//!
//! - the outbound side sends `hand` and waits for `shake`
//! - the inbound side reads `hand`, rejects connections to ourselves, and
//!   answers with `shake`
//!
//! The codec is told which kind must arrive next, so a wrong message is
//! refused from its type byte alone. A version mismatch is caught while
//! parsing, before any other field of the message is looked at. Every read and write is bounded
//! by the configured timeout. Nothing is retried here.

use crate::core::Difficulty;
use crate::network::codec::MessageCodec;
use crate::network::message::{
    Capabilities, Hand, Message, MsgType, Shake, UserAgent, PROTOCOL_VERSION,
};
use crate::network::nonce::NonceRegistry;
use crate::ser::WireError;
use futures::sink::SinkExt;
use futures::stream::StreamExt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::timeout;
use tokio_util::codec::Framed;

/// Default bound on each handshake read or write
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Handshake failures
#[derive(Error, Debug)]
pub enum HandshakeError {
    #[error("Incompatible protocol version: ours {ours}, theirs {theirs}")]
    IncompatibleVersion { ours: u32, theirs: u32 },
    #[error("Connected to ourselves (nonce {})", .hand.nonce)]
    SelfConnection { hand: Box<Hand> },
    #[error("Handshake timed out after {0:?}")]
    Timeout(Duration),
    #[error("Connection closed during handshake")]
    ConnectionClosed,
    #[error("Wire error: {0}")]
    Wire(WireError),
}

impl From<WireError> for HandshakeError {
    fn from(err: WireError) -> Self {
        match err {
            WireError::IncompatibleVersion { ours, theirs } => {
                HandshakeError::IncompatibleVersion { ours, theirs }
            }
            other => HandshakeError::Wire(other),
        }
    }
}

impl HandshakeError {
    /// Whether the remote sent malformed data. Self-connections, timeouts
    /// and closed sockets are not held against the peer.
    pub fn is_peer_fault(&self) -> bool {
        matches!(self, HandshakeError::Wire(err) if !matches!(err, WireError::Io(_)))
    }

    pub fn is_version_mismatch(&self) -> bool {
        matches!(self, HandshakeError::IncompatibleVersion { .. })
    }

    pub fn is_self_connection(&self) -> bool {
        matches!(self, HandshakeError::SelfConnection { .. })
    }
}

/// What we advertise during the handshake
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    pub protocol_version: u32,
    pub capabilities: Capabilities,
    pub user_agent: UserAgent,
    pub timeout: Duration,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            capabilities: Capabilities::FULL_NODE,
            user_agent: UserAgent::default(),
            timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }
}

/// Runs handshakes for one node
#[derive(Debug, Clone)]
pub struct Handshake {
    config: HandshakeConfig,
    nonces: Arc<NonceRegistry>,
}

impl Handshake {
    pub fn new(config: HandshakeConfig, nonces: Arc<NonceRegistry>) -> Self {
        Self { config, nonces }
    }

    pub fn config(&self) -> &HandshakeConfig {
        &self.config
    }

    /// Codec speaking our protocol version
    pub fn codec(&self) -> MessageCodec {
        MessageCodec::new(self.config.protocol_version)
    }

    pub fn framed<S>(&self, stream: S) -> Framed<S, MessageCodec>
    where
        S: AsyncRead + AsyncWrite,
    {
        Framed::new(stream, self.codec())
    }

    /// Outbound side: send `hand`, return the peer's `shake`
    pub async fn initiate<S>(
        &self,
        framed: &mut Framed<S, MessageCodec>,
        total_difficulty: Difficulty,
        local_addr: SocketAddr,
        remote_addr: SocketAddr,
    ) -> Result<Shake, HandshakeError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let hand = Hand {
            version: self.config.protocol_version,
            capabilities: self.config.capabilities,
            nonce: self.nonces.next_nonce().await,
            total_difficulty,
            sender_addr: local_addr,
            receiver_addr: remote_addr,
            user_agent: self.config.user_agent.clone(),
        };

        self.send(framed, Message::Hand(hand)).await?;
        log::debug!("Sent hand to {}", remote_addr);

        match self.receive(framed, MsgType::Shake).await? {
            Message::Shake(shake) => {
                log::debug!(
                    "Received shake from {}: agent={}, total_difficulty={}",
                    remote_addr,
                    shake.user_agent,
                    shake.total_difficulty
                );
                Ok(shake)
            }
            other => Err(unexpected(MsgType::Shake, &other)),
        }
    }

    /// Inbound side: read and vet the peer's `hand`, answer with `shake`
    pub async fn accept<S>(
        &self,
        framed: &mut Framed<S, MessageCodec>,
        total_difficulty: Difficulty,
    ) -> Result<Hand, HandshakeError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let hand = match self.receive(framed, MsgType::Hand).await? {
            Message::Hand(hand) => hand,
            other => return Err(unexpected(MsgType::Hand, &other)),
        };

        if self.nonces.consist(hand.nonce).await {
            return Err(HandshakeError::SelfConnection {
                hand: Box::new(hand),
            });
        }

        let shake = Shake {
            version: self.config.protocol_version,
            capabilities: self.config.capabilities,
            total_difficulty,
            user_agent: self.config.user_agent.clone(),
        };
        self.send(framed, Message::Shake(shake)).await?;

        log::debug!(
            "Accepted hand from {}: agent={}, total_difficulty={}",
            hand.sender_addr,
            hand.user_agent,
            hand.total_difficulty
        );
        Ok(hand)
    }

    async fn send<S>(
        &self,
        framed: &mut Framed<S, MessageCodec>,
        msg: Message,
    ) -> Result<(), HandshakeError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        timeout(self.config.timeout, framed.send(msg))
            .await
            .map_err(|_| HandshakeError::Timeout(self.config.timeout))??;
        Ok(())
    }

    async fn receive<S>(
        &self,
        framed: &mut Framed<S, MessageCodec>,
        expected: MsgType,
    ) -> Result<Message, HandshakeError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        framed.codec_mut().expect(Some(expected));
        let result = timeout(self.config.timeout, framed.next()).await;
        framed.codec_mut().expect(None);

        match result {
            Err(_) => Err(HandshakeError::Timeout(self.config.timeout)),
            Ok(None) => Err(HandshakeError::ConnectionClosed),
            Ok(Some(msg)) => Ok(msg?),
        }
    }
}

fn unexpected(expected: MsgType, got: &Message) -> HandshakeError {
    HandshakeError::Wire(WireError::UnexpectedMessageType {
        expected: expected as u8,
        got: got.msg_type() as u8,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::message::ChainStatus;
    use tokio::io::{duplex, AsyncWriteExt};

    fn addrs() -> (SocketAddr, SocketAddr) {
        (
            "127.0.0.1:40001".parse().unwrap(),
            "127.0.0.1:13414".parse().unwrap(),
        )
    }

    fn node(version: u32, timeout: Duration) -> Handshake {
        let config = HandshakeConfig {
            protocol_version: version,
            timeout,
            ..Default::default()
        };
        Handshake::new(config, Arc::new(NonceRegistry::new()))
    }

    #[tokio::test]
    async fn test_genesis_peers_complete_handshake() {
        let (a, b) = duplex(4096);
        let client = node(PROTOCOL_VERSION, DEFAULT_HANDSHAKE_TIMEOUT);
        let server = node(PROTOCOL_VERSION, DEFAULT_HANDSHAKE_TIMEOUT);
        let genesis_td = Difficulty::from_num(1000);

        let server_task = tokio::spawn(async move {
            let mut framed = server.framed(b);
            server.accept(&mut framed, genesis_td).await
        });

        let (local, remote) = addrs();
        let mut framed = client.framed(a);
        let shake = client
            .initiate(&mut framed, genesis_td, local, remote)
            .await
            .unwrap();
        let hand = server_task.await.unwrap().unwrap();

        assert_eq!(shake.total_difficulty.to_num(), 1000);
        assert_eq!(shake.version, PROTOCOL_VERSION);
        assert_eq!(shake.capabilities, Capabilities::FULL_NODE);
        assert_eq!(hand.total_difficulty.to_num(), 1000);
        assert_eq!(hand.sender_addr, local);
        assert_eq!(hand.receiver_addr, remote);
        // Nobody is ahead, nobody syncs
        assert!(shake.total_difficulty <= genesis_td);
        assert!(hand.total_difficulty <= genesis_td);
    }

    #[tokio::test]
    async fn test_self_connection_detected() {
        let (a, b) = duplex(4096);
        // Both ends share one registry, as they would inside one process
        let shared = node(PROTOCOL_VERSION, DEFAULT_HANDSHAKE_TIMEOUT);
        let inbound = shared.clone();

        let server_task = tokio::spawn(async move {
            let mut framed = inbound.framed(b);
            inbound.accept(&mut framed, Difficulty::from_num(1000)).await
        });

        let (local, remote) = addrs();
        let mut framed = shared.framed(a);
        let outbound = shared
            .initiate(&mut framed, Difficulty::from_num(1000), local, remote)
            .await;

        let err = server_task.await.unwrap().unwrap_err();
        match &err {
            HandshakeError::SelfConnection { hand } => {
                assert!(shared.nonces.consist(hand.nonce).await);
                assert_eq!(hand.sender_addr, local);
            }
            other => panic!("expected self connection, got {:?}", other),
        }
        assert!(err.is_self_connection());
        assert!(!err.is_peer_fault());
        assert!(matches!(outbound, Err(HandshakeError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_version_mismatch_rejected() {
        let (a, b) = duplex(4096);
        let client = node(PROTOCOL_VERSION + 1, DEFAULT_HANDSHAKE_TIMEOUT);
        let server = node(PROTOCOL_VERSION, DEFAULT_HANDSHAKE_TIMEOUT);

        let server_task = tokio::spawn(async move {
            let mut framed = server.framed(b);
            server.accept(&mut framed, Difficulty::from_num(1000)).await
        });

        let (local, remote) = addrs();
        let mut framed = client.framed(a);
        let outbound = client
            .initiate(&mut framed, Difficulty::from_num(1000), local, remote)
            .await;

        let err = server_task.await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            HandshakeError::IncompatibleVersion {
                ours: PROTOCOL_VERSION,
                theirs
            } if theirs == PROTOCOL_VERSION + 1
        ));
        assert!(err.is_version_mismatch());
        assert!(outbound.is_err());
    }

    #[tokio::test]
    async fn test_unexpected_first_message() {
        let (a, b) = duplex(4096);
        let client = node(PROTOCOL_VERSION, DEFAULT_HANDSHAKE_TIMEOUT);
        let server = node(PROTOCOL_VERSION, DEFAULT_HANDSHAKE_TIMEOUT);

        let mut framed = client.framed(a);
        framed
            .send(Message::Ping(ChainStatus {
                total_difficulty: Difficulty::from_num(1),
                height: 0,
            }))
            .await
            .unwrap();

        let mut server_framed = server.framed(b);
        let err = server
            .accept(&mut server_framed, Difficulty::from_num(1000))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            HandshakeError::Wire(WireError::UnexpectedMessageType {
                expected: 1,
                got: 3
            })
        ));
        assert!(err.is_peer_fault());
    }

    #[tokio::test]
    async fn test_empty_ping_refused_by_kind() {
        let (mut a, b) = duplex(4096);
        let server = node(PROTOCOL_VERSION, DEFAULT_HANDSHAKE_TIMEOUT);

        // A ping frame with no payload at all
        a.write_all(&[MsgType::Ping as u8, 0, 0, 0, 0]).await.unwrap();

        let mut framed = server.framed(b);
        let err = server
            .accept(&mut framed, Difficulty::from_num(1000))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            HandshakeError::Wire(WireError::UnexpectedMessageType {
                expected: 1,
                got: 3
            })
        ));
        assert!(framed.codec().expected().is_none());
    }

    #[tokio::test]
    async fn test_foreign_shake_instead_of_hand() {
        let (a, b) = duplex(4096);
        let foreign = node(PROTOCOL_VERSION + 1, DEFAULT_HANDSHAKE_TIMEOUT);
        let server = node(PROTOCOL_VERSION, DEFAULT_HANDSHAKE_TIMEOUT);

        let mut framed = foreign.framed(a);
        framed
            .send(Message::Shake(Shake {
                version: PROTOCOL_VERSION + 1,
                capabilities: Capabilities::FULL_NODE,
                total_difficulty: Difficulty::from_num(1),
                user_agent: UserAgent::default(),
            }))
            .await
            .unwrap();

        let mut server_framed = server.framed(b);
        let err = server
            .accept(&mut server_framed, Difficulty::from_num(1000))
            .await
            .unwrap_err();
        // The kind is wrong before the version is ever read
        assert!(matches!(
            err,
            HandshakeError::Wire(WireError::UnexpectedMessageType {
                expected: 1,
                got: 2
            })
        ));
        assert!(!err.is_version_mismatch());
    }

    #[tokio::test]
    async fn test_truncated_hand() {
        let (mut a, b) = duplex(4096);
        let server = node(PROTOCOL_VERSION, DEFAULT_HANDSHAKE_TIMEOUT);

        // Frame announces 64 bytes, only 4 arrive before close
        a.write_all(&[MsgType::Hand as u8, 0, 0, 0, 64, 0, 0, 0, 1])
            .await
            .unwrap();
        drop(a);

        let mut framed = server.framed(b);
        let err = server
            .accept(&mut framed, Difficulty::from_num(1000))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            HandshakeError::Wire(WireError::Truncated { .. })
        ));
    }

    #[tokio::test]
    async fn test_silent_peer_times_out() {
        let (_a, b) = duplex(4096);
        let server = node(PROTOCOL_VERSION, Duration::from_millis(50));

        let mut framed = server.framed(b);
        let err = server
            .accept(&mut framed, Difficulty::from_num(1000))
            .await
            .unwrap_err();
        assert!(matches!(err, HandshakeError::Timeout(_)));
        assert!(!err.is_peer_fault());
    }

    #[tokio::test]
    async fn test_closed_before_hand() {
        let (a, b) = duplex(4096);
        drop(a);
        let server = node(PROTOCOL_VERSION, DEFAULT_HANDSHAKE_TIMEOUT);
        let mut framed = server.framed(b);
        let err = server
            .accept(&mut framed, Difficulty::from_num(1000))
            .await
            .unwrap_err();
        assert!(matches!(err, HandshakeError::ConnectionClosed));
    }
}
