//! P2P Networking module
//!
//! Provides peer-to-peer networking for header-first chain synchronization.
//!
//! # Features
//! - Length-prefixed binary message framing
//! - Versioned hand/shake handshake with self-connection detection
//! - Peer tracking by advertised total difficulty
//! - Header-first chain synchronization with body download

pub mod codec;
pub mod handshake;
pub mod message;
pub mod node;
pub mod nonce;
pub mod peer;
pub mod server;
pub mod sync;

pub use codec::{MessageCodec, FRAME_HEADER_SIZE};
pub use handshake::{Handshake, HandshakeConfig, HandshakeError, DEFAULT_HANDSHAKE_TIMEOUT};
pub use message::{
    Capabilities, ChainStatus, Hand, Locator, Message, MsgType, Shake, UserAgent,
    MAX_MESSAGE_SIZE, MAX_USER_AGENT_LEN, PROTOCOL_VERSION,
};
pub use node::{Node, NodeConfig, NodeStatus, DEFAULT_PORT};
pub use nonce::{NonceRegistry, DEFAULT_NONCE_RETENTION};
pub use peer::{PeerError, PeerHandle, PeerInfo, PeerManager, PeerState, MAX_PEERS};
pub use server::{connect_to_peer, handle_connection, ConnectionContext, NodeEvent, Server};
pub use sync::{ChainSync, BLOCK_REQUEST_TIMEOUT, HEADER_REQUEST_TIMEOUT};
