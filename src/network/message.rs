//! Network message types for P2P communication
//!
//! The protocol is a closed set of messages, each identified by a one-byte
//! type. Payloads are big-endian binary; see [`crate::ser`].

use crate::core::{Block, BlockHeader, Difficulty, MAX_BLOCK_HEADERS, MAX_LOCATOR_SIZE};
use crate::crypto::{BlockHash, Hash};
use crate::ser::{read_array, read_u16, read_u32, read_u64, read_u8, Readable, WireError, Writeable};
use bitflags::bitflags;
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

/// Protocol version, any mismatch aborts the handshake
pub const PROTOCOL_VERSION: u32 = 1;

/// Maximum payload size of a single frame
pub const MAX_MESSAGE_SIZE: usize = 8 * 1024 * 1024;

/// Maximum length of a user agent string
pub const MAX_USER_AGENT_LEN: usize = 256;

bitflags! {
    /// Services a node offers to its peers
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct Capabilities: u32 {
        /// Serves the full block history
        const FULL_HIST = 0b0000_0001;
        /// Serves UTXO set snapshots
        const UTXO_HIST = 0b0000_0010;
        /// Shares peer addresses
        const PEER_LIST = 0b0000_0100;
        /// A node offering everything above
        const FULL_NODE = Self::FULL_HIST.bits() | Self::UTXO_HIST.bits() | Self::PEER_LIST.bits();
    }
}

/// One-byte message type on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MsgType {
    Hand = 1,
    Shake = 2,
    Ping = 3,
    Pong = 4,
    GetHeaders = 7,
    Headers = 8,
    GetBlock = 9,
    Block = 10,
}

impl TryFrom<u8> for MsgType {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            1 => MsgType::Hand,
            2 => MsgType::Shake,
            3 => MsgType::Ping,
            4 => MsgType::Pong,
            7 => MsgType::GetHeaders,
            8 => MsgType::Headers,
            9 => MsgType::GetBlock,
            10 => MsgType::Block,
            other => return Err(WireError::UnknownMessageType(other)),
        })
    }
}

// =============================================================================
// Field Types
// =============================================================================

/// Software name and version, length-checked on construction
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UserAgent(String);

impl UserAgent {
    pub fn new(agent: impl Into<String>) -> Result<Self, WireError> {
        let agent = agent.into();
        if agent.len() > MAX_USER_AGENT_LEN {
            return Err(WireError::UserAgentTooLong {
                len: agent.len() as u64,
                max: MAX_USER_AGENT_LEN,
            });
        }
        Ok(Self(agent))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for UserAgent {
    fn default() -> Self {
        Self(format!("p2p-chain/{}", env!("CARGO_PKG_VERSION")))
    }
}

impl fmt::Display for UserAgent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Writeable for UserAgent {
    fn write(&self, buf: &mut BytesMut) {
        buf.put_u64(self.0.len() as u64);
        buf.put_slice(self.0.as_bytes());
    }
}

impl Readable for UserAgent {
    fn read(buf: &mut Bytes) -> Result<Self, WireError> {
        let len = read_u64(buf)?;
        if len > MAX_USER_AGENT_LEN as u64 {
            return Err(WireError::UserAgentTooLong {
                len,
                max: MAX_USER_AGENT_LEN,
            });
        }
        let len = len as usize;
        if buf.len() < len {
            return Err(WireError::Truncated {
                needed: len - buf.len(),
            });
        }
        let raw = buf.split_to(len);
        let agent = String::from_utf8(raw.to_vec()).map_err(|_| WireError::InvalidUtf8)?;
        Ok(Self(agent))
    }
}

// Address: family byte (0 = IPv4, 1 = IPv6), raw address, u16 port
impl Writeable for SocketAddr {
    fn write(&self, buf: &mut BytesMut) {
        match self.ip() {
            IpAddr::V4(ip) => {
                buf.put_u8(0);
                buf.put_slice(&ip.octets());
            }
            IpAddr::V6(ip) => {
                buf.put_u8(1);
                buf.put_slice(&ip.octets());
            }
        }
        buf.put_u16(self.port());
    }
}

impl Readable for SocketAddr {
    fn read(buf: &mut Bytes) -> Result<Self, WireError> {
        let ip = match read_u8(buf)? {
            0 => IpAddr::V4(Ipv4Addr::from(read_array::<4>(buf)?)),
            1 => IpAddr::V6(Ipv6Addr::from(read_array::<16>(buf)?)),
            family => return Err(WireError::InvalidAddressFamily(family)),
        };
        let port = read_u16(buf)?;
        Ok(SocketAddr::new(ip, port))
    }
}

fn read_version(buf: &mut Bytes, ours: u32) -> Result<u32, WireError> {
    let theirs = read_u32(buf)?;
    if theirs != ours {
        return Err(WireError::IncompatibleVersion { ours, theirs });
    }
    Ok(theirs)
}

// =============================================================================
// Handshake Messages
// =============================================================================

/// First half of the handshake, the initiator advertises itself
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hand {
    pub version: u32,
    pub capabilities: Capabilities,
    /// Fresh per handshake, detects connections to ourselves
    pub nonce: u64,
    pub total_difficulty: Difficulty,
    pub sender_addr: SocketAddr,
    /// The receiver's address as seen by the sender
    pub receiver_addr: SocketAddr,
    pub user_agent: UserAgent,
}

impl Writeable for Hand {
    fn write(&self, buf: &mut BytesMut) {
        buf.put_u32(self.version);
        buf.put_u32(self.capabilities.bits());
        buf.put_u64(self.nonce);
        buf.put_u64(self.total_difficulty.to_num());
        self.sender_addr.write(buf);
        self.receiver_addr.write(buf);
        self.user_agent.write(buf);
    }
}

impl Hand {
    /// Parse a `hand`, rejecting a version other than `version` before any
    /// other field is read
    pub fn read(buf: &mut Bytes, version: u32) -> Result<Self, WireError> {
        Ok(Hand {
            version: read_version(buf, version)?,
            capabilities: Capabilities::from_bits_retain(read_u32(buf)?),
            nonce: read_u64(buf)?,
            total_difficulty: Difficulty::from_num(read_u64(buf)?),
            sender_addr: SocketAddr::read(buf)?,
            receiver_addr: SocketAddr::read(buf)?,
            user_agent: UserAgent::read(buf)?,
        })
    }
}

/// Second half of the handshake, the responder's reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shake {
    pub version: u32,
    pub capabilities: Capabilities,
    pub total_difficulty: Difficulty,
    pub user_agent: UserAgent,
}

impl Writeable for Shake {
    fn write(&self, buf: &mut BytesMut) {
        buf.put_u32(self.version);
        buf.put_u32(self.capabilities.bits());
        buf.put_u64(self.total_difficulty.to_num());
        self.user_agent.write(buf);
    }
}

impl Shake {
    pub fn read(buf: &mut Bytes, version: u32) -> Result<Self, WireError> {
        Ok(Shake {
            version: read_version(buf, version)?,
            capabilities: Capabilities::from_bits_retain(read_u32(buf)?),
            total_difficulty: Difficulty::from_num(read_u64(buf)?),
            user_agent: UserAgent::read(buf)?,
        })
    }
}

// =============================================================================
// Sync Messages
// =============================================================================

/// Chain summary carried by ping/pong
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainStatus {
    pub total_difficulty: Difficulty,
    pub height: u64,
}

impl Writeable for ChainStatus {
    fn write(&self, buf: &mut BytesMut) {
        buf.put_u64(self.total_difficulty.to_num());
        buf.put_u64(self.height);
    }
}

impl Readable for ChainStatus {
    fn read(buf: &mut Bytes) -> Result<Self, WireError> {
        Ok(ChainStatus {
            total_difficulty: Difficulty::from_num(read_u64(buf)?),
            height: read_u64(buf)?,
        })
    }
}

/// Hashes used by a peer to find our common ancestor, most recent first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator(Vec<BlockHash>);

impl Locator {
    pub fn new(hashes: Vec<BlockHash>) -> Result<Self, WireError> {
        if hashes.len() > MAX_LOCATOR_SIZE {
            return Err(WireError::TooManyItems {
                what: "locator hashes",
                count: hashes.len() as u64,
                max: MAX_LOCATOR_SIZE,
            });
        }
        Ok(Self(hashes))
    }

    pub fn hashes(&self) -> &[BlockHash] {
        &self.0
    }
}

impl Writeable for Locator {
    fn write(&self, buf: &mut BytesMut) {
        buf.put_u8(self.0.len() as u8);
        for hash in &self.0 {
            hash.write(buf);
        }
    }
}

impl Readable for Locator {
    fn read(buf: &mut Bytes) -> Result<Self, WireError> {
        let count = read_u8(buf)? as usize;
        if count > MAX_LOCATOR_SIZE {
            return Err(WireError::TooManyItems {
                what: "locator hashes",
                count: count as u64,
                max: MAX_LOCATOR_SIZE,
            });
        }
        let mut hashes = Vec::with_capacity(count);
        for _ in 0..count {
            hashes.push(Hash::read(buf)?);
        }
        Ok(Self(hashes))
    }
}

// The encoder refuses batches over MAX_BLOCK_HEADERS through
// `Message::check_limits` before this runs.
fn write_headers(buf: &mut BytesMut, headers: &[BlockHeader]) {
    buf.put_u16(headers.len() as u16);
    for header in headers {
        header.write(buf);
    }
}

fn read_headers(buf: &mut Bytes) -> Result<Vec<BlockHeader>, WireError> {
    let count = read_u16(buf)? as usize;
    if count > MAX_BLOCK_HEADERS {
        return Err(WireError::TooManyItems {
            what: "headers",
            count: count as u64,
            max: MAX_BLOCK_HEADERS,
        });
    }
    let mut headers = Vec::with_capacity(count);
    for _ in 0..count {
        headers.push(BlockHeader::read(buf)?);
    }
    Ok(headers)
}

// =============================================================================
// Message
// =============================================================================

/// Network message types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Handshake opener
    Hand(Hand),
    /// Handshake reply
    Shake(Shake),
    /// Keep-alive carrying our chain summary
    Ping(ChainStatus),
    /// Keep-alive response carrying the responder's chain summary
    Pong(ChainStatus),
    /// Request headers after the first known locator hash
    GetHeaders(Locator),
    /// Headers in increasing height order
    Headers(Vec<BlockHeader>),
    /// Request a full block by header hash
    GetBlock(BlockHash),
    /// A full block
    Block(Block),
}

impl Message {
    pub fn msg_type(&self) -> MsgType {
        match self {
            Message::Hand(_) => MsgType::Hand,
            Message::Shake(_) => MsgType::Shake,
            Message::Ping(_) => MsgType::Ping,
            Message::Pong(_) => MsgType::Pong,
            Message::GetHeaders(_) => MsgType::GetHeaders,
            Message::Headers(_) => MsgType::Headers,
            Message::GetBlock(_) => MsgType::GetBlock,
            Message::Block(_) => MsgType::Block,
        }
    }

    /// Get message type name for logging
    pub fn type_name(&self) -> &'static str {
        match self {
            Message::Hand(_) => "Hand",
            Message::Shake(_) => "Shake",
            Message::Ping(_) => "Ping",
            Message::Pong(_) => "Pong",
            Message::GetHeaders(_) => "GetHeaders",
            Message::Headers(_) => "Headers",
            Message::GetBlock(_) => "GetBlock",
            Message::Block(_) => "Block",
        }
    }

    /// Refuse contents the payload format cannot describe. Locators, user
    /// agents and proofs are bounded when built; a header batch is a plain
    /// `Vec` and is checked here.
    pub fn check_limits(&self) -> Result<(), WireError> {
        match self {
            Message::Headers(headers) if headers.len() > MAX_BLOCK_HEADERS => {
                Err(WireError::TooManyItems {
                    what: "headers",
                    count: headers.len() as u64,
                    max: MAX_BLOCK_HEADERS,
                })
            }
            _ => Ok(()),
        }
    }

    /// Serialize the payload (without the frame prefix)
    pub fn write_payload(&self, buf: &mut BytesMut) {
        match self {
            Message::Hand(hand) => hand.write(buf),
            Message::Shake(shake) => shake.write(buf),
            Message::Ping(status) | Message::Pong(status) => status.write(buf),
            Message::GetHeaders(locator) => locator.write(buf),
            Message::Headers(headers) => write_headers(buf, headers),
            Message::GetBlock(hash) => hash.write(buf),
            Message::Block(block) => block.write(buf),
        }
    }

    /// Parse the payload of a frame whose type byte was `msg_type`
    pub fn read_payload(msg_type: MsgType, mut payload: Bytes, version: u32) -> Result<Self, WireError> {
        let buf = &mut payload;
        Ok(match msg_type {
            MsgType::Hand => Message::Hand(Hand::read(buf, version)?),
            MsgType::Shake => Message::Shake(Shake::read(buf, version)?),
            MsgType::Ping => Message::Ping(ChainStatus::read(buf)?),
            MsgType::Pong => Message::Pong(ChainStatus::read(buf)?),
            MsgType::GetHeaders => Message::GetHeaders(Locator::read(buf)?),
            MsgType::Headers => Message::Headers(read_headers(buf)?),
            MsgType::GetBlock => Message::GetBlock(Hash::read(buf)?),
            MsgType::Block => Message::Block(Block::read(buf)?),
        })
    }
}
