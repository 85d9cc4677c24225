//! p2p-chain: the networking and chain core of a proof-of-work node
//!
//! This crate provides:
//! - Difficulty, proof-of-work witnesses, block headers and bodies
//! - Fixed genesis blocks for mainnet and two testnets
//! - A chain store with fork choice by total difficulty and reorganization
//! - Binary message framing over TCP
//! - The hand/shake handshake with self-connection detection
//! - Header-first synchronization between peers
//!
//! # Example
//!
//! ```rust
//! use p2p_chain::core::{Chain, Network};
//!
//! let chain = Chain::new(Network::Testnet1);
//! assert_eq!(chain.height(), 0);
//! assert_eq!(chain.total_difficulty().to_num(), 10);
//!
//! // A locator for a fresh chain holds only genesis
//! assert_eq!(chain.locator(), vec![chain.genesis().hash()]);
//! ```

pub mod cli;
pub mod core;
pub mod crypto;
pub mod network;
pub mod ser;

// Re-export commonly used types
pub use core::{Block, BlockHeader, Chain, ChainError, Difficulty, Network, Proof};
pub use crypto::{BlockHash, Hash};
pub use network::{Node, NodeConfig};
pub use ser::{Readable, WireError, Writeable};
