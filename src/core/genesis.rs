//! Networks and their genesis blocks
//!
//! Two nodes on the same network must agree bit-for-bit on the genesis
//! header, so every field here is a protocol constant.

use crate::core::block::{Block, BlockHeader};
use crate::core::difficulty::Difficulty;
use crate::core::proof::Proof;
use crate::crypto::Hash;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Unix time of 2017-11-16T20:00:00Z
const TESTNET_GENESIS_TIME: i64 = 1_510_862_400;

/// Unix time of 2018-08-14T00:00:00Z
const MAINNET_GENESIS_TIME: i64 = 1_534_204_800;

const TESTNET1_POW: [u32; 42] = [
    0x21e, 0x7a2, 0xeae, 0x144e, 0x1b1c, 0x1fbd, 0x203a, 0x214b, 0x293b, 0x2b74, 0x2bfa, 0x2c26,
    0x32bb, 0x346a, 0x34c7, 0x37c5, 0x4164, 0x42cc, 0x4cc3, 0x55af, 0x5a70, 0x5b14, 0x5e1c,
    0x5f76, 0x6061, 0x60f9, 0x61d7, 0x6318, 0x63a1, 0x63fb, 0x649b, 0x64e5, 0x65a1, 0x6b69,
    0x70f8, 0x71c7, 0x71cd, 0x7492, 0x7b11, 0x7db8, 0x7f29, 0x7ff8,
];

const TESTNET2_POW: [u32; 42] = [
    0x43ee48, 0x18d5a49, 0x2b76803, 0x3181a29, 0x39d6a8a, 0x39ef8d8, 0x478a0fb, 0x69c1f9e,
    0x6da4bca, 0x6f8782c, 0x9d842d7, 0xa051397, 0xb56934c, 0xbf1f2c7, 0xc992c89, 0xce53a5a,
    0xfa87225, 0x1070f99e, 0x107b39af, 0x1160a11b, 0x11b379a8, 0x12420e02, 0x12991602,
    0x12cc4a71, 0x13d91075, 0x15c950d0, 0x1659b7be, 0x1682c2b4, 0x1796c62f, 0x191cf4c9,
    0x19d71ac0, 0x1b812e44, 0x1d150efe, 0x1d15bd77, 0x1d172841, 0x1d51e967, 0x1ee1de39,
    0x1f35c9b3, 0x1f557204, 0x1fbf884f, 0x1fcf80bf, 0x1fd59d40,
];

// Mainnet reuses the first testnet's proof.
const MAINNET_POW: [u32; 42] = TESTNET1_POW;

/// Network a node participates in
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    #[default]
    Mainnet,
    Testnet1,
    Testnet2,
}

impl Network {
    /// The fixed genesis block of this network
    pub fn genesis(self) -> Block {
        let (time, difficulty, nonce, pow) = match self {
            Network::Testnet1 => (TESTNET_GENESIS_TIME, 10, 28205, TESTNET1_POW),
            // The second testnet launched without a genesis difficulty
            Network::Testnet2 => (TESTNET_GENESIS_TIME, 0, 70081, TESTNET2_POW),
            Network::Mainnet => (MAINNET_GENESIS_TIME, 1000, 28205, MAINNET_POW),
        };

        Block::with_header(BlockHeader {
            version: 1,
            height: 0,
            previous: Hash::repeat(0xff),
            timestamp: DateTime::<Utc>::from_timestamp(time, 0).unwrap_or_default(),
            difficulty: Difficulty::from_num(difficulty),
            total_difficulty: Difficulty::from_num(difficulty),
            utxo_root: Hash::repeat(0x00),
            range_proof_root: Hash::repeat(0x00),
            kernel_root: Hash::repeat(0x00),
            nonce,
            pow: Proof::from_array(pow),
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Testnet1 => "testnet1",
            Network::Testnet2 => "testnet2",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" => Ok(Network::Mainnet),
            "testnet1" => Ok(Network::Testnet1),
            "testnet2" => Ok(Network::Testnet2),
            other => Err(format!("unknown network: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::proof::PROOF_SIZE;

    #[test]
    fn test_genesis_difficulties() {
        assert_eq!(Network::Mainnet.genesis().header.difficulty.to_num(), 1000);
        assert_eq!(
            Network::Mainnet.genesis().header.total_difficulty.to_num(),
            1000
        );
        assert_eq!(Network::Testnet1.genesis().header.difficulty.to_num(), 10);
        assert_eq!(Network::Testnet2.genesis().header.difficulty.to_num(), 0);
    }

    #[test]
    fn test_genesis_is_fixed() {
        for network in [Network::Mainnet, Network::Testnet1, Network::Testnet2] {
            let a = network.genesis();
            let b = network.genesis();
            assert_eq!(a, b);
            assert_eq!(a.hash(), b.hash());
            assert_eq!(a.header.height, 0);
            assert_eq!(a.header.previous, Hash::repeat(0xff));
            assert_eq!(a.header.pow.len(), PROOF_SIZE);
            assert!(a.inputs.is_empty() && a.outputs.is_empty() && a.kernels.is_empty());
        }
        assert_ne!(
            Network::Mainnet.genesis().hash(),
            Network::Testnet1.genesis().hash()
        );
    }

    #[test]
    fn test_genesis_timestamps() {
        assert_eq!(
            Network::Mainnet.genesis().header.timestamp.to_rfc3339(),
            "2018-08-14T00:00:00+00:00"
        );
        assert_eq!(
            Network::Testnet1.genesis().header.timestamp.to_rfc3339(),
            "2017-11-16T20:00:00+00:00"
        );
    }

    #[test]
    fn test_network_parsing() {
        assert_eq!("mainnet".parse::<Network>().unwrap(), Network::Mainnet);
        assert_eq!("TESTNET2".parse::<Network>().unwrap(), Network::Testnet2);
        assert!("devnet".parse::<Network>().is_err());
        assert_eq!(Network::Testnet1.to_string(), "testnet1");
    }
}
