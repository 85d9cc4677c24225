//! Hashing utilities for the chain
//!
//! Block identities are double SHA-256 digests of the canonical header
//! encoding. The same 32-byte digest type is used for the commitment roots
//! carried in the header.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;

/// Size in bytes of a block hash
pub const BLOCK_HASH_SIZE: usize = 32;

/// A 32-byte digest
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Hash(pub [u8; BLOCK_HASH_SIZE]);

/// Identity of a block header
pub type BlockHash = Hash;

impl Hash {
    pub const fn from_bytes(bytes: [u8; BLOCK_HASH_SIZE]) -> Self {
        Self(bytes)
    }

    /// A digest with every byte set to `byte`
    pub const fn repeat(byte: u8) -> Self {
        Self([byte; BLOCK_HASH_SIZE])
    }

    pub fn as_bytes(&self) -> &[u8; BLOCK_HASH_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let mut bytes = [0u8; BLOCK_HASH_SIZE];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form keeps log lines readable
        write!(f, "Hash({})", &self.to_hex()[..12])
    }
}

impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Hash::from_hex(&s).map_err(de::Error::custom)
    }
}

/// Computes SHA-256 hash of the input data
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Computes double SHA-256 hash (SHA-256 of SHA-256)
pub fn double_sha256(data: &[u8]) -> Hash {
    Hash(sha256(&sha256(data)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256() {
        let hash = sha256(b"hello world");
        assert_eq!(
            hex::encode(hash),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_double_sha256_is_deterministic() {
        let a = double_sha256(b"header bytes");
        let b = double_sha256(b"header bytes");
        assert_eq!(a, b);
        assert_ne!(a, double_sha256(b"other bytes"));
        assert_eq!(a.0, sha256(&sha256(b"header bytes")));
    }

    #[test]
    fn test_hex_roundtrip_and_serde() {
        let h = Hash::repeat(0xab);
        assert_eq!(Hash::from_hex(&h.to_hex()).unwrap(), h);
        assert!(Hash::from_hex("abcd").is_err());

        let json = serde_json::to_string(&h).unwrap();
        assert_eq!(json, format!("\"{}\"", "ab".repeat(32)));
        let back: Hash = serde_json::from_str(&json).unwrap();
        assert_eq!(back, h);
    }
}
