//! Cryptographic utilities for the chain
//!
//! Only hashing lives here. Commitment, range proof and kernel signature
//! verification are provided by an external library and reach the chain
//! through the validator traits in [`crate::core::chain`].

pub mod hash;

pub use hash::{double_sha256, sha256, BlockHash, Hash, BLOCK_HASH_SIZE};
