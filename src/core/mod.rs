//! Core chain components
//!
//! This module contains the consensus-relevant building blocks:
//! - Difficulty and proof-of-work witness types
//! - Block headers and blocks
//! - Networks with their fixed genesis blocks
//! - The chain (header acceptance, fork choice by total difficulty, locators)

pub mod block;
pub mod chain;
pub mod difficulty;
pub mod genesis;
pub mod proof;

pub use block::{
    Block, BlockHeader, Commitment, Input, Output, TxKernel, MAX_BODY_ITEMS,
    MAX_RANGE_PROOF_SIZE, MAX_SIGNATURE_SIZE, PEDERSEN_COMMITMENT_SIZE,
};
pub use chain::{
    AcceptAllBodies, AcceptAllPow, BodyValidator, Chain, ChainError, HeaderStatus,
    HeadersOutcome, PowVerifier, SharedChain, FORK_HORIZON, MAX_BLOCK_HEADERS, MAX_LOCATOR_SIZE,
};
pub use difficulty::{Difficulty, ZERO_DIFFICULTY};
pub use genesis::Network;
pub use proof::{Proof, ProofError, MAX_PROOF_NONCES, PROOF_SIZE};
