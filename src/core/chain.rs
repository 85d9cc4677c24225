//! Chain implementation
//!
//! Headers are kept in an arena keyed by hash. The main chain is a
//! height-indexed list of hashes from genesis to the tip with the highest
//! total difficulty. Headers whose parent is known but which do not extend
//! the tip stay in the arena, so a competing branch that later overtakes the
//! tip can be switched to in a single step. Side branches that fork more
//! than [`FORK_HORIZON`] blocks below the tip are dropped together with their
//! bodies, so low-work forks cannot pile up.
//!
//! Bodies are fetched after their headers and stored separately.
//!
//! `Chain` itself is not synchronized. Nodes share it as a [`SharedChain`],
//! so every mutating call runs under the write lock and readers never see a
//! half-applied reorganization.

use crate::core::block::{Block, BlockHeader};
use crate::core::difficulty::Difficulty;
use crate::core::genesis::Network;
use crate::core::proof::ProofError;
use crate::crypto::BlockHash;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

/// Maximum number of headers returned for one locator request
pub const MAX_BLOCK_HEADERS: usize = 512;

/// Maximum number of hashes in a locator
pub const MAX_LOCATOR_SIZE: usize = 32;

/// Deepest fork, in blocks below the tip, whose side branch is kept
pub const FORK_HORIZON: u64 = MAX_BLOCK_HEADERS as u64;

/// Chain handle shared between peer tasks
pub type SharedChain = Arc<RwLock<Chain>>;

/// Chain acceptance errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("Orphan header {hash} at position {index}: previous {previous} is unknown")]
    OrphanHeader {
        index: usize,
        hash: BlockHash,
        previous: BlockHash,
    },
    #[error("Malformed proof in header {hash} at position {index}: {source}")]
    MalformedProof {
        index: usize,
        hash: BlockHash,
        source: ProofError,
    },
    #[error("Invalid proof of work in header {hash} at position {index}")]
    InvalidPow { index: usize, hash: BlockHash },
    #[error("Invalid height in header {hash} at position {index}: expected {expected}, got {got}")]
    InvalidHeight {
        index: usize,
        hash: BlockHash,
        expected: u64,
        got: u64,
    },
    #[error(
        "Stale difficulty in header {hash} at position {index}: expected total {expected}, got {got}"
    )]
    StaleDifficulty {
        index: usize,
        hash: BlockHash,
        expected: Difficulty,
        got: Difficulty,
    },
    #[error("Unknown header for block {hash}")]
    UnknownHeader { hash: BlockHash },
    #[error("Body validation failed for block {hash}")]
    BodyValidationFailed { hash: BlockHash },
}

/// Proof-of-work check supplied by the mining library
pub trait PowVerifier: Send + Sync {
    fn verify_pow(&self, header: &BlockHeader) -> bool;
}

/// Body check (UTXO and kernel sums) supplied by the commitment library
pub trait BodyValidator: Send + Sync {
    fn validate_body(&self, block: &Block) -> bool;
}

/// Verifier used when no cycle verifier is wired in
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAllPow;

impl PowVerifier for AcceptAllPow {
    fn verify_pow(&self, _header: &BlockHeader) -> bool {
        true
    }
}

/// Validator used when no commitment library is wired in
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAllBodies;

impl BodyValidator for AcceptAllBodies {
    fn validate_body(&self, _block: &Block) -> bool {
        true
    }
}

/// Result of attempting to add a single header
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderStatus {
    /// Header extended the main chain
    AddedToMainChain,
    /// Header is valid but its branch has less work than the tip
    AddedToSideChain,
    /// Header's branch overtook the tip
    CausedReorg { disconnected: u64, connected: u64 },
    /// Header was already known
    Duplicate,
}

/// Summary of a successful `process_headers` call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeadersOutcome {
    /// Headers newly stored (main or side chain)
    pub accepted: usize,
    /// Headers that were already known
    pub duplicates: usize,
    /// Main chain headers detached by reorganizations
    pub disconnected: u64,
    /// Side branch headers dropped beyond the fork horizon
    pub pruned: usize,
}

/// The header/block store
pub struct Chain {
    network: Network,
    genesis: Block,
    /// Every valid header whose ancestry reaches genesis
    headers: HashMap<BlockHash, BlockHeader>,
    /// Main chain hashes, index == height
    main_chain: Vec<BlockHash>,
    /// Accepted bodies
    blocks: HashMap<BlockHash, Block>,
    tip: BlockHeader,
    tip_hash: BlockHash,
    pow_verifier: Arc<dyn PowVerifier>,
    body_validator: Arc<dyn BodyValidator>,
}

impl Chain {
    /// Create a chain holding only the network's genesis block
    pub fn new(network: Network) -> Self {
        Self::with_validators(network, Arc::new(AcceptAllPow), Arc::new(AcceptAllBodies))
    }

    pub fn with_validators(
        network: Network,
        pow_verifier: Arc<dyn PowVerifier>,
        body_validator: Arc<dyn BodyValidator>,
    ) -> Self {
        let genesis = network.genesis();
        let hash = genesis.hash();

        let mut headers = HashMap::new();
        headers.insert(hash, genesis.header.clone());
        let mut blocks = HashMap::new();
        blocks.insert(hash, genesis.clone());

        Self {
            network,
            tip: genesis.header.clone(),
            tip_hash: hash,
            genesis,
            headers,
            main_chain: vec![hash],
            blocks,
            pow_verifier,
            body_validator,
        }
    }

    /// Wrap into the lock-protected handle used by peer tasks
    pub fn into_shared(self) -> SharedChain {
        Arc::new(RwLock::new(self))
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn genesis(&self) -> &Block {
        &self.genesis
    }

    /// Accumulated difficulty of the tip
    pub fn total_difficulty(&self) -> Difficulty {
        self.tip.total_difficulty
    }

    /// Height of the tip, genesis is 0
    pub fn height(&self) -> u64 {
        self.tip.height
    }

    pub fn tip(&self) -> &BlockHeader {
        &self.tip
    }

    pub fn head_hash(&self) -> BlockHash {
        self.tip_hash
    }

    /// Header on the main chain at `height`
    pub fn header_at(&self, height: u64) -> Option<&BlockHeader> {
        let hash = self.main_chain.get(usize::try_from(height).ok()?)?;
        self.headers.get(hash)
    }

    /// Any known header, main or side chain
    pub fn get_header(&self, hash: &BlockHash) -> Option<&BlockHeader> {
        self.headers.get(hash)
    }

    pub fn get_block(&self, hash: &BlockHash) -> Option<&Block> {
        self.blocks.get(hash)
    }

    pub fn has_block(&self, hash: &BlockHash) -> bool {
        self.blocks.contains_key(hash)
    }

    /// Height of `hash` if it is on the main chain
    fn main_height(&self, hash: &BlockHash) -> Option<u64> {
        let header = self.headers.get(hash)?;
        let index = usize::try_from(header.height).ok()?;
        (self.main_chain.get(index) == Some(hash)).then_some(header.height)
    }

    /// Headers following the most recent locator hash found on the main
    /// chain, in increasing height order. Empty if nothing matches.
    pub fn get_block_headers(&self, locator: &[BlockHash]) -> Vec<BlockHeader> {
        let Some(ancestor) = locator.iter().find_map(|hash| self.main_height(hash)) else {
            return Vec::new();
        };

        let start = ancestor as usize + 1;
        let end = self.main_chain.len().min(start + MAX_BLOCK_HEADERS);
        if start >= end {
            return Vec::new();
        }

        self.main_chain[start..end]
            .iter()
            .filter_map(|hash| self.headers.get(hash).cloned())
            .collect()
    }

    /// Our own locator: the tip, then hashes at exponentially increasing
    /// distance, always ending with genesis
    pub fn locator(&self) -> Vec<BlockHash> {
        let mut locator = Vec::new();
        let mut current = self.height();
        let mut step = 1u64;

        while current > 0 && locator.len() < MAX_LOCATOR_SIZE - 1 {
            locator.push(self.main_chain[current as usize]);
            current = current.saturating_sub(step);
            step = step.saturating_mul(2);
        }
        locator.push(self.main_chain[0]);
        locator
    }

    /// Main chain headers whose body has not been accepted yet
    pub fn missing_bodies(&self, limit: usize) -> Vec<BlockHash> {
        self.main_chain
            .iter()
            .skip(1)
            .filter(|hash| !self.blocks.contains_key(*hash))
            .take(limit)
            .copied()
            .collect()
    }

    /// Validate and store headers in order. Stops at the first invalid
    /// header; everything before it stays accepted. Side branches left
    /// beyond the fork horizon are pruned once the batch is done.
    pub fn process_headers(&mut self, headers: &[BlockHeader]) -> Result<HeadersOutcome, ChainError> {
        let mut outcome = HeadersOutcome::default();
        let mut result = Ok(());

        for (index, header) in headers.iter().enumerate() {
            match self.process_header(index, header) {
                Ok(HeaderStatus::Duplicate) => outcome.duplicates += 1,
                Ok(HeaderStatus::CausedReorg { disconnected, .. }) => {
                    outcome.accepted += 1;
                    outcome.disconnected += disconnected;
                }
                Ok(HeaderStatus::AddedToMainChain | HeaderStatus::AddedToSideChain) => {
                    outcome.accepted += 1
                }
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }

        outcome.pruned = self.prune_side_branches();
        result.map(|_| outcome)
    }

    /// Number of stored headers that are not on the main chain
    pub fn side_header_count(&self) -> usize {
        self.headers.len() - self.main_chain.len()
    }

    /// Drop every side header whose branch forks more than `FORK_HORIZON`
    /// blocks below the tip, along with any body stored for it
    fn prune_side_branches(&mut self) -> usize {
        if self.side_header_count() == 0 {
            return 0;
        }
        let Some(cutoff) = self.height().checked_sub(FORK_HORIZON) else {
            return 0;
        };

        let mut fork_points = HashMap::new();
        let side: Vec<BlockHash> = self
            .headers
            .keys()
            .filter(|hash| self.main_height(hash).is_none())
            .copied()
            .collect();
        let stale: Vec<BlockHash> = side
            .into_iter()
            .filter(|hash| self.fork_height(*hash, &mut fork_points) < cutoff)
            .collect();

        for hash in &stale {
            self.headers.remove(hash);
            self.blocks.remove(hash);
        }
        if !stale.is_empty() {
            log::debug!(
                "Pruned {} side headers forking below height {}",
                stale.len(),
                cutoff
            );
        }
        stale.len()
    }

    /// Height of the main chain header a side header descends from
    fn fork_height(&self, hash: BlockHash, memo: &mut HashMap<BlockHash, u64>) -> u64 {
        let mut path = Vec::new();
        let mut cursor = hash;

        let fork = loop {
            if let Some(height) = memo.get(&cursor) {
                break *height;
            }
            if let Some(height) = self.main_height(&cursor) {
                break height;
            }
            match self.headers.get(&cursor) {
                Some(header) => {
                    path.push(cursor);
                    cursor = header.previous;
                }
                None => break 0,
            }
        };

        for hash in path {
            memo.insert(hash, fork);
        }
        fork
    }

    fn process_header(&mut self, index: usize, header: &BlockHeader) -> Result<HeaderStatus, ChainError> {
        let hash = header.hash();
        if self.headers.contains_key(&hash) {
            return Ok(HeaderStatus::Duplicate);
        }

        let previous = self
            .headers
            .get(&header.previous)
            .ok_or(ChainError::OrphanHeader {
                index,
                hash,
                previous: header.previous,
            })?;
        let (prev_height, prev_total) = (previous.height, previous.total_difficulty);

        header
            .pow
            .validate_size()
            .map_err(|source| ChainError::MalformedProof {
                index,
                hash,
                source,
            })?;

        if !self.pow_verifier.verify_pow(header) {
            return Err(ChainError::InvalidPow { index, hash });
        }

        if header.height != prev_height + 1 {
            return Err(ChainError::InvalidHeight {
                index,
                hash,
                expected: prev_height + 1,
                got: header.height,
            });
        }

        let expected = prev_total + header.difficulty;
        if header.total_difficulty != expected {
            return Err(ChainError::StaleDifficulty {
                index,
                hash,
                expected,
                got: header.total_difficulty,
            });
        }

        self.headers.insert(hash, header.clone());

        if header.previous == self.tip_hash {
            self.main_chain.push(hash);
            self.tip = header.clone();
            self.tip_hash = hash;
            log::debug!("Header {} extended chain to height {}", hash, header.height);
            return Ok(HeaderStatus::AddedToMainChain);
        }

        if header.total_difficulty > self.tip.total_difficulty {
            let (disconnected, connected) = self.reorganize(hash, header);
            return Ok(HeaderStatus::CausedReorg {
                disconnected,
                connected,
            });
        }

        log::debug!(
            "Header {} stored on side chain at height {} (total difficulty {} <= {})",
            hash,
            header.height,
            header.total_difficulty,
            self.tip.total_difficulty
        );
        Ok(HeaderStatus::AddedToSideChain)
    }

    /// Replace the main chain suffix after the fork point with the branch
    /// ending at `new_tip`
    fn reorganize(&mut self, new_tip_hash: BlockHash, new_tip: &BlockHeader) -> (u64, u64) {
        let mut branch = vec![new_tip_hash];
        let mut cursor = new_tip.previous;

        let fork_height = loop {
            if let Some(height) = self.main_height(&cursor) {
                break height;
            }
            match self.headers.get(&cursor) {
                Some(header) => {
                    branch.push(cursor);
                    cursor = header.previous;
                }
                // Arena headers always have a stored parent
                None => break 0,
            }
        };

        let disconnected = self.height() - fork_height;
        let connected = branch.len() as u64;

        self.main_chain.truncate(fork_height as usize + 1);
        self.main_chain.extend(branch.into_iter().rev());
        self.tip = new_tip.clone();
        self.tip_hash = new_tip_hash;

        log::info!(
            "Chain reorganized at height {}: {} headers disconnected, {} connected, new tip {} (total difficulty {})",
            fork_height,
            disconnected,
            connected,
            new_tip_hash,
            new_tip.total_difficulty
        );

        (disconnected, connected)
    }

    /// Accept a body for an already accepted header. Returns `false` if the
    /// body was already stored.
    pub fn process_block(&mut self, block: Block) -> Result<bool, ChainError> {
        let hash = block.hash();
        if !self.headers.contains_key(&hash) {
            return Err(ChainError::UnknownHeader { hash });
        }
        if self.blocks.contains_key(&hash) {
            return Ok(false);
        }
        if !self.body_validator.validate_body(&block) {
            return Err(ChainError::BodyValidationFailed { hash });
        }

        log::debug!("Block {} accepted at height {}", hash, block.header.height);
        self.blocks.insert(hash, block);
        Ok(true)
    }
}
