//! Chain synchronization with peers
//!
//! Header-first: a peer claiming more total difficulty is asked for headers
//! after our locator, full batches are followed by another request, and
//! bodies for accepted main chain headers are fetched one `GetBlock` at a
//! time.
//!
//! Every outstanding request remembers the peer it went to and when. A
//! header request that goes unanswered for [`HEADER_REQUEST_TIMEOUT`], or
//! whose peer disconnects, releases the sync so another peer can be chosen.
//! Body requests are released the same way and asked for again.

use crate::core::{
    Block, BlockHeader, ChainError, Difficulty, HeadersOutcome, SharedChain, MAX_BLOCK_HEADERS,
};
use crate::crypto::BlockHash;
use crate::network::message::{Locator, Message};
use crate::network::peer::PeerManager;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// Bodies requested per batch
const MAX_BLOCK_REQUESTS: usize = MAX_BLOCK_HEADERS;

/// Longest we wait for a `Headers` reply before picking another peer
pub const HEADER_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Longest we wait for a requested body before asking again
pub const BLOCK_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// An outstanding request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Request {
    peer: SocketAddr,
    sent_at: Instant,
}

impl Request {
    fn new(peer: SocketAddr) -> Self {
        Self {
            peer,
            sent_at: Instant::now(),
        }
    }

    fn expired(&self, timeout: Duration) -> bool {
        self.sent_at.elapsed() >= timeout
    }
}

/// Chain synchronization manager
pub struct ChainSync {
    chain: SharedChain,
    peer_manager: Arc<PeerManager>,
    /// Peer whose `Headers` reply we are waiting for
    sync_peer: RwLock<Option<Request>>,
    /// Bodies requested and not yet received
    in_flight: RwLock<HashMap<BlockHash, Request>>,
    header_timeout: Duration,
    block_timeout: Duration,
}

impl ChainSync {
    pub fn new(chain: SharedChain, peer_manager: Arc<PeerManager>) -> Self {
        Self::with_timeouts(chain, peer_manager, HEADER_REQUEST_TIMEOUT, BLOCK_REQUEST_TIMEOUT)
    }

    pub fn with_timeouts(
        chain: SharedChain,
        peer_manager: Arc<PeerManager>,
        header_timeout: Duration,
        block_timeout: Duration,
    ) -> Self {
        Self {
            chain,
            peer_manager,
            sync_peer: RwLock::new(None),
            in_flight: RwLock::new(HashMap::new()),
            header_timeout,
            block_timeout,
        }
    }

    /// A peer is worth syncing from only if it claims strictly more work
    pub async fn needs_sync(&self, peer_total_difficulty: Difficulty) -> bool {
        peer_total_difficulty > self.chain.read().await.total_difficulty()
    }

    /// Check if we need to sync and start sync if needed. A stalled header
    /// request is abandoned here so the best peer can take over.
    pub async fn check_sync(&self) -> bool {
        let Some((peer_addr, peer_td)) = self.peer_manager.get_best_peer().await else {
            return false;
        };
        if !self.needs_sync(peer_td).await {
            return false;
        }

        {
            let mut sync_peer = self.sync_peer.write().await;
            if let Some(request) = *sync_peer {
                if !request.expired(self.header_timeout) {
                    return false;
                }
                log::warn!(
                    "No headers from {} after {:?}, abandoning it",
                    request.peer,
                    self.header_timeout
                );
            }
            *sync_peer = Some(Request::new(peer_addr));
        }

        log::info!(
            "Peer {} has more work ({} vs {}), starting sync",
            peer_addr,
            peer_td,
            self.chain.read().await.total_difficulty()
        );
        self.request_headers(peer_addr).await;
        true
    }

    /// Forget everything we asked `peer` for and find someone else
    pub async fn peer_disconnected(&self, peer: SocketAddr) {
        let was_sync_peer = {
            let mut sync_peer = self.sync_peer.write().await;
            if sync_peer.map(|request| request.peer) == Some(peer) {
                *sync_peer = None;
                true
            } else {
                false
            }
        };
        let dropped = {
            let mut in_flight = self.in_flight.write().await;
            let before = in_flight.len();
            in_flight.retain(|_, request| request.peer != peer);
            before - in_flight.len()
        };

        if was_sync_peer || dropped > 0 {
            log::info!(
                "Sync peer state released for {} ({} bodies outstanding)",
                peer,
                dropped
            );
        }

        self.check_sync().await;
        self.retry_bodies().await;
    }

    /// Ask the best peer again for bodies we still miss once their earlier
    /// request has timed out or was released. Returns how many were asked for.
    pub async fn retry_bodies(&self) -> usize {
        let expired = {
            let mut in_flight = self.in_flight.write().await;
            let before = in_flight.len();
            in_flight.retain(|_, request| !request.expired(self.block_timeout));
            before - in_flight.len()
        };
        if expired > 0 {
            log::debug!("{} body requests timed out", expired);
        }

        match self.peer_manager.get_best_peer().await {
            Some((peer, _)) => self.request_bodies(peer).await,
            None => 0,
        }
    }

    /// Ask `peer` for headers following our locator
    async fn request_headers(&self, peer: SocketAddr) {
        let locator = self.chain.read().await.locator();
        let msg = match Locator::new(locator) {
            Ok(locator) => Message::GetHeaders(locator),
            Err(e) => {
                log::warn!("Cannot build locator: {}", e);
                *self.sync_peer.write().await = None;
                return;
            }
        };

        *self.sync_peer.write().await = Some(Request::new(peer));
        if let Err(e) = self.peer_manager.send_to(&peer, msg).await {
            log::warn!("Failed to request headers from {}: {}", peer, e);
            *self.sync_peer.write().await = None;
        }
    }

    /// Request main chain bodies we miss and have not already asked for
    async fn request_bodies(&self, peer: SocketAddr) -> usize {
        let missing: Vec<BlockHash> = {
            let chain = self.chain.read().await;
            let mut in_flight = self.in_flight.write().await;
            let missing: Vec<BlockHash> = chain
                .missing_bodies(in_flight.len() + MAX_BLOCK_REQUESTS)
                .into_iter()
                .filter(|hash| !in_flight.contains_key(hash))
                .take(MAX_BLOCK_REQUESTS)
                .collect();
            for hash in &missing {
                in_flight.insert(*hash, Request::new(peer));
            }
            missing
        };

        let mut sent = 0;
        for hash in missing {
            match self.peer_manager.send_to(&peer, Message::GetBlock(hash)).await {
                Ok(()) => sent += 1,
                Err(e) => {
                    log::warn!("Failed to request block from {}: {}", peer, e);
                    self.in_flight.write().await.remove(&hash);
                }
            }
        }
        sent
    }

    /// Release the header sync if `from` is the peer we were waiting on
    async fn finish_header_sync(&self, from: SocketAddr) {
        let mut sync_peer = self.sync_peer.write().await;
        if sync_peer.map(|request| request.peer) == Some(from) {
            *sync_peer = None;
        }
    }

    /// Answer a `GetHeaders`
    pub async fn handle_get_headers(&self, locator: &Locator, from: SocketAddr) {
        let headers = self.chain.read().await.get_block_headers(locator.hashes());
        log::debug!("Sending {} headers to {}", headers.len(), from);

        if let Err(e) = self.peer_manager.send_to(&from, Message::Headers(headers)).await {
            log::warn!("Failed to send headers to {}: {}", from, e);
        }
    }

    /// Submit a `Headers` batch, request the bodies we now miss and keep
    /// going while full batches arrive
    pub async fn handle_headers(
        &self,
        headers: Vec<BlockHeader>,
        from: SocketAddr,
    ) -> Result<HeadersOutcome, ChainError> {
        if headers.is_empty() {
            self.finish_header_sync(from).await;
            return Ok(HeadersOutcome::default());
        }

        let result = self.chain.write().await.process_headers(&headers);
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                log::warn!("Rejected headers from {}: {}", from, e);
                self.finish_header_sync(from).await;
                return Err(e);
            }
        };

        log::info!(
            "Accepted {} headers from {} ({} known), height now {}",
            outcome.accepted,
            from,
            outcome.duplicates,
            self.chain.read().await.height()
        );

        self.request_bodies(from).await;

        if headers.len() == MAX_BLOCK_HEADERS {
            self.request_headers(from).await;
        } else {
            self.finish_header_sync(from).await;
            log::info!("Header sync with {} complete", from);
        }

        Ok(outcome)
    }

    /// Answer a `GetBlock` if we have the body
    pub async fn handle_get_block(&self, hash: &BlockHash, from: SocketAddr) {
        let block = self.chain.read().await.get_block(hash).cloned();
        match block {
            Some(block) => {
                if let Err(e) = self.peer_manager.send_to(&from, Message::Block(block)).await {
                    log::warn!("Failed to send block to {}: {}", from, e);
                }
            }
            None => log::debug!("Peer {} asked for unknown block {}", from, hash),
        }
    }

    /// Submit a received body. Returns whether it was newly stored.
    pub async fn handle_block(&self, block: Block, from: SocketAddr) -> Result<bool, ChainError> {
        let hash = block.hash();
        self.in_flight.write().await.remove(&hash);

        let result = self.chain.write().await.process_block(block);
        if let Err(e) = &result {
            log::warn!("Rejected block {} from {}: {}", hash, from, e);
        }
        result
    }

    /// Check if currently syncing
    pub async fn is_syncing(&self) -> bool {
        self.sync_peer.read().await.is_some()
    }

    /// Peer we are currently downloading headers from
    pub async fn sync_peer(&self) -> Option<SocketAddr> {
        self.sync_peer.read().await.map(|request| request.peer)
    }

    /// Number of bodies requested but not yet received
    pub async fn blocks_in_flight(&self) -> usize {
        self.in_flight.read().await.len()
    }
}
