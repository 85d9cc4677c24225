//! Handshake nonces
//!
//! Every outbound `hand` carries a fresh nonce. When an inbound `hand`
//! arrives with a nonce we issued ourselves, the connection looped back to
//! this process. One registry is created per node and shared by all peer
//! tasks.

use rand::Rng;
use std::collections::{HashSet, VecDeque};
use tokio::sync::Mutex;

/// Number of recent nonces remembered
pub const DEFAULT_NONCE_RETENTION: usize = 100;

#[derive(Debug, Default)]
struct NonceSet {
    members: HashSet<u64>,
    /// Insertion order, oldest first
    order: VecDeque<u64>,
}

/// Nonces issued by this process for outbound handshakes
#[derive(Debug)]
pub struct NonceRegistry {
    inner: Mutex<NonceSet>,
    retention: usize,
}

impl NonceRegistry {
    pub fn new() -> Self {
        Self::with_retention(DEFAULT_NONCE_RETENTION)
    }

    /// Keep at most `retention` nonces; older ones are retired first
    pub fn with_retention(retention: usize) -> Self {
        Self {
            inner: Mutex::new(NonceSet::default()),
            retention: retention.max(1),
        }
    }

    /// Generate, record and return a nonce not currently retained
    pub async fn next_nonce(&self) -> u64 {
        let mut inner = self.inner.lock().await;
        let mut rng = rand::thread_rng();

        let nonce = loop {
            let candidate: u64 = rng.gen();
            if candidate != 0 && !inner.members.contains(&candidate) {
                break candidate;
            }
        };

        inner.members.insert(nonce);
        inner.order.push_back(nonce);
        while inner.order.len() > self.retention {
            if let Some(old) = inner.order.pop_front() {
                inner.members.remove(&old);
            }
        }

        nonce
    }

    /// Whether `nonce` was issued here and is still retained
    pub async fn consist(&self, nonce: u64) -> bool {
        self.inner.lock().await.members.contains(&nonce)
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.order.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for NonceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_issued_nonce_is_recognized() {
        let registry = NonceRegistry::new();
        let nonce = registry.next_nonce().await;
        assert!(registry.consist(nonce).await);
        assert!(!registry.consist(nonce.wrapping_add(1)).await);
        assert!(!registry.consist(0).await);
    }

    #[tokio::test]
    async fn test_old_nonces_are_retired() {
        let registry = NonceRegistry::with_retention(3);
        let first = registry.next_nonce().await;
        for _ in 0..3 {
            registry.next_nonce().await;
        }
        assert_eq!(registry.len().await, 3);
        assert!(!registry.consist(first).await);
    }

    #[tokio::test]
    async fn test_concurrent_issue_has_no_duplicates() {
        let registry = Arc::new(NonceRegistry::with_retention(1000));
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                let mut issued = Vec::new();
                for _ in 0..50 {
                    issued.push(registry.next_nonce().await);
                }
                issued
            }));
        }

        let mut all = HashSet::new();
        for task in tasks {
            for nonce in task.await.unwrap() {
                assert!(all.insert(nonce));
                assert!(registry.consist(nonce).await);
            }
        }
        assert_eq!(all.len(), 400);
    }
}
