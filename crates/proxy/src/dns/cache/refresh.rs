//! Bookkeeping for optimistic-cache refreshes: at most one in-flight
//! refresh per cache key, and a drain point for shutdown.

use super::key::CacheKey;
use dashmap::DashMap;
use rustc_hash::FxBuildHasher;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

pub struct RefreshTable {
    tasks: DashMap<CacheKey, (), FxBuildHasher>,
    drained: Notify,
    cancel: CancellationToken,
}

impl Default for RefreshTable {
    fn default() -> Self {
        Self::new()
    }
}

impl RefreshTable {
    pub fn new() -> Self {
        Self {
            tasks: DashMap::with_hasher(FxBuildHasher),
            drained: Notify::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Claim the refresh slot for `key`. Returns `false` when another
    /// refresh for the same key is already in flight, or after shutdown
    /// has begun.
    pub fn try_claim(&self, key: &CacheKey) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        match self.tasks.entry(key.clone()) {
            dashmap::Entry::Occupied(_) => false,
            dashmap::Entry::Vacant(e) => {
                e.insert(());
                true
            }
        }
    }

    /// Must be called exactly once per successful `try_claim`, whatever
    /// the refresh outcome.
    pub fn release(&self, key: &CacheKey) {
        self.tasks.remove(key);
        self.drained.notify_waiters();
    }

    /// Token observed by refresh workers; cancelled at shutdown.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Stop accepting new refreshes and wait for the in-flight ones to
    /// release their slots.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        loop {
            if self.tasks.is_empty() {
                return;
            }
            let notified = self.drained.notified();
            if self.tasks.is_empty() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::codec::builders;
    use hickory_proto::rr::{Name, RecordType};
    use std::str::FromStr;

    fn key(domain: &str) -> CacheKey {
        let req = builders::query(Name::from_str(domain).unwrap(), RecordType::A, true, false);
        CacheKey::from_request(&req).unwrap()
    }

    #[test]
    fn claim_is_exclusive_per_key() {
        let table = RefreshTable::new();
        let k = key("example.com.");
        assert!(table.try_claim(&k));
        assert!(!table.try_claim(&k));
        assert!(table.try_claim(&key("other.com.")));
        table.release(&k);
        assert!(table.try_claim(&k));
    }

    #[tokio::test]
    async fn shutdown_waits_for_release() {
        let table = std::sync::Arc::new(RefreshTable::new());
        let k = key("example.com.");
        assert!(table.try_claim(&k));

        let table_clone = std::sync::Arc::clone(&table);
        let k_clone = k.clone();
        let releaser = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            table_clone.release(&k_clone);
        });

        table.shutdown().await;
        assert!(table.is_empty());
        // No claims after shutdown.
        assert!(!table.try_claim(&k));
        releaser.await.unwrap();
    }
}
