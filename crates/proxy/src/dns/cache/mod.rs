//! Response cache: fixed-capacity LRU of response templates keyed by the
//! request fingerprint, with TTL accounting and optimistic-expired
//! semantics.
//!
//! Readers share the lock; inserts, erasures, and the MRU promotion of
//! expired entries take it exclusively. The lock is never held across
//! upstream I/O. When both this lock and the refresh table are needed,
//! the refresh table is taken first.

pub mod key;
pub mod refresh;

pub use key::CacheKey;
pub use refresh::RefreshTable;

use crate::dns::codec;
use hickory_proto::op::{Message, ResponseCode};
use hickory_proto::rr::RecordType;
use lru::LruCache;
use parking_lot::RwLock;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};
use tracing::debug;

/// EDNS UDP payload size patched into cached responses, matching the
/// listener receive buffer.
pub const UDP_RECV_BUF_SIZE: u16 = 4096;

/// Template response plus bookkeeping. The template has its question
/// stripped and the AA bit cleared; id and TTLs are patched on the clone
/// handed out by `lookup`.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    template: Message,
    expires_at: Instant,
    upstream_id: Option<i32>,
}

/// A clone of the cached template patched for one specific request.
#[derive(Debug)]
pub struct CacheHit {
    pub response: Message,
    pub upstream_id: Option<i32>,
    pub expired: bool,
}

pub struct ResponseCache {
    // `None` while caching is disabled (capacity 0).
    inner: RwLock<Option<LruCache<CacheKey, CachedResponse>>>,
}

impl ResponseCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(NonZeroUsize::new(capacity).map(LruCache::new)),
        }
    }

    /// Replaces the store; existing entries are dropped. Zero disables all
    /// cache operations.
    pub fn set_capacity(&self, capacity: usize) {
        *self.inner.write() = NonZeroUsize::new(capacity).map(LruCache::new);
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.read().is_some()
    }

    pub fn len(&self) -> usize {
        self.inner.read().as_ref().map_or(0, |c| c.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clone-and-patch lookup. An expired entry is promoted to MRU so that
    /// concurrent readers race toward a single refresh trigger, and is
    /// returned with every TTL forced to one second.
    pub fn lookup(&self, key: &CacheKey, request: &Message) -> Option<CacheHit> {
        let (template, expires_at, upstream_id) = {
            let guard = self.inner.read();
            let cache = guard.as_ref()?;
            let entry = cache.peek(key)?;
            (
                entry.template.clone(),
                entry.expires_at,
                entry.upstream_id,
            )
        };

        let now = Instant::now();
        let remaining = expires_at.saturating_duration_since(now);
        let expired = remaining.is_zero();

        if expired {
            if let Some(cache) = self.inner.write().as_mut() {
                cache.promote(key);
            }
            debug!(key = %key, "Expired cache entry");
        }

        let ttl = if expired { 1 } else { ceil_secs(remaining).max(1) };

        let mut response = template;
        response.set_id(request.id());
        if let Some(edns) = response.extensions_mut() {
            edns.set_max_payload(UDP_RECV_BUF_SIZE);
        }
        for query in request.queries() {
            response.add_query(query.clone());
        }
        patch_ttls(&mut response, ttl);

        Some(CacheHit {
            response,
            upstream_id,
            expired,
        })
    }

    /// Store an upstream response if it passes the cacheability checklist;
    /// silently skips otherwise. May evict the least-recently-used entry.
    pub fn store(&self, key: CacheKey, mut response: Message, upstream_id: Option<i32>) {
        if !self.is_enabled() {
            return;
        }

        if response.truncated()
            || response.queries().len() != 1
            || response.response_code() != ResponseCode::NoError
            || codec::has_unsupported_extensions(&response)
        {
            return;
        }

        let qtype = response.queries()[0].query_type();
        if qtype == RecordType::A || qtype == RecordType::AAAA {
            let has_answer_of_type = response
                .answers()
                .iter()
                .any(|rr| rr.record_type() == qtype);
            if !has_answer_of_type {
                return;
            }
        }

        let min_ttl = codec::min_rr_ttl(&response);
        if min_ttl == 0 {
            return;
        }

        // Re-attached per-request on lookup.
        response.take_queries();
        response.set_authoritative(false);

        let entry = CachedResponse {
            template: response,
            expires_at: Instant::now() + Duration::from_secs(u64::from(min_ttl)),
            upstream_id,
        };

        if let Some(cache) = self.inner.write().as_mut() {
            cache.put(key, entry);
        }
    }

    pub fn erase(&self, key: &CacheKey) {
        if let Some(cache) = self.inner.write().as_mut() {
            cache.pop(key);
        }
    }

    pub fn clear(&self) {
        if let Some(cache) = self.inner.write().as_mut() {
            cache.clear();
        }
    }
}

fn patch_ttls(response: &mut Message, ttl: u32) {
    let answers = patch_records(response.take_answers(), ttl);
    response.insert_answers(answers);
    let authorities = patch_records(response.take_name_servers(), ttl);
    response.insert_name_servers(authorities);
    let additionals = patch_records(response.take_additionals(), ttl);
    response.insert_additionals(additionals);
}

fn patch_records(
    mut records: Vec<hickory_proto::rr::Record>,
    ttl: u32,
) -> Vec<hickory_proto::rr::Record> {
    for record in &mut records {
        record.set_ttl(ttl);
    }
    records
}

fn ceil_secs(duration: Duration) -> u32 {
    let secs = duration.as_secs();
    let ceiled = if duration.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    };
    ceiled.min(u64::from(u32::MAX)) as u32
}
