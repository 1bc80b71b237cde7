//! Fixed-capacity LRU cache over serialized answers, keyed by the
//! canonical question fingerprint plus the upstream that produced the
//! answer.

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::Instant;

use hickory_proto::op::Message;
use lru::LruCache;
use rustc_hash::FxBuildHasher;
use tracing::debug;

use super::message::QuestionFingerprint;

/// Cache key: byte-identity of the canonical question plus upstream id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub fingerprint: QuestionFingerprint,
    pub upstream: String,
}

impl CacheKey {
    pub fn new(fingerprint: QuestionFingerprint, upstream: &str) -> Self {
        Self {
            fingerprint,
            upstream: upstream.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheValue {
    pub answer: Message,
    pub expires_at: Instant,
}

impl CacheValue {
    pub fn new(answer: Message, expires_at: Instant) -> Self {
        Self { answer, expires_at }
    }

    /// Whole seconds left before expiry.
    pub fn remaining_secs(&self) -> u32 {
        self.expires_at
            .saturating_duration_since(Instant::now())
            .as_secs() as u32
    }
}

/// LRU answer cache. A capacity of zero disables every operation.
///
/// One mutex guards the map: the hot path is a hash probe plus a list
/// splice, so finer locking buys nothing here.
pub struct DnsCache {
    entries: Option<Mutex<LruCache<CacheKey, CacheValue, FxBuildHasher>>>,
}

impl DnsCache {
    pub fn new(capacity: usize) -> Self {
        let entries = NonZeroUsize::new(capacity)
            .map(|cap| Mutex::new(LruCache::with_hasher(cap, FxBuildHasher)));
        Self { entries }
    }

    pub fn disabled() -> Self {
        Self { entries: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.entries.is_some()
    }

    pub fn add(&self, key: CacheKey, value: CacheValue) {
        let Some(entries) = &self.entries else { return };
        if let Ok(mut entries) = entries.lock() {
            entries.put(key, value);
        }
    }

    /// Fetch a live entry, promoting recency. Expired entries are
    /// discarded on access.
    pub fn get(&self, key: &CacheKey) -> Option<CacheValue> {
        let entries = self.entries.as_ref()?;
        let mut entries = entries.lock().ok()?;
        match entries.get(key) {
            Some(value) if value.expires_at > Instant::now() => Some(value.clone()),
            Some(_) => {
                debug!(upstream = %key.upstream, name = %key.fingerprint.name, "cache entry expired");
                entries.pop(key);
                None
            }
            None => None,
        }
    }

    pub fn purge(&self) {
        if let Some(entries) = &self.entries {
            if let Ok(mut entries) = entries.lock() {
                entries.clear();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries
            .as_ref()
            .and_then(|e| e.lock().ok().map(|e| e.len()))
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
