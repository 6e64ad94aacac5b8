//! TTL response cache keyed by request fingerprint.
//!
//! Only successful responses are stored. Writes for the same key are
//! last-writer-wins; each read and write is a single operation under one
//! lock, so there is no read-modify-write window on a key.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::models::DataResponse;

/// Default time a cached response stays fresh.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60);

/// Default maximum number of cached responses.
pub const DEFAULT_CACHE_CAPACITY: usize = 1024;

#[derive(Debug)]
struct CacheEntry {
    response: DataResponse,
    inserted_at: Instant,
}

/// A fresh cache hit.
#[derive(Clone, Debug)]
pub struct CacheHit {
    pub response: DataResponse,
    pub age: Duration,
}

/// Counters for observability.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// Fingerprint → last successful response.
pub struct ResponseCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    ttl: Duration,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResponseCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            capacity: capacity.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn lock_entries(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.lock().unwrap_or_else(|poisoned| {
            warn!("Response cache mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Look up an unexpired response. Expired entries are dropped on the way.
    pub fn get(&self, fingerprint: &str) -> Option<CacheHit> {
        let mut entries = self.lock_entries();

        let hit = match entries.get(fingerprint) {
            Some(entry) if entry.inserted_at.elapsed() < self.ttl => Some(CacheHit {
                response: entry.response.clone(),
                age: entry.inserted_at.elapsed(),
            }),
            Some(_) => {
                debug!("Cache: entry {} expired", short(fingerprint));
                entries.remove(fingerprint);
                None
            }
            None => None,
        };

        if hit.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        hit
    }

    /// Store a successful response. Failures are ignored.
    ///
    /// When full, the oldest entry is evicted.
    pub fn insert(&self, fingerprint: String, response: DataResponse) {
        if !response.success {
            return;
        }

        let mut entries = self.lock_entries();
        if !entries.contains_key(&fingerprint) && entries.len() >= self.capacity {
            let oldest = entries
                .iter()
                .min_by_key(|(_, e)| e.inserted_at)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                debug!("Cache: evicting oldest entry {}", short(&oldest));
                entries.remove(&oldest);
            }
        }

        entries.insert(
            fingerprint,
            CacheEntry {
                response,
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn invalidate(&self, fingerprint: &str) -> bool {
        self.lock_entries().remove(fingerprint).is_some()
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.lock_entries();
        let before = entries.len();
        entries.retain(|_, e| e.inserted_at.elapsed() < self.ttl);
        before - entries.len()
    }

    pub fn clear(&self) {
        self.lock_entries().clear();
    }

    pub fn len(&self) -> usize {
        self.lock_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_entries().is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_TTL, DEFAULT_CACHE_CAPACITY)
    }
}

/// First 12 hex chars of a fingerprint, for logs.
fn short(fingerprint: &str) -> &str {
    &fingerprint[..fingerprint.len().min(12)]
}
