// src/cache.rs
//! # Resilient Mention Cache
//!
//! Per-`(source, brand)` store absorbing re-fetch cost and masking adapter
//! failures. Three read outcomes:
//!
//! - fresh: within the soft TTL (`get`);
//! - stale: past the soft TTL but within the hard max-age (`get_stale`),
//!   used exclusively on the error path;
//! - absent: past max-age or never populated.
//!
//! `put` overwrites unconditionally. Fetch failures never evict an entry and
//! are never cached themselves, so the next request always retries the
//! adapter. Entries live for the process lifetime only; source data is
//! ephemeral and re-fetchable, so there is nothing to persist.
//!
//! Keys are independent, so a single mutex around the backing map is all the
//! coordination concurrent aggregation calls need.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use metrics::counter;

use crate::mention::Mention;

type Key = (String, String);

#[derive(Debug, Clone)]
struct CacheEntry {
    data: Vec<Mention>,
    stored_at_ms: u64,
    soft_expires_at_ms: u64,
}

#[derive(Debug)]
pub struct MentionCache {
    inner: Mutex<HashMap<Key, CacheEntry>>,
    ttl_ms: u64,
    max_stale_ms: u64,
}

impl MentionCache {
    pub fn new(ttl: Duration, max_stale: Duration) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            ttl_ms: ttl.as_millis() as u64,
            max_stale_ms: max_stale.as_millis() as u64,
        }
    }

    /// Serve-fresh read: data only while `now < soft_expires_at`.
    pub fn get(&self, source: &str, brand: &str) -> Option<Vec<Mention>> {
        self.get_at(source, brand, now_ms())
    }

    pub fn get_at(&self, source: &str, brand: &str, now_ms: u64) -> Option<Vec<Mention>> {
        let inner = self.inner.lock().expect("cache mutex poisoned");
        let hit = inner
            .get(&key(source, brand))
            .filter(|e| now_ms < e.soft_expires_at_ms)
            .map(|e| e.data.clone());
        match hit {
            Some(_) => counter!("cache_fresh_hits_total").increment(1),
            None => counter!("cache_misses_total").increment(1),
        }
        hit
    }

    /// Error-path read: data while `now - stored_at < max_stale`, soft expiry
    /// ignored.
    pub fn get_stale(&self, source: &str, brand: &str) -> Option<Vec<Mention>> {
        self.get_stale_at(source, brand, now_ms())
    }

    pub fn get_stale_at(&self, source: &str, brand: &str, now_ms: u64) -> Option<Vec<Mention>> {
        let inner = self.inner.lock().expect("cache mutex poisoned");
        let hit = inner
            .get(&key(source, brand))
            .filter(|e| now_ms.saturating_sub(e.stored_at_ms) < self.max_stale_ms)
            .map(|e| e.data.clone());
        if hit.is_some() {
            counter!("cache_stale_hits_total").increment(1);
        }
        hit
    }

    /// Unconditional overwrite; the soft expiry restarts from `now`.
    pub fn put(&self, source: &str, brand: &str, data: Vec<Mention>) {
        self.put_at(source, brand, data, now_ms());
    }

    pub fn put_at(&self, source: &str, brand: &str, data: Vec<Mention>, now_ms: u64) {
        let entry = CacheEntry {
            data,
            stored_at_ms: now_ms,
            soft_expires_at_ms: now_ms + self.ttl_ms,
        };
        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        inner.insert(key(source, brand), entry);
    }

    /// Drop entries past the hard max-age. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        self.sweep_at(now_ms())
    }

    pub fn sweep_at(&self, now_ms: u64) -> usize {
        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        let before = inner.len();
        inner.retain(|_, e| now_ms.saturating_sub(e.stored_at_ms) < self.max_stale_ms);
        before - inner.len()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("cache mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn key(source: &str, brand: &str) -> Key {
    (source.to_string(), brand.trim().to_lowercase())
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_millis() as u64
}
