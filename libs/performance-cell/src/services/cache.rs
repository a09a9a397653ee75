use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

use crate::models::CacheStats;

/// Cache port for computed slot views. Writers call `invalidate` after a
/// successful commit; readers treat a miss as "recompute".
///
/// Readers that compute outside the cache take `generation(prefix)` before
/// reading the store and fill with `put_if_current`, so a view computed
/// before a concurrent invalidation is never stored.
#[async_trait]
pub trait SlotCache: Send + Sync {
    async fn get(&self, key: &str) -> Option<Value>;

    async fn put(&self, key: String, value: Value);

    /// Invalidation counter for `prefix`.
    async fn generation(&self, prefix: &str) -> u64;

    /// Stores the entry only while `prefix` is still at `generation`.
    async fn put_if_current(&self, key: String, value: Value, prefix: &str, generation: u64) -> bool;

    /// Drops every entry whose key starts with `prefix` and bumps its
    /// generation; returns how many entries were dropped.
    async fn invalidate(&self, prefix: &str) -> usize;

    async fn stats(&self) -> CacheStats;
}

pub fn clinic_cache_prefix(clinic_id: i64) -> String {
    format!("slots:clinic:{}:", clinic_id)
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, (Instant, Value)>,
    generations: HashMap<String, u64>,
}

impl CacheState {
    fn insert(&mut self, key: String, value: Value, ttl: Duration) {
        self.entries.retain(|_, (stored_at, _)| stored_at.elapsed() < ttl);
        self.entries.insert(key, (Instant::now(), value));
    }
}

pub struct InMemorySlotCache {
    state: RwLock<CacheState>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    invalidations: AtomicU64,
}

impl InMemorySlotCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            state: RwLock::new(CacheState::default()),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl SlotCache for InMemorySlotCache {
    async fn get(&self, key: &str) -> Option<Value> {
        let state = self.state.read().await;
        match state.entries.get(key) {
            Some((stored_at, value)) if stored_at.elapsed() < self.ttl => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(value.clone())
            }
            _ => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    async fn put(&self, key: String, value: Value) {
        self.state.write().await.insert(key, value, self.ttl);
    }

    async fn generation(&self, prefix: &str) -> u64 {
        self.state.read().await.generations.get(prefix).copied().unwrap_or(0)
    }

    async fn put_if_current(&self, key: String, value: Value, prefix: &str, generation: u64) -> bool {
        let mut state = self.state.write().await;
        let current = state.generations.get(prefix).copied().unwrap_or(0);
        if current != generation {
            debug!("Skipping stale cache fill for {} (generation {} < {})", key, generation, current);
            return false;
        }
        state.insert(key, value, self.ttl);
        true
    }

    async fn invalidate(&self, prefix: &str) -> usize {
        let mut state = self.state.write().await;
        let before = state.entries.len();
        state.entries.retain(|key, _| !key.starts_with(prefix));
        let removed = before - state.entries.len();
        *state.generations.entry(prefix.to_string()).or_insert(0) += 1;

        self.invalidations.fetch_add(1, Ordering::Relaxed);
        debug!("Invalidated {} cache entries under {}", removed, prefix);
        removed
    }

    async fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;

        CacheStats {
            hits,
            misses,
            hit_rate: if lookups > 0 { hits as f64 / lookups as f64 } else { 0.0 },
            total_entries: self.state.read().await.entries.len() as u64,
            invalidations: self.invalidations.load(Ordering::Relaxed),
        }
    }
}
